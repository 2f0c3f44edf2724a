use crate::{
    cases::BenchmarkCase,
    config::{PerfTestConfig, Toolchain, Workspace},
};
use std::path::PathBuf;

/// Everything a phase needs to know, passed explicitly instead of living in
/// process-wide state such as the current directory
#[derive(Debug, Clone)]
pub struct BenchmarkPlan {
    pub config: PerfTestConfig,
    pub workspace: Workspace,
    pub toolchain: Toolchain,
    pub cases: Vec<BenchmarkCase>,
    /// program the gate job re-invokes in read mode
    pub program: PathBuf,
    /// config file forwarded to the gate job
    pub config_file: Option<PathBuf>,
    /// directory the program was started from, relative config paths resolve against it
    pub invocation_dir: PathBuf,
}

/// execution context of a single case
#[derive(Debug, Clone)]
pub struct RunContext<'a> {
    pub index: usize,
    pub case: &'a BenchmarkCase,
    pub run_dir: PathBuf,
    /// input file in the source directory
    pub input: PathBuf,
}

impl BenchmarkPlan {
    pub fn contexts(&self) -> impl Iterator<Item = RunContext<'_>> {
        self.cases
            .iter()
            .enumerate()
            .map(|(index, case)| RunContext {
                index,
                case,
                run_dir: self.workspace.run_dir(index),
                input: self.workspace.input(case),
            })
    }

    /// path of the executable produced by the build
    pub fn executable(&self) -> PathBuf {
        self.workspace.executable(&self.toolchain)
    }
}
