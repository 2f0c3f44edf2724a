use crate::{cases::BenchmarkCase, plan::BenchmarkPlan};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{
    env,
    ffi::OsString,
    fmt, fs,
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// environment variable holding the base path of the scratch space
pub const SCRATCH_ENV: &str = "SCRATCH";

/// prefix of every module-load command, independent of compiler and architecture
const MODULE_PRELUDE: &str = "module unload darshan;module load craype-hugepages4M;";

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {0}")]
    ReadConfig(PathBuf, #[source] Error),
    #[error("Failed to parse config file")]
    ParseConfig(#[from] serde_yaml::Error),
    #[error("Failed to inspect the process environment")]
    Environment(#[source] Error),
    #[error("$SCRATCH must point to the scratch space")]
    MissingScratch,
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Preflight checks failed, see the log above")]
    Preflight,
}

/// Compiler family used for the simulation build
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compiler {
    Gnu,
    Intel,
}

impl Compiler {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gnu => "gnu",
            Self::Intel => "intel",
        }
    }

    /// value of `COMP` in the makefile
    pub fn makefile_id(&self) -> &'static str {
        match self {
            Self::Gnu => "gcc",
            Self::Intel => "intel",
        }
    }

    fn module_swap(&self) -> &'static str {
        match self {
            Self::Gnu => "module unload PrgEnv-intel;module load PrgEnv-gnu;",
            Self::Intel => "module unload PrgEnv-gnu;module load PrgEnv-intel;",
        }
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target instruction set of the compute nodes
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Architecture {
    /// Haswell nodes
    Cpu,
    /// Knights Landing nodes
    Knl,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Knl => "knl",
        }
    }

    /// fragment of the executable name produced by the build
    pub fn executable_fragment(&self) -> &'static str {
        match self {
            Self::Cpu => "haswell",
            Self::Knl => "mic-knl",
        }
    }

    /// value of the `-C` batch directive
    pub fn constraint(&self) -> &'static str {
        match self {
            Self::Cpu => "haswell",
            Self::Knl => "knl",
        }
    }

    fn module_swap(&self) -> &'static str {
        match self {
            Self::Cpu => "module unload craype-mic-knl;module load craype-haswell;",
            Self::Knl => "module unload craype-haswell;module load craype-mic-knl;",
        }
    }

    fn cores_per_node(&self) -> u32 {
        match self {
            Self::Cpu => 32,
            Self::Knl => 68,
        }
    }

    fn hardware_threads(&self) -> u32 {
        match self {
            Self::Cpu => 2,
            Self::Knl => 4,
        }
    }

    /// logical cores handed to each MPI process (`srun -c`), following the
    /// affinity recommendations of the cluster
    pub fn cpu_binding(&self, processes_per_node: u32) -> u32 {
        (self.cores_per_node() / processes_per_node.max(1)) * self.hardware_threads()
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment and naming derived from a compiler/architecture pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub compiler: Compiler,
    pub architecture: Architecture,
    /// shell prefix loading the matching modules, every command ends with `;`
    pub module_load: String,
    /// file name of the simulation executable in the bin directory
    pub executable: String,
}

impl Toolchain {
    pub fn resolve(compiler: Compiler, architecture: Architecture) -> Self {
        let module_load = [
            MODULE_PRELUDE,
            compiler.module_swap(),
            architecture.module_swap(),
        ]
        .concat();

        Self {
            compiler,
            architecture,
            module_load,
            executable: format!(
                "perf_tests3d.{}.{}.TPROF.MPI.OMP.ex",
                compiler.as_str(),
                architecture.executable_fragment()
            ),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PerfTestConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub paths: PathConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

/// Scheduler directives shared by all batch scripts
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub account: String,
    pub partition: String,
    pub qos: String,
    // wall-clock limit of a single benchmark job
    pub walltime: String,
    // wall-clock limit of the gate job reading the results
    pub read_walltime: String,
    pub mail_type: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            account: "m2852".to_owned(),
            partition: "regular".to_owned(),
            qos: "normal".to_owned(),
            walltime: "01:00:00".to_owned(),
            read_walltime: "00:05:00".to_owned(),
            mail_type: "end".to_owned(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    // directory holding the input files, the makefile and the performance log
    pub source_dir: PathBuf,
    // relative paths below are resolved against source_dir
    pub bin_dir: PathBuf,
    pub makefile: PathBuf,
    pub log_file: PathBuf,
    pub job_log: PathBuf,
    // directory below $SCRATCH holding one run directory per case
    pub results_subdir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            bin_dir: PathBuf::from("Bin"),
            makefile: PathBuf::from("GNUmakefile_perftest"),
            log_file: PathBuf::from("performance_log.txt"),
            job_log: PathBuf::from("log_jobids_tmp.txt"),
            results_subdir: PathBuf::from("performance_warpx"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub jobs: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { jobs: 8 }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    // profiler region wrapping the main simulation loop
    pub loop_marker: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            loop_marker: "WarpX::Evolve()".to_owned(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    pub remote: String,
    pub branch: String,
    pub message: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_owned(),
            branch: "performance_tests".to_owned(),
            message: "performance tests".to_owned(),
        }
    }
}

/// Absolute locations of everything the runner reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub source_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub makefile: PathBuf,
    pub log_file: PathBuf,
    pub job_log: PathBuf,
    pub results_dir: PathBuf,
}

impl Workspace {
    /// run directory of the case at `index` in the test list
    pub fn run_dir(&self, index: usize) -> PathBuf {
        self.results_dir.join(format!("perftest{index}"))
    }

    pub fn input(&self, case: &BenchmarkCase) -> PathBuf {
        self.source_dir.join(&case.input)
    }

    pub fn executable(&self, toolchain: &Toolchain) -> PathBuf {
        self.bin_dir.join(&toolchain.executable)
    }
}

/// primitive way to retrieve the scratch space from the environment
pub fn scratch_from_env() -> Option<OsString> {
    env::var_os(SCRATCH_ENV).filter(|value| !value.is_empty())
}

impl PerfTestConfig {
    /// load the config file if one was given, otherwise fall back to the defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .map_err(|error| ConfigErrors::ReadConfig(path.to_path_buf(), error))?;
                debug!(path = ?path, "Loaded config file");

                Self::parse(&text)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// resolve all configured paths against `cwd` and the scratch space
    pub fn workspace(
        &self,
        scratch: Option<OsString>,
        cwd: &Path,
    ) -> Result<Workspace, ConfigErrors> {
        let scratch = PathBuf::from(scratch.ok_or(ConfigErrors::MissingScratch)?);
        let source_dir = cwd.join(&self.paths.source_dir);

        Ok(Workspace {
            bin_dir: source_dir.join(&self.paths.bin_dir),
            makefile: source_dir.join(&self.paths.makefile),
            log_file: source_dir.join(&self.paths.log_file),
            job_log: source_dir.join(&self.paths.job_log),
            results_dir: scratch.join(&self.paths.results_subdir),
            source_dir,
        })
    }

    /// attempt to catch all errors instead of piece-by-piece to make debugging easier for users
    pub fn preflight_checks(
        &self,
        plan: &BenchmarkPlan,
        expect_executable: bool,
    ) -> Result<(), ConfigErrors> {
        let mut contains_error = false;

        if plan.cases.is_empty() {
            error!("The test list is empty, there is nothing to benchmark");
            contains_error = true;
        }

        for (key, value) in [
            ("cluster.account", &self.cluster.account),
            ("cluster.partition", &self.cluster.partition),
            ("cluster.qos", &self.cluster.qos),
            ("cluster.walltime", &self.cluster.walltime),
            ("cluster.read_walltime", &self.cluster.read_walltime),
        ] {
            if value.trim().is_empty() {
                error!("{key} must not be empty");
                contains_error = true;
            }
        }

        if self.build.jobs == 0 {
            warn!("build.jobs is 0, make will run without a job limit");
        }

        if self.profiler.loop_marker.trim().is_empty() {
            error!("profiler.loop_marker must name the profiled main loop");
            contains_error = true;
        }

        for case in plan.cases.iter() {
            let input = plan.workspace.input(case);

            if !input.is_file() {
                error!(
                    "Input file of {} not found at {}",
                    case.input,
                    input.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if expect_executable {
            let executable = plan.workspace.executable(&plan.toolchain);

            match check_executable(&executable) {
                Ok(true) => {}
                Ok(false) => {
                    // staging marks the copy as executable anyway
                    warn!(
                        "{} is not executable, the staged copies will be",
                        executable.to_string_lossy()
                    );
                }
                Err(e) => {
                    error!(
                        "Failed to find the executable {}: {e}",
                        executable.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        if contains_error {
            Err(ConfigErrors::Preflight)
        } else {
            Ok(())
        }
    }
}
