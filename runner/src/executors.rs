pub mod local;
pub mod slurm;

use crate::{
    args::Launch,
    collector::JobId,
    plan::{BenchmarkPlan, RunContext},
};
use std::{
    fs::{self, Permissions},
    io,
    os::unix::{fs::PermissionsExt, process::ExitStatusExt},
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};
use thiserror::Error;
use tracing::{debug, trace};

/// canonical name of the input file inside a run directory
pub const INPUT_NAME: &str = "inputs";
/// captured standard output of the simulation inside a run directory
pub const OUTPUT_NAME: &str = "perf_output.txt";

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to prepare {path}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Build failed ({status}): {stderr}")]
    Build { status: String, stderr: String },
    #[error("Submission of {job} failed ({status}): {stderr}")]
    Submission {
        job: String,
        status: String,
        stderr: String,
    },
    #[error("sbatch did not report a job id for {job}: {stdout:?}")]
    MissingJobId { job: String, stdout: String },
    #[error("Run of {job} failed ({status}): {stderr}")]
    Run {
        job: String,
        status: String,
        stderr: String,
    },
    #[error("Failed to access the submission log {path}")]
    JobLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Line {line} of the submission log holds no job id: {content:?}")]
    MalformedJobLine { line: usize, content: String },
    #[error("Submission log holds {found} job ids but {expected} cases were dispatched")]
    JobLogMismatch { expected: usize, found: usize },
    #[error("`git {step}` failed ({status}): {stderr}")]
    Publish {
        step: &'static str,
        status: String,
        stderr: String,
    },
}

/// Captured result of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// exit code, `None` if the process was terminated by a signal
    pub status: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn describe_status(&self) -> String {
        match (self.status, self.signal) {
            (Some(code), _) => format!("exited with code {code}"),
            (None, Some(signal)) => format!("terminated by signal {signal}"),
            (None, None) => "terminated by an unknown signal".to_owned(),
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code(),
            signal: output.status.signal(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Capability to run a shell command line in a directory
/// The outcome is returned as a value, deciding on a failure is up to the caller
pub trait Shell {
    fn exec(&self, command: &str, cwd: &Path) -> Result<CommandOutput, ExecutorError>;
}

/// Runs commands through `bash -c`, so the `module` function of the login environment is
/// available
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShell;

impl Shell for SystemShell {
    fn exec(&self, command: &str, cwd: &Path) -> Result<CommandOutput, ExecutorError> {
        debug!(cwd = ?cwd, "Running `{command}`");

        let output: CommandOutput = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecutorError::Spawn {
                command: command.to_owned(),
                source,
            })?
            .into();

        debug!("`{command}` {}", output.describe_status());
        trace!(stdout = output.stdout, stderr = output.stderr, "Captured output");

        Ok(output)
    }
}

/// quote a single word for `bash -c`
pub fn quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c))
    {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Result of launching all cases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// results are read by the gate job once all benchmark jobs succeeded
    Deferred { gate: JobId },
    /// all cases ran in the foreground, results can be read right away
    Finished,
}

#[derive(Debug)]
pub enum Executors<'a, S: Shell> {
    Slurm(slurm::SlurmExecutor<'a, S>),
    Local(local::LocalExecutor<'a, S>),
}

impl<'a, S: Shell> Executors<'a, S> {
    pub fn load(launch: Launch, plan: &'a BenchmarkPlan, shell: &'a S) -> Self {
        match launch {
            Launch::Batch => Self::Slurm(slurm::SlurmExecutor::new(plan, shell)),
            Launch::Interactive => Self::Local(local::LocalExecutor::new(plan, shell)),
        }
    }

    pub fn execute(&self) -> Result<Completion, ExecutorError> {
        match self {
            Self::Slurm(executor) => executor.execute(),
            Self::Local(executor) => executor.execute(),
        }
    }
}

/// recreate the run directory of a case with a fresh copy of the executable and the input
pub fn stage(plan: &BenchmarkPlan, context: &RunContext) -> Result<(), ExecutorError> {
    let stage_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ExecutorError::Stage { path, source }
    };
    let run_dir = &context.run_dir;

    if run_dir.exists() {
        fs::remove_dir_all(run_dir).map_err(stage_error(run_dir))?;
    }
    fs::create_dir_all(run_dir).map_err(stage_error(run_dir))?;

    let executable = run_dir.join(&plan.toolchain.executable);
    fs::copy(plan.executable(), &executable).map_err(stage_error(&plan.executable()))?;
    fs::copy(&context.input, run_dir.join(INPUT_NAME)).map_err(stage_error(&context.input))?;
    fs::set_permissions(&executable, Permissions::from_mode(0o700))
        .map_err(stage_error(&executable))?;

    debug!(run_dir = ?run_dir, "Staged {}", context.case.input);

    Ok(())
}

/// parallel launch of the executable inside its run directory
pub fn launch_command(plan: &BenchmarkPlan, context: &RunContext) -> String {
    let case = context.case;

    format!(
        "srun --cpu_bind=cores -n {} -c {} ./{} {INPUT_NAME} > {OUTPUT_NAME}",
        case.total_processes(),
        plan.toolchain.architecture.cpu_binding(case.processes),
        plan.toolchain.executable,
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{CommandOutput, ExecutorError, Shell};
    use crate::{
        cases::BenchmarkCase,
        config::{Architecture, Compiler, PerfTestConfig, Toolchain},
        plan::BenchmarkPlan,
    };
    use std::{
        cell::RefCell,
        fs,
        path::{Path, PathBuf},
    };
    use tempfile::TempDir;

    type Responder = Box<dyn Fn(&str, usize) -> CommandOutput>;

    /// Shell double recording every command, answers are produced from the command and
    /// the number of previous calls
    pub struct RecordingShell {
        calls: RefCell<Vec<(String, PathBuf)>>,
        respond: Responder,
    }

    impl RecordingShell {
        pub fn new(respond: impl Fn(&str, usize) -> CommandOutput + 'static) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        /// every command succeeds, `sbatch` reports a job id derived from the call number
        pub fn succeeding() -> Self {
            Self::new(|command, call| {
                if command.contains("sbatch") {
                    ok(&format!("Submitted batch job {}\n", 4200 + call))
                } else {
                    ok("")
                }
            })
        }

        pub fn commands(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|(command, _)| command.clone())
                .collect()
        }

        pub fn directories(&self) -> Vec<PathBuf> {
            self.calls.borrow().iter().map(|(_, cwd)| cwd.clone()).collect()
        }
    }

    impl Shell for RecordingShell {
        fn exec(&self, command: &str, cwd: &Path) -> Result<CommandOutput, ExecutorError> {
            let call = self.calls.borrow().len();
            self.calls
                .borrow_mut()
                .push((command.to_owned(), cwd.to_path_buf()));

            Ok((self.respond)(command, call))
        }
    }

    impl std::fmt::Debug for RecordingShell {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RecordingShell")
                .field("calls", &self.calls)
                .finish()
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            status: Some(0),
            stdout: stdout.to_owned(),
            ..CommandOutput::default()
        }
    }

    pub fn failed(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            status: Some(code),
            stderr: stderr.to_owned(),
            ..CommandOutput::default()
        }
    }

    pub const INPUT_TEXT: &str = "# uniform plasma\namr.n_cell = 64 64 64\nmax_step = 10\n";

    /// source and scratch directories populated with an executable and one input file
    pub struct Fixture {
        pub source: TempDir,
        pub scratch: TempDir,
        pub plan: BenchmarkPlan,
    }

    impl Fixture {
        pub fn new(cases: Vec<BenchmarkCase>) -> Self {
            Self::with_toolchain(cases, Compiler::Gnu, Architecture::Cpu)
        }

        pub fn with_toolchain(
            cases: Vec<BenchmarkCase>,
            compiler: Compiler,
            architecture: Architecture,
        ) -> Self {
            let source = TempDir::new().unwrap();
            let scratch = TempDir::new().unwrap();
            let config = PerfTestConfig::default();
            let workspace = config
                .workspace(Some(scratch.path().into()), source.path())
                .unwrap();
            let toolchain = Toolchain::resolve(compiler, architecture);

            fs::create_dir_all(&workspace.bin_dir).unwrap();
            fs::write(
                workspace.executable(&toolchain),
                "#!/bin/sh\necho simulation\n",
            )
            .unwrap();
            for case in cases.iter() {
                fs::write(workspace.input(case), INPUT_TEXT).unwrap();
            }

            Self {
                plan: BenchmarkPlan {
                    config,
                    workspace,
                    toolchain,
                    cases,
                    program: PathBuf::from("/opt/perftests/bin/perftest-runner"),
                    config_file: None,
                    invocation_dir: source.path().to_path_buf(),
                },
                source,
                scratch,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::Fixture, *};
    use crate::cases::BenchmarkCase;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn stage_recreates_run_directory() {
        let fixture = Fixture::new(vec![BenchmarkCase::new("uniform_plasma", 1, 8, 16)]);
        let context = fixture.plan.contexts().next().unwrap();

        fs::create_dir_all(&context.run_dir).unwrap();
        fs::write(context.run_dir.join(OUTPUT_NAME), "stale").unwrap();

        stage(&fixture.plan, &context).unwrap();

        let executable = context.run_dir.join(&fixture.plan.toolchain.executable);
        assert!(!context.run_dir.join(OUTPUT_NAME).exists());
        assert_eq!(
            fs::read_to_string(context.run_dir.join(INPUT_NAME)).unwrap(),
            testing::INPUT_TEXT
        );
        assert_eq!(fs::metadata(executable).unwrap().mode() & 0o777, 0o700);
    }

    #[test]
    fn stage_reports_missing_executable() {
        let fixture = Fixture::new(vec![BenchmarkCase::new("uniform_plasma", 1, 8, 16)]);
        fs::remove_file(fixture.plan.executable()).unwrap();
        let context = fixture.plan.contexts().next().unwrap();

        assert!(matches!(
            stage(&fixture.plan, &context),
            Err(ExecutorError::Stage { path, .. }) if path == fixture.plan.executable()
        ));
    }

    #[test]
    fn launch_command_binds_cores() {
        let fixture = Fixture::new(vec![BenchmarkCase::new("uniform_plasma", 2, 4, 32)]);
        let context = fixture.plan.contexts().next().unwrap();

        assert_eq!(
            launch_command(&fixture.plan, &context),
            "srun --cpu_bind=cores -n 8 -c 16 ./perf_tests3d.gnu.haswell.TPROF.MPI.OMP.ex inputs > perf_output.txt"
        );
    }

    #[test]
    fn quote_only_when_needed() {
        assert_eq!(quote("performance_log.txt"), "performance_log.txt");
        assert_eq!(quote("performance tests"), "'performance tests'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn describe_status() {
        assert_eq!(testing::failed(2, "").describe_status(), "exited with code 2");
        let killed = CommandOutput {
            signal: Some(9),
            ..CommandOutput::default()
        };
        assert!(!killed.success());
        assert_eq!(killed.describe_status(), "terminated by signal 9");
    }
}
