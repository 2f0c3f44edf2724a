use crate::executors::ExecutorError;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fmt, fs,
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

static SUBMITTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*Submitted batch job (?P<id>\S+)\s*$").expect("valid submission pattern")
});

/// Opaque job identifier assigned by Slurm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// extract the job id from the output of `sbatch`
    pub fn parse(output: &str) -> Option<Self> {
        output.lines().find_map(|line| {
            SUBMITTED
                .captures(line)
                .map(|captures| Self::new(&captures["id"]))
        })
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Start the dependent job only after all listed jobs finished successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency(Vec<JobId>);

impl Dependency {
    pub fn after_ok(jobs: Vec<JobId>) -> Self {
        Self(jobs)
    }

    pub fn jobs(&self) -> &[JobId] {
        &self.0
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "afterok:{}", self.0.iter().join(":"))
    }
}

/// File handoff of submission outputs from the dispatcher to the gate, one line per case
/// in dispatch order
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self) -> impl FnOnce(io::Error) -> ExecutorError + '_ {
        |source| ExecutorError::JobLog {
            path: self.path.clone(),
            source,
        }
    }

    /// drop the submissions of a previous invocation
    pub fn reset(&self) -> Result<(), ExecutorError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = ?self.path, "Removed previous submission log");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(self.error()(error)),
        }
    }

    pub fn append(&self, output: &str) -> Result<(), ExecutorError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(self.error())?;

        file.write_all(output.as_bytes()).map_err(self.error())?;
        if !output.ends_with('\n') {
            file.write_all(b"\n").map_err(self.error())?;
        }

        Ok(())
    }

    /// Read back the job ids of all `expected` cases
    /// Any line without a job id, or a different number of ids than cases, is an error since
    /// the dependency of the gate would silently skip a case otherwise
    pub fn collect(&self, expected: usize) -> Result<Dependency, ExecutorError> {
        let text = fs::read_to_string(&self.path).map_err(self.error())?;

        let jobs = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                JobId::parse(line).ok_or_else(|| ExecutorError::MalformedJobLine {
                    line: number + 1,
                    content: line.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if jobs.len() != expected {
            return Err(ExecutorError::JobLogMismatch {
                expected,
                found: jobs.len(),
            });
        }

        info!("Collected {} job ids for the gate dependency", jobs.len());

        Ok(Dependency::after_ok(jobs))
    }
}
