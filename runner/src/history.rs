use crate::{
    cases::BenchmarkCase,
    config::{Architecture, Compiler},
    ingest::Measurement,
};
use chrono::NaiveDate;
use std::{
    fmt,
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

/// column header of the performance log
pub const HEADER: &str = "## year month day run_name compiler architecture n_node n_mpi n_omp time_initialization(s) time_one_iteration(s)";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to write performance log {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One line of the performance log
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRecord {
    pub date: NaiveDate,
    pub name: String,
    pub compiler: Compiler,
    pub architecture: Architecture,
    pub nodes: u32,
    pub processes: u32,
    pub threads: u32,
    pub initialization: f64,
    pub per_iteration: f64,
}

impl PerformanceRecord {
    pub fn new(
        date: NaiveDate,
        case: &BenchmarkCase,
        compiler: Compiler,
        architecture: Architecture,
        measurement: &Measurement,
    ) -> Self {
        Self {
            date,
            name: case.input.clone(),
            compiler,
            architecture,
            nodes: case.nodes,
            processes: case.processes,
            threads: case.threads,
            initialization: measurement.initialization,
            per_iteration: measurement.per_iteration,
        }
    }
}

impl fmt::Display for PerformanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            self.date.format("%Y %m %d"),
            self.name,
            self.compiler,
            self.architecture,
            self.nodes,
            self.processes,
            self.threads,
            self.initialization,
            self.per_iteration
        )
    }
}

/// Append-only performance log
/// Records are never rewritten or deduplicated, concurrent writers are not guarded against
#[derive(Debug, Clone)]
pub struct PerfLog {
    path: PathBuf,
}

impl PerfLog {
    /// open the log, creating it with the column header if it does not exist yet
    pub fn open_or_create(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let log = Self { path: path.into() };

        if !log.path.is_file() {
            log.write_line(HEADER)?;
            info!(path = ?log.path, "Created performance log");
        }

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &PerformanceRecord) -> Result<(), HistoryError> {
        let line = record.to_string();
        self.write_line(&line)?;
        debug!("Appended `{line}`");

        Ok(())
    }

    fn write_line(&self, line: &str) -> Result<(), HistoryError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"))
            .map_err(|source| HistoryError::Write {
                path: self.path.clone(),
                source,
            })
    }
}
