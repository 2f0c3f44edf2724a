pub mod inputs;
pub mod profiler;

use crate::{config::ProfilerConfig, executors::OUTPUT_NAME, plan::RunContext};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, instrument};

/// A field that could not be extracted from a fixed-format text
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{field} is not a valid number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("Failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: FieldError,
    },
    #[error("Invalid loop marker")]
    LoopMarker(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// container for the profiler timings of a single run, in seconds
pub struct RunTimings {
    /// total time of the run, averaged over processes
    pub total: f64,
    /// inclusive time of the main simulation loop, averaged over processes
    pub evolve: f64,
}

impl RunTimings {
    pub fn initialization(&self) -> f64 {
        self.total - self.evolve
    }

    pub fn per_iteration(&self, steps: u64) -> f64 {
        self.evolve / steps as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// performance of a single case, as written to the performance log
pub struct Measurement {
    pub steps: u64,
    pub initialization: f64,
    pub per_iteration: f64,
}

impl Measurement {
    pub fn new(timings: RunTimings, steps: u64) -> Self {
        Self {
            steps,
            initialization: timings.initialization(),
            per_iteration: timings.per_iteration(steps),
        }
    }
}

/// Extracts measurements from the input and output files of a finished run
#[derive(Debug, Clone)]
pub struct Ingestor {
    format: profiler::ProfilerFormat,
}

fn read(path: &Path) -> Result<String, IngestorError> {
    fs::read_to_string(path).map_err(|source| IngestorError::Read {
        path: path.to_path_buf(),
        source,
    })
}

impl Ingestor {
    pub fn load(config: &ProfilerConfig) -> Result<Self, IngestorError> {
        Ok(Self {
            format: profiler::ProfilerFormat::new(&config.loop_marker)?,
        })
    }

    #[instrument(level = "debug", skip(self, context), fields(run_dir = ?context.run_dir))]
    pub fn ingest(&self, context: &RunContext) -> Result<Measurement, IngestorError> {
        let steps = inputs::max_step(&read(&context.input)?).map_err(|source| {
            IngestorError::Parse {
                path: context.input.clone(),
                source,
            }
        })?;

        let output_path = context.run_dir.join(OUTPUT_NAME);
        let timings = self
            .format
            .timings(&read(&output_path)?)
            .map_err(|source| IngestorError::Parse {
                path: output_path,
                source,
            })?;

        debug!(steps = steps, timings = ?timings, "Ingested run");

        Ok(Measurement::new(timings, steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cases::BenchmarkCase,
        executors::testing::{Fixture, INPUT_TEXT},
    };

    #[test]
    fn initialization_and_iteration_times() {
        let timings = RunTimings {
            total: 12.5,
            evolve: 10.0,
        };
        let measurement = Measurement::new(timings, 500);

        assert_eq!(measurement.initialization, 2.5);
        assert_eq!(measurement.per_iteration, 0.02);
    }

    #[test]
    fn ingest_run_directory() {
        let fixture = Fixture::new(vec![BenchmarkCase::new("uniform_plasma", 1, 8, 16)]);
        let context = fixture.plan.contexts().next().unwrap();
        fs::create_dir_all(&context.run_dir).unwrap();
        fs::write(
            context.run_dir.join(OUTPUT_NAME),
            profiler::tests::SAMPLE_OUTPUT,
        )
        .unwrap();
        assert!(INPUT_TEXT.contains("max_step = 10"));

        let ingestor = Ingestor::load(&ProfilerConfig::default()).unwrap();
        let measurement = ingestor.ingest(&context).unwrap();

        assert_eq!(measurement.steps, 10);
        assert!((measurement.initialization - 0.5).abs() < 1e-9);
        assert!((measurement.per_iteration - 1.2).abs() < 1e-9);
    }

    #[test]
    fn missing_output_is_a_read_error() {
        let fixture = Fixture::new(vec![BenchmarkCase::new("uniform_plasma", 1, 8, 16)]);
        let context = fixture.plan.contexts().next().unwrap();
        let ingestor = Ingestor::load(&ProfilerConfig::default()).unwrap();

        assert!(matches!(
            ingestor.ingest(&context),
            Err(IngestorError::Read { path, .. }) if path.ends_with(OUTPUT_NAME)
        ));
    }

    #[test]
    fn truncated_output_names_the_missing_field() {
        let fixture = Fixture::new(vec![BenchmarkCase::new("uniform_plasma", 1, 8, 16)]);
        let context = fixture.plan.contexts().next().unwrap();
        fs::create_dir_all(&context.run_dir).unwrap();
        fs::write(
            context.run_dir.join(OUTPUT_NAME),
            "Initializing AMReX\nSTEP 1 starts ...\n",
        )
        .unwrap();
        let ingestor = Ingestor::load(&ProfilerConfig::default()).unwrap();

        assert!(matches!(
            ingestor.ingest(&context),
            Err(IngestorError::Parse {
                source: FieldError::NotFound("total time"),
                ..
            })
        ));
    }
}
