use crate::{
    args::Launch,
    config::ConfigErrors,
    executors::{Completion, ExecutorError, Executors, Shell},
    history::{HistoryError, PerfLog, PerformanceRecord},
    ingest::{Ingestor, IngestorError},
    plan::BenchmarkPlan,
    publish::GitPublisher,
    recompile::recompile,
};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Ingest(#[from] IngestorError),
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Options of the run mode
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub recompile: bool,
    pub launch: Launch,
}

/// optionally rebuild, then launch all cases
/// Interactive launches read their results right away, batch launches leave that to the gate job
#[instrument(skip(plan, shell), level = "info")]
pub fn run<S: Shell>(
    plan: &BenchmarkPlan,
    shell: &S,
    options: RunOptions,
    today: NaiveDate,
) -> Result<Completion, RunnerError> {
    if options.recompile {
        recompile(plan, shell)?;
    }

    plan.config.preflight_checks(plan, true)?;

    let completion = Executors::load(options.launch, plan, shell).execute()?;

    if completion == Completion::Finished {
        read(plan, shell, today)?;
    }

    Ok(completion)
}

/// harvest the results of every case into the performance log and publish it
#[instrument(skip(plan, shell), level = "info")]
pub fn read<S: Shell>(
    plan: &BenchmarkPlan,
    shell: &S,
    today: NaiveDate,
) -> Result<Vec<PerformanceRecord>, RunnerError> {
    plan.config.preflight_checks(plan, false)?;

    let ingestor = Ingestor::load(&plan.config.profiler)?;
    let log = PerfLog::open_or_create(&plan.workspace.log_file)?;
    let mut records = Vec::with_capacity(plan.cases.len());

    for context in plan.contexts() {
        info!("Reading {} from {}", context.case.job_name(), context.run_dir.display());

        let measurement = ingestor.ingest(&context)?;
        info!(
            steps = measurement.steps,
            "Initialization {} s, {} s per iteration",
            measurement.initialization,
            measurement.per_iteration
        );
        let record = PerformanceRecord::new(
            today,
            context.case,
            plan.toolchain.compiler,
            plan.toolchain.architecture,
            &measurement,
        );

        log.append(&record)?;
        records.push(record);
    }

    GitPublisher::new(&plan.config.publish, shell).publish(log.path())?;

    Ok(records)
}
