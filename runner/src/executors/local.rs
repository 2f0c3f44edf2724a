use super::{launch_command, stage, Completion, ExecutorError, Shell};
use crate::plan::BenchmarkPlan;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Executor running every case in the foreground, from within an interactive allocation
#[derive(Debug)]
pub struct LocalExecutor<'a, S: Shell> {
    plan: &'a BenchmarkPlan,
    shell: &'a S,
}

impl<'a, S: Shell> LocalExecutor<'a, S> {
    pub fn new(plan: &'a BenchmarkPlan, shell: &'a S) -> Self {
        Self { plan, shell }
    }

    /// execute cases one after another, the first failing run stops the loop
    #[instrument(skip(self), level = "info")]
    pub fn execute(&self) -> Result<Completion, ExecutorError> {
        let total = self.plan.cases.len();

        for context in self.plan.contexts() {
            stage(self.plan, &context)?;

            let job = context.case.job_name();
            let command = format!(
                "{}export OMP_NUM_THREADS={};{}",
                self.plan.toolchain.module_load,
                context.case.threads,
                launch_command(self.plan, &context)
            );

            let start = Instant::now();
            let output = self.shell.exec(&command, &context.run_dir)?;
            debug!(
                "{job} finished in {} ms | status: {}",
                start.elapsed().as_millis(),
                output.describe_status()
            );

            if !output.success() {
                return Err(ExecutorError::Run {
                    job,
                    status: output.describe_status(),
                    stderr: output.stderr,
                });
            }

            info!("Done with {}/{total}", context.index + 1);
        }

        Ok(Completion::Finished)
    }
}
