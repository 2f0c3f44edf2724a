use super::{launch_command, quote, stage, Completion, ExecutorError, Shell};
use crate::{
    collector::{Dependency, JobId, JobLog},
    plan::{BenchmarkPlan, RunContext},
};
use std::fmt::Write as _;
use tracing::{debug, error, info, instrument, warn};

/// file name of the batch script inside a run directory
pub const BATCH_SCRIPT: &str = "slurm";
/// file name of the gate script inside the source directory
pub const GATE_SCRIPT: &str = "slurm_perfread";
pub const GATE_JOB_NAME: &str = "perftests_read";

/// Submits one batch job per case, then a gate job reading the results once all of them
/// succeeded
#[derive(Debug)]
pub struct SlurmExecutor<'a, S: Shell> {
    plan: &'a BenchmarkPlan,
    shell: &'a S,
    job_log: JobLog,
}

/// batch script running a single case inside its run directory
pub fn render_job_script(plan: &BenchmarkPlan, context: &RunContext) -> String {
    let cluster = &plan.config.cluster;
    let case = context.case;
    let mut script = String::with_capacity(512);

    let _ = writeln!(script, "#!/bin/bash");
    let _ = writeln!(script, "#SBATCH --job-name={}", case.job_name());
    let _ = writeln!(script, "#SBATCH --time={}", cluster.walltime);
    let _ = writeln!(
        script,
        "#SBATCH -C {}",
        plan.toolchain.architecture.constraint()
    );
    let _ = writeln!(script, "#SBATCH -N {}", case.nodes);
    let _ = writeln!(script, "#SBATCH --partition={}", cluster.partition);
    let _ = writeln!(script, "#SBATCH --qos={}", cluster.qos);
    let _ = writeln!(script, "#SBATCH -e error.txt");
    let _ = writeln!(script, "#SBATCH --account={}", cluster.account);
    let _ = writeln!(script, "export OMP_NUM_THREADS={}", case.threads);
    let _ = writeln!(script, "{}", launch_command(plan, context));

    script
}

/// batch script re-invoking this program in read mode
pub fn render_gate_script(plan: &BenchmarkPlan) -> String {
    let cluster = &plan.config.cluster;
    let mut script = String::with_capacity(512);

    let _ = writeln!(script, "#!/bin/bash");
    let _ = writeln!(script, "#SBATCH --job-name={GATE_JOB_NAME}");
    let _ = writeln!(script, "#SBATCH --time={}", cluster.read_walltime);
    let _ = writeln!(
        script,
        "#SBATCH -C {}",
        plan.toolchain.architecture.constraint()
    );
    let _ = writeln!(script, "#SBATCH -N 1");
    let _ = writeln!(script, "#SBATCH --partition={}", cluster.partition);
    let _ = writeln!(script, "#SBATCH --qos={}", cluster.qos);
    let _ = writeln!(script, "#SBATCH -e read_error.txt");
    let _ = writeln!(script, "#SBATCH -o read_output.txt");
    let _ = writeln!(script, "#SBATCH --mail-type={}", cluster.mail_type);
    let _ = writeln!(script, "#SBATCH --account={}", cluster.account);
    // read mode resolves the configured paths against its working directory
    let _ = writeln!(
        script,
        "cd {}",
        quote(&plan.invocation_dir.to_string_lossy())
    );

    let _ = write!(
        script,
        "{} --no-recompile --compiler={} --architecture={} --mode=read",
        quote(&plan.program.to_string_lossy()),
        plan.toolchain.compiler,
        plan.toolchain.architecture,
    );
    if let Some(ref config_file) = plan.config_file {
        let _ = write!(script, " --config={}", quote(&config_file.to_string_lossy()));
    }
    let _ = writeln!(script);

    script
}

impl<'a, S: Shell> SlurmExecutor<'a, S> {
    pub fn new(plan: &'a BenchmarkPlan, shell: &'a S) -> Self {
        Self {
            plan,
            shell,
            job_log: JobLog::new(&plan.workspace.job_log),
        }
    }

    #[instrument(skip(self), level = "info")]
    pub fn execute(&self) -> Result<Completion, ExecutorError> {
        let jobs = self.dispatch()?;
        info!("Submitted {} benchmark jobs", jobs.len());

        let gate = self.submit_gate()?;
        info!(gate = %gate, "Results will be read once all benchmark jobs succeeded");

        Ok(Completion::Deferred { gate })
    }

    /// stage and submit every case in test list order
    /// The first failing submission aborts the loop, jobs submitted before are left queued
    pub fn dispatch(&self) -> Result<Vec<JobId>, ExecutorError> {
        self.job_log.reset()?;

        let mut jobs = Vec::with_capacity(self.plan.cases.len());

        for context in self.plan.contexts() {
            info!(
                "Dispatching {} ({}/{})",
                context.case.job_name(),
                context.index + 1,
                self.plan.cases.len()
            );

            match self.submit_case(&context) {
                Ok(job) => jobs.push(job),
                Err(error) => {
                    if !jobs.is_empty() {
                        warn!(
                            jobs = ?jobs,
                            "Aborting dispatch, already submitted jobs stay queued"
                        );
                    }

                    return Err(error);
                }
            }
        }

        Ok(jobs)
    }

    fn submit_case(&self, context: &RunContext) -> Result<JobId, ExecutorError> {
        stage(self.plan, context)?;

        let script_path = context.run_dir.join(BATCH_SCRIPT);
        std::fs::write(&script_path, render_job_script(self.plan, context)).map_err(|source| {
            ExecutorError::Stage {
                path: script_path.clone(),
                source,
            }
        })?;

        let job = context.case.job_name();
        let output = self.shell.exec(
            &format!("{}sbatch {BATCH_SCRIPT}", self.plan.toolchain.module_load),
            &context.run_dir,
        )?;

        if !output.success() {
            error!(job = job, stderr = output.stderr, "sbatch {}", output.describe_status());

            return Err(ExecutorError::Submission {
                job,
                status: output.describe_status(),
                stderr: output.stderr,
            });
        }

        let id = JobId::parse(&output.stdout).ok_or_else(|| ExecutorError::MissingJobId {
            job: job.clone(),
            stdout: output.stdout.clone(),
        })?;
        // sbatch may print notes around the submission line
        self.job_log.append(&format!("Submitted batch job {id}"))?;

        debug!(job = job, id = %id, "Submitted");

        Ok(id)
    }

    /// submit the read job, depending on every job recorded in the submission log
    pub fn submit_gate(&self) -> Result<JobId, ExecutorError> {
        let dependency: Dependency = self.job_log.collect(self.plan.cases.len())?;
        debug!(
            log = ?self.job_log.path(),
            "Gate depends on {} jobs",
            dependency.jobs().len()
        );
        let source_dir = &self.plan.workspace.source_dir;
        let script_path = source_dir.join(GATE_SCRIPT);

        std::fs::write(&script_path, render_gate_script(self.plan))
            .and_then(|()| {
                use std::os::unix::fs::PermissionsExt;

                std::fs::set_permissions(
                    &script_path,
                    std::fs::Permissions::from_mode(0o700),
                )
            })
            .map_err(|source| ExecutorError::Stage {
                path: script_path.clone(),
                source,
            })?;

        let output = self.shell.exec(
            &format!("sbatch --dependency {dependency} {GATE_SCRIPT}"),
            source_dir,
        )?;

        if !output.success() {
            return Err(ExecutorError::Submission {
                job: GATE_JOB_NAME.to_owned(),
                status: output.describe_status(),
                stderr: output.stderr,
            });
        }

        JobId::parse(&output.stdout).ok_or(ExecutorError::MissingJobId {
            job: GATE_JOB_NAME.to_owned(),
            stdout: output.stdout,
        })
    }
}
