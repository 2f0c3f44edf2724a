mod args;
mod cases;
mod collector;
mod config;
mod executors;
mod history;
mod ingest;
mod logging;
mod plan;
mod publish;
mod recompile;
mod workflow;

use crate::{
    args::{Args, Mode},
    config::{scratch_from_env, ConfigErrors, PerfTestConfig, Toolchain},
    executors::{Completion, SystemShell},
    plan::BenchmarkPlan,
    workflow::{RunOptions, RunnerError},
};
use clap::Parser;
use std::{env, process::ExitCode};
use tracing::{error, info};

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match try_main(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "{error}");

            ExitCode::FAILURE
        }
    }
}

fn try_main(args: Args) -> Result<(), RunnerError> {
    let cwd = env::current_dir().map_err(ConfigErrors::Environment)?;
    // the gate job runs from its own working directory
    let config_file = args.config.as_ref().map(|path| cwd.join(path));
    let config = PerfTestConfig::load(config_file.as_deref())?;
    let workspace = config.workspace(scratch_from_env(), &cwd)?;
    let program = env::current_exe().map_err(ConfigErrors::Environment)?;

    let plan = BenchmarkPlan {
        toolchain: Toolchain::resolve(args.compiler, args.architecture),
        cases: cases::test_list(),
        config,
        workspace,
        program,
        config_file,
        invocation_dir: cwd,
    };
    let shell = SystemShell;
    let today = chrono::Local::now().date_naive();

    match args.mode {
        Mode::Run => {
            let options = RunOptions {
                recompile: args.recompile(),
                launch: args.launch,
            };

            match workflow::run(&plan, &shell, options, today)? {
                Completion::Deferred { gate } => {
                    info!(gate = %gate, "Read job queued, results are published once it ran")
                }
                Completion::Finished => info!("All tests finished and were published"),
            }
        }
        Mode::Read => {
            let records = workflow::read(&plan, &shell, today)?;
            info!(
                "Wrote {} records to {}",
                records.len(),
                plan.workspace.log_file.display()
            );
        }
    }

    Ok(())
}
