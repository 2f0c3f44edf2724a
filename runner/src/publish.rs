use crate::{
    config::PublishConfig,
    executors::{quote, ExecutorError, Shell},
};
use std::path::Path;
use tracing::{info, instrument};

/// Commits the performance log and pushes it to the configured branch
#[derive(Debug)]
pub struct GitPublisher<'a, S: Shell> {
    config: &'a PublishConfig,
    shell: &'a S,
}

impl<'a, S: Shell> GitPublisher<'a, S> {
    pub fn new(config: &'a PublishConfig, shell: &'a S) -> Self {
        Self { config, shell }
    }

    /// `git add`, `git commit` and `git push` in the directory of the log, the first failing
    /// step stops the sequence
    #[instrument(skip(self), level = "info")]
    pub fn publish(&self, log: &Path) -> Result<(), ExecutorError> {
        let directory = log.parent().unwrap_or_else(|| Path::new("."));
        let file_name = log
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();

        let steps = [
            ("add", format!("git add {}", quote(&file_name))),
            (
                "commit",
                format!("git commit -m {}", quote(&self.config.message)),
            ),
            (
                "push",
                format!(
                    "git push -u {} {}",
                    quote(&self.config.remote),
                    quote(&self.config.branch)
                ),
            ),
        ];

        for (step, command) in steps {
            let output = self.shell.exec(&command, directory)?;

            if !output.success() {
                return Err(ExecutorError::Publish {
                    step,
                    status: output.describe_status(),
                    stderr: output.stderr,
                });
            }
        }

        info!(
            "Pushed {} to {}/{}",
            file_name, self.config.remote, self.config.branch
        );

        Ok(())
    }
}
