use crate::config::{Architecture, Compiler};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Run performance tests and write results in files
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// rebuild the executable before submitting the tests
    #[arg(long, overrides_with = "no_recompile")]
    pub recompile: bool,

    /// use the executable found in the bin directory
    #[arg(long, overrides_with = "recompile")]
    pub no_recompile: bool,

    /// which compiler to use
    #[arg(long, value_enum, default_value_t = Compiler::Gnu)]
    pub compiler: Compiler,

    /// which architecture to cross-compile for
    #[arg(long, value_enum, default_value_t = Architecture::Cpu)]
    pub architecture: Architecture,

    /// whether to run the tests or read their performance output, run submits a job calling read
    #[arg(long, value_enum, default_value_t = Mode::Run)]
    pub mode: Mode,

    /// submit every test as a batch job or run them inside the current allocation
    #[arg(long, value_enum, default_value_t = Launch::Batch)]
    pub launch: Launch,

    /// YAML file overriding cluster, path and publishing settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// log debug output, PERFTEST_LOG takes precedence
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn recompile(&self) -> bool {
        self.recompile && !self.no_recompile
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Run,
    Read,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Launch {
    Batch,
    Interactive,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let args = Args::parse_from(["perftest-runner"]);

        assert!(!args.recompile());
        assert_eq!(args.compiler, Compiler::Gnu);
        assert_eq!(args.architecture, Architecture::Cpu);
        assert_eq!(args.mode, Mode::Run);
        assert_eq!(args.launch, Launch::Batch);
    }

    #[test]
    fn gate_invocation_parses() {
        let args = Args::parse_from([
            "perftest-runner",
            "--no-recompile",
            "--compiler=intel",
            "--architecture=knl",
            "--mode=read",
            "--config=/home/user/perftests.yaml",
        ]);

        assert!(!args.recompile());
        assert_eq!(args.compiler, Compiler::Intel);
        assert_eq!(args.architecture, Architecture::Knl);
        assert_eq!(args.mode, Mode::Read);
        assert_eq!(args.config, Some(PathBuf::from("/home/user/perftests.yaml")));
    }

    #[test]
    fn last_recompile_flag_wins() {
        assert!(Args::parse_from(["perftest-runner", "--no-recompile", "--recompile"]).recompile());
        assert!(!Args::parse_from(["perftest-runner", "--recompile", "--no-recompile"]).recompile());
    }

    #[test]
    fn unknown_compiler_is_rejected() {
        assert!(Args::try_parse_from(["perftest-runner", "--compiler=clang"]).is_err());
    }
}
