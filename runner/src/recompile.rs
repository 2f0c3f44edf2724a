use crate::{
    config::Compiler,
    executors::{quote, CommandOutput, ExecutorError, Shell},
    plan::BenchmarkPlan,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{borrow::Cow, fs};
use tracing::{info, instrument, warn};

static COMPILER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^COMP.*$").expect("valid compiler line pattern"));

/// point every `COMP` line of the makefile at `compiler`
pub fn select_compiler(makefile: &str, compiler: Compiler) -> Cow<'_, str> {
    COMPILER_LINE.replace_all(makefile, format!("COMP={}", compiler.makefile_id()))
}

/// Rewrite the makefile for the selected compiler and rebuild the executable from scratch
/// The makefile keeps the new compiler afterwards
#[instrument(skip_all, fields(compiler = %plan.toolchain.compiler), level = "info")]
pub fn recompile<S: Shell>(plan: &BenchmarkPlan, shell: &S) -> Result<CommandOutput, ExecutorError> {
    let makefile = &plan.workspace.makefile;
    let stage_error = |source| ExecutorError::Stage {
        path: makefile.clone(),
        source,
    };

    let text = fs::read_to_string(makefile).map_err(stage_error)?;
    let rewritten = select_compiler(&text, plan.toolchain.compiler);
    if !COMPILER_LINE.is_match(&text) {
        warn!(makefile = ?makefile, "Makefile has no COMP line, building with its default compiler");
    }
    fs::write(makefile, rewritten.as_bytes()).map_err(stage_error)?;

    let makefile_name = makefile
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    let command = format!(
        "{}rm -rf tmp_build_dir *.mod; make -j {} -f {}",
        plan.toolchain.module_load,
        plan.config.build.jobs,
        quote(&makefile_name)
    );

    info!("Rebuilding {}", plan.toolchain.executable);
    let output = shell.exec(&command, &plan.workspace.source_dir)?;

    if output.success() {
        info!("Build finished");
        Ok(output)
    } else {
        Err(ExecutorError::Build {
            status: output.describe_status(),
            stderr: output.stderr,
        })
    }
}
