use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracecov_core::diagnostics::write_diagnostics_log;
use tracecov_core::services::pipeline::write_report;

use crate::percent;

/// Write the lcov tracefile and the diagnostics log.
pub fn report_command(workspace: &str, json: &str, info: &str, diagnostics: &str) -> Result<()> {
    // Kept unresolved so SF paths follow the workspace as the user named it.
    let workspace = PathBuf::from(workspace);
    if !workspace.is_dir() {
        anyhow::bail!("Workspace {} is not a directory", workspace.display());
    }
    let summary = write_report(Path::new(json), &workspace, Path::new(info))
        .with_context(|| format!("Failed to generate report from {json}"))?;

    let mut log = Vec::new();
    write_diagnostics_log(&mut log, &chrono::Local::now().to_rfc3339(), &summary.diagnostics)
        .context("Failed to format diagnostics")?;
    fs::write(diagnostics, log)
        .with_context(|| format!("Failed to write diagnostics log: {diagnostics}"))?;

    let total = summary.totals();
    println!("Wrote {info} ({} file(s), {} skipped)", summary.files.len(), summary.skipped.len());
    println!(
        "  Functions: {}/{} ({})",
        total.functions_hit,
        total.functions_found,
        percent(total.functions_hit, total.functions_found)
    );
    println!(
        "  Lines:     {}/{} ({})",
        total.lines_hit,
        total.lines_found,
        percent(total.lines_hit, total.lines_found)
    );
    println!(
        "  Branches:  {}/{} ({})",
        total.branches_hit,
        total.branches_found,
        percent(total.branches_hit, total.branches_found)
    );
    if !summary.diagnostics.is_empty() {
        println!("{} diagnostic(s) written to {diagnostics}", summary.diagnostics.len());
    }
    Ok(())
}
