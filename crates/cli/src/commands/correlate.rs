use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tracecov_core::config::load_run_config;
use tracecov_core::services::pipeline::correlate_with_toolchain;
use tracecov_core::services::toolchain::Toolchain;

use crate::canonicalize_or_current;

/// Run the correlation stage and write the intermediate document.
pub fn correlate_command(
    config_path: &str,
    local_workspace: Option<&str>,
    output: Option<&str>,
) -> Result<()> {
    let started = Instant::now();
    let config_file = PathBuf::from(config_path);
    let config = load_run_config(&config_file)
        .with_context(|| format!("Failed to load configuration {}", config_file.display()))?;

    let local = local_workspace.map(canonicalize_or_current).transpose()?;
    let toolchain = Toolchain::from_config(&config);
    let outcome = correlate_with_toolchain(&config, &toolchain, local.as_deref())
        .context("Correlation failed")?;

    let output_path = output.map(PathBuf::from).unwrap_or_else(|| config.output_file());
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output dir: {}", parent.display()))?;
    }
    outcome
        .model
        .save(&output_path)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    println!("Correlated {} binary(ies):", outcome.binaries.len());
    for binary in &outcome.binaries {
        println!(
            "  - {} [{}]: {}/{} blocks attributed, {} covered, {} traced addresses",
            binary.name,
            binary.binary_index,
            binary.attributed_blocks,
            binary.blocks,
            binary.covered_blocks,
            binary.traced_addresses
        );
        if binary.fallback_recorded + binary.fallback_unresolved > 0 {
            println!(
                "    functions without source lines: {} placed, {} unresolved",
                binary.fallback_recorded, binary.fallback_unresolved
            );
        }
    }
    println!("Source files: {}", outcome.model.source_files.len());
    println!("Output: {}", output_path.display());
    println!("Elapsed: {:.2}s", started.elapsed().as_secs_f64());
    Ok(())
}
