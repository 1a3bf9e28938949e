use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use tracecov_core::model::IntermediateCoverageModel;

use crate::percent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub file: String,
    pub functions_found: usize,
    pub functions_hit: usize,
    pub lines_found: usize,
    pub lines_hit: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelSummary {
    pub binaries: Vec<(String, u32)>,
    pub files: Vec<FileSummary>,
    pub total: FileSummary,
}

/// Function and line totals straight from the document, no sources needed.
pub fn summarize(model: &IntermediateCoverageModel) -> ModelSummary {
    let mut total = FileSummary { file: "total".to_string(), ..FileSummary::default() };
    let files: Vec<FileSummary> = model
        .source_files
        .iter()
        .map(|(path, cov)| {
            let file = FileSummary {
                file: path.clone(),
                functions_found: cov.functions.len(),
                functions_hit: cov.functions.values().filter(|f| f.covered).count(),
                lines_found: cov.lines.len(),
                lines_hit: cov.lines.values().filter(|l| l.covered).count(),
            };
            total.functions_found += file.functions_found;
            total.functions_hit += file.functions_hit;
            total.lines_found += file.lines_found;
            total.lines_hit += file.lines_hit;
            file
        })
        .collect();
    let binaries =
        model.configuration.elf_map.iter().map(|(name, index)| (name.clone(), *index)).collect();
    ModelSummary { binaries, files, total }
}

pub fn summary_command(json: &str, format: SummaryFormat) -> Result<()> {
    let model = IntermediateCoverageModel::load(Path::new(json))
        .with_context(|| format!("Failed to load intermediate document {json}"))?;
    let summary = summarize(&model);

    match format {
        SummaryFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        SummaryFormat::Text => {
            println!("Binaries:");
            for (name, index) in &summary.binaries {
                println!("  - {name}: {index}");
            }
            println!("Files:");
            for file in summary.files.iter().chain(std::iter::once(&summary.total)) {
                println!(
                    "  {}: functions {}/{} ({}), lines {}/{} ({})",
                    file.file,
                    file.functions_hit,
                    file.functions_found,
                    percent(file.functions_hit, file.functions_found),
                    file.lines_hit,
                    file.lines_found,
                    percent(file.lines_hit, file.lines_found)
                );
            }
        }
    }
    Ok(())
}
