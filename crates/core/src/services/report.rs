//! lcov tracefile emission.
//!
//! Per file: `TN:`, `SF:`, all `FN:` records then all `FNDA:` records,
//! `FNF`/`FNH`, `BRDA` records with `BRF`/`BRH`, `DA` records with `LF`/`LH`,
//! and `end_of_record`.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use path_absolutize::Absolutize;
use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::{CoverageError, CoverageResult};
use crate::model::{IntermediateCoverageModel, SourceFileCoverage};
use crate::services::branches::{BranchHeuristicAnalyzer, BranchPoint};

/// Found/hit counters of one emitted record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileTotals {
    pub path: String,
    pub functions_found: usize,
    pub functions_hit: usize,
    pub branches_found: usize,
    pub branches_hit: usize,
    pub lines_found: usize,
    pub lines_hit: usize,
}

impl FileTotals {
    fn add(&mut self, other: &FileTotals) {
        self.functions_found += other.functions_found;
        self.functions_hit += other.functions_hit;
        self.branches_found += other.branches_found;
        self.branches_hit += other.branches_hit;
        self.lines_found += other.lines_found;
        self.lines_hit += other.lines_hit;
    }
}

/// Outcome of one report run.
#[derive(Debug, Clone, Default)]
pub struct ReportSummary {
    pub files: Vec<FileTotals>,
    /// Model keys whose file was not found under the workspace.
    pub skipped: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ReportSummary {
    pub fn totals(&self) -> FileTotals {
        let mut total = FileTotals { path: "total".to_string(), ..FileTotals::default() };
        for file in &self.files {
            total.add(file);
        }
        total
    }
}

/// Write one file's record. Branch points must already be in line order.
pub fn write_file_record<W: Write>(
    out: &mut W,
    source_path: &str,
    coverage: &SourceFileCoverage,
    branches: &[BranchPoint],
) -> std::io::Result<FileTotals> {
    let mut totals = FileTotals { path: source_path.to_string(), ..FileTotals::default() };

    writeln!(out, "TN:")?;
    writeln!(out, "SF:{source_path}")?;

    for (name, function) in &coverage.functions {
        writeln!(out, "FN:{},{name}", function.line_number)?;
    }
    for (name, function) in &coverage.functions {
        writeln!(out, "FNDA:{},{name}", u8::from(function.covered))?;
        totals.functions_found += 1;
        totals.functions_hit += usize::from(function.covered);
    }
    writeln!(out, "FNF:{}", totals.functions_found)?;
    writeln!(out, "FNH:{}", totals.functions_hit)?;

    for point in branches {
        for (arm, covered) in point.arms.iter().enumerate() {
            writeln!(out, "BRDA:{},0,{arm},{}", point.line, u8::from(*covered))?;
        }
        totals.branches_found += point.arms.len();
        totals.branches_hit += point.covered_arms();
    }
    writeln!(out, "BRF:{}", totals.branches_found)?;
    writeln!(out, "BRH:{}", totals.branches_hit)?;

    for (line, data) in &coverage.lines {
        writeln!(out, "DA:{line},{}", u8::from(data.covered))?;
        totals.lines_found += 1;
        totals.lines_hit += usize::from(data.covered);
    }
    writeln!(out, "LF:{}", totals.lines_found)?;
    writeln!(out, "LH:{}", totals.lines_hit)?;
    writeln!(out, "end_of_record")?;
    writeln!(out)?;
    Ok(totals)
}

/// Turns an intermediate model plus the local source tree into a tracefile.
pub struct ReportEmitter {
    workspace: PathBuf,
}

impl ReportEmitter {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }

    /// Where the file behind a model key lives; absolute keys are used as-is.
    pub fn source_path(&self, key: &str) -> PathBuf {
        self.workspace.join(key)
    }

    /// Emit every model file that exists on disk; the rest are skipped.
    pub fn emit<W: Write>(
        &self,
        model: &IntermediateCoverageModel,
        out: &mut W,
    ) -> CoverageResult<ReportSummary> {
        let mut summary = ReportSummary::default();
        for (key, coverage) in &model.source_files {
            let path = self.source_path(key);
            if !path.is_file() {
                warn!("Source file {} not found; skipped", path.display());
                summary.diagnostics.push(Diagnostic::new(
                    key.as_str(),
                    None,
                    DiagnosticKind::MissingSourceFile,
                    format!("not found at {}", path.display()),
                ));
                summary.skipped.push(key.clone());
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| CoverageError::io(&path, e))?;
            let source = String::from_utf8_lossy(&bytes);

            let (branches, diagnostics) =
                BranchHeuristicAnalyzer::new(key, &source, coverage).analyze();
            summary.diagnostics.extend(diagnostics);

            let sf = absolute_display(&path);
            let totals =
                write_file_record(out, &sf, coverage, &branches).map_err(CoverageError::Output)?;
            summary.files.push(totals);
        }
        let total = summary.totals();
        info!(
            "Report: {} file(s), {} skipped; functions {}/{}, lines {}/{}, branches {}/{}",
            summary.files.len(),
            summary.skipped.len(),
            total.functions_hit,
            total.functions_found,
            total.lines_hit,
            total.lines_found,
            total.branches_hit,
            total.branches_found
        );
        Ok(summary)
    }
}

/// Lexically absolute: `..` is folded but symlinks are kept as written.
fn absolute_display(path: &Path) -> String {
    match path.absolutize() {
        Ok(abs) => abs.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}
