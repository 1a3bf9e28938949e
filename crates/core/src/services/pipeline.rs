//! The two checkpointed stages: correlation (binaries + traces -> intermediate
//! document) and report (intermediate document + sources -> tracefile).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::config::{BinaryConfig, RunConfig};
use crate::error::{CoverageError, CoverageResult};
use crate::model::IntermediateCoverageModel;
use crate::paths::SourcePaths;
use crate::services::correlate::{
    CorrelationStats, DisassemblyCorrelator, FallbackOutcome, SourceSearch,
};
use crate::services::elf::read_binary_metadata;
use crate::services::lines::{CtagsLookup, FunctionLineIndex};
use crate::services::report::{ReportEmitter, ReportSummary};
use crate::services::toolchain::{Disassembler, Toolchain};
use crate::services::traces::ExecutionTraceStore;

/// What happened to one binary during correlation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BinaryOutcome {
    pub name: String,
    pub binary_index: u32,
    pub functions: usize,
    pub excluded_functions: usize,
    pub traced_addresses: usize,
    /// Traced addresses outside every code range; `None` without mapping symbols.
    pub traces_outside_code: Option<usize>,
    pub blocks: usize,
    pub attributed_blocks: usize,
    pub covered_blocks: usize,
    pub fallback_recorded: usize,
    pub fallback_unresolved: usize,
}

#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    pub model: IntermediateCoverageModel,
    pub binaries: Vec<BinaryOutcome>,
}

/// Correlation stage over a run configuration.
pub struct CorrelationStage<'a> {
    config: &'a RunConfig,
    disassembler: &'a dyn Disassembler,
    lines: Option<FunctionLineIndex>,
    local_root: PathBuf,
}

impl<'a> CorrelationStage<'a> {
    pub fn new(config: &'a RunConfig, disassembler: &'a dyn Disassembler) -> Self {
        Self { config, disassembler, lines: None, local_root: config.workspace() }
    }

    /// Enable declaration lines and the no-source fallback.
    pub fn with_declaration_index(mut self, lines: FunctionLineIndex) -> Self {
        self.lines = Some(lines);
        self
    }

    /// Sources live somewhere other than the build workspace.
    pub fn with_local_workspace(mut self, local_root: impl Into<PathBuf>) -> Self {
        self.local_root = local_root.into();
        self
    }

    /// Process every configured binary in order.
    pub fn run(self) -> CoverageResult<CorrelationOutcome> {
        let paths = SourcePaths::new(
            self.config.workspace(),
            &self.local_root,
            self.config.configuration.remove_workspace,
        );
        let mut correlator = DisassemblyCorrelator::new(paths, self.lines);
        let mut search = SourceSearch::new(&self.local_root);
        let mut binaries = Vec::with_capacity(self.config.elfs.len());

        for elf in &self.config.elfs {
            binaries.push(correlate_one(elf, self.disassembler, &mut correlator, &mut search)?);
        }

        let model = correlator.finish(
            self.config.parameters.sources.clone(),
            self.config.parameters.metadata.clone(),
        );
        info!("Correlation complete: {} source file(s) in the model", model.source_files.len());
        Ok(CorrelationOutcome { model, binaries })
    }
}

fn correlate_one(
    elf: &BinaryConfig,
    disassembler: &dyn Disassembler,
    correlator: &mut DisassemblyCorrelator,
    search: &mut SourceSearch,
) -> CoverageResult<BinaryOutcome> {
    let path = elf.path();
    let name = elf.binary_name();
    info!("Processing {name} ({})", path.display());
    if !path.is_file() {
        return Err(CoverageError::MissingBinary(path));
    }

    let traces = ExecutionTraceStore::load(&elf.traces).map_err(|e| match e {
        CoverageError::TraceLoad(patterns) => CoverageError::TraceLoad(format!("{name} ({patterns})")),
        other => other,
    })?;

    let metadata = read_binary_metadata(&path)?;
    let mut functions = metadata.functions;
    functions.apply_exclusions(&elf.exclusion_patterns()?);

    let traces_outside_code = if metadata.ranges.is_empty() {
        None
    } else {
        let outside = traces.addresses().filter(|a| !metadata.ranges.contains(*a)).count();
        if outside > 0 {
            info!("{name}: {outside} traced address(es) fall outside code ranges");
        }
        Some(outside)
    };

    let disassembly = disassembler.disassemble(&path)?;
    let stats: CorrelationStats =
        correlator.correlate_binary(&name, &disassembly, &mut functions, &traces)?;
    let fallback: BTreeMap<String, FallbackOutcome> =
        correlator.apply_no_source_fallback(&functions, &traces, search)?;

    let fallback_recorded =
        fallback.values().filter(|o| matches!(o, FallbackOutcome::Recorded { .. })).count();
    let fallback_unresolved = fallback
        .values()
        .filter(|o| matches!(o, FallbackOutcome::NotFound | FallbackOutcome::Ambiguous(_)))
        .count();
    Ok(BinaryOutcome {
        binary_index: correlator.registry().assigned().get(&name).copied().unwrap_or_default(),
        name,
        functions: functions.len(),
        excluded_functions: functions.excluded.len(),
        traced_addresses: traces.len(),
        traces_outside_code,
        blocks: stats.blocks,
        attributed_blocks: stats.attributed_blocks,
        covered_blocks: stats.covered_blocks,
        fallback_recorded,
        fallback_unresolved,
    })
}

/// Correlation stage driven by the configured external tools.
///
/// The disassembler must answer `--version`; a missing declaration lookup tool
/// only disables declaration lines and the no-source fallback.
pub fn correlate_with_toolchain(
    config: &RunConfig,
    toolchain: &Toolchain,
    local_workspace: Option<&Path>,
) -> CoverageResult<CorrelationOutcome> {
    let version = toolchain.verify()?;
    info!("Using {version}");

    let mut stage = CorrelationStage::new(config, toolchain);
    if toolchain.declaration_lookup_available() {
        stage = stage.with_declaration_index(FunctionLineIndex::new(Box::new(CtagsLookup::new(
            toolchain.clone(),
        ))));
    } else {
        warn!(
            "{} is not available; declaration lines and functions without source lines are skipped",
            toolchain.ctags.display()
        );
    }
    if let Some(local) = local_workspace {
        stage = stage.with_local_workspace(local);
    }
    stage.run()
}

/// Report stage: load the document, analyse branches, write the tracefile.
pub fn write_report(json: &Path, workspace: &Path, info_file: &Path) -> CoverageResult<ReportSummary> {
    let model = IntermediateCoverageModel::load(json)?;
    let file = File::create(info_file).map_err(|e| CoverageError::io(info_file, e))?;
    let mut out = BufWriter::new(file);
    let summary = ReportEmitter::new(workspace).emit(&model, &mut out)?;
    out.flush().map_err(|e| CoverageError::io(info_file, e))?;
    Ok(summary)
}
