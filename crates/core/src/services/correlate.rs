use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use regex::Regex;

use crate::error::{CoverageError, CoverageResult};
use crate::model::IntermediateCoverageModel;
use crate::paths::SourcePaths;
use crate::services::disasm::{parse_disassembly, FunctionBlock};
use crate::services::elf::FunctionTable;
use crate::services::lines::FunctionLineIndex;
use crate::services::traces::ExecutionTraceStore;

/// Reserved indices of the well-known firmware stages.
pub const WELL_KNOWN_BINARIES: &[(&str, u32)] = &[
    ("bl1", 0),
    ("bl2", 1),
    ("bl31", 2),
    ("bl32", 3),
    ("scp_ram", 10),
    ("scp_rom", 11),
    ("mcp_rom", 12),
    ("mcp_ram", 13),
];

/// First index handed out to binaries outside [`WELL_KNOWN_BINARIES`].
pub const CUSTOM_BINARY_OFFSET: u32 = 100;

/// Per-run binary name -> index assignment.
#[derive(Debug, Clone)]
pub struct BinaryRegistry {
    assigned: BTreeMap<String, u32>,
    next_custom: u32,
}

impl Default for BinaryRegistry {
    fn default() -> Self {
        Self { assigned: BTreeMap::new(), next_custom: CUSTOM_BINARY_OFFSET }
    }
}

impl BinaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `name`, assigned on first use and stable afterwards.
    pub fn index_for(&mut self, name: &str) -> u32 {
        if let Some(index) = self.assigned.get(name) {
            return *index;
        }
        let index = match WELL_KNOWN_BINARIES.iter().find(|(known, _)| *known == name) {
            Some((_, index)) => *index,
            None => {
                let index = self.next_custom;
                self.next_custom += 1;
                index
            }
        };
        self.assigned.insert(name.to_string(), index);
        index
    }

    pub fn assigned(&self) -> &BTreeMap<String, u32> {
        &self.assigned
    }
}

/// Counters for one binary's correlation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationStats {
    pub blocks: usize,
    pub attributed_blocks: usize,
    pub covered_blocks: usize,
    pub unknown_blocks: usize,
    pub instructions: usize,
    pub covered_instructions: usize,
}

/// Outcome of the text search for a function without line attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    Recorded { file: String, covered: bool },
    /// The file already holds line-attributed data for this function; left as is.
    AlreadyPresent { file: String },
    NotFound,
    Ambiguous(Vec<PathBuf>),
}

/// Lazily loaded copy of the source/assembly files of the local workspace.
pub struct SourceSearch {
    root: PathBuf,
    extensions: Vec<String>,
    files: Option<Vec<(PathBuf, String)>>,
}

impl SourceSearch {
    pub const DEFAULT_EXTENSIONS: &'static [&'static str] = &["c", "s", "S"];

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: Self::DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            files: None,
        }
    }

    fn load(&mut self) -> CoverageResult<&[(PathBuf, String)]> {
        if self.files.is_none() {
            let mut files = Vec::new();
            collect_sources(&self.root, &self.extensions, &mut files)?;
            files.sort_by(|a, b| a.0.cmp(&b.0));
            debug!("Indexed {} source file(s) under {}", files.len(), self.root.display());
            self.files = Some(files);
        }
        Ok(self.files.as_deref().unwrap_or_default())
    }

    /// Files mentioning `name` as a whole word.
    pub fn files_mentioning(&mut self, name: &str) -> CoverageResult<Vec<PathBuf>> {
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(name)))
            .map_err(|e| CoverageError::Configuration(format!("bad function name '{name}': {e}")))?;
        Ok(self
            .load()?
            .iter()
            .filter(|(_, body)| pattern.is_match(body))
            .map(|(path, _)| path.clone())
            .collect())
    }
}

fn collect_sources(
    dir: &Path,
    extensions: &[String],
    out: &mut Vec<(PathBuf, String)>,
) -> CoverageResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| CoverageError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CoverageError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| CoverageError::io(&path, e))?;
        if file_type.is_dir() {
            collect_sources(&path, extensions, out)?;
        } else if file_type.is_file() {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            if extensions.iter().any(|e| e == ext) {
                // Non-UTF-8 bytes are replaced; only identifiers are searched for.
                match std::fs::read(&path) {
                    Ok(bytes) => out.push((path, String::from_utf8_lossy(&bytes).to_string())),
                    Err(e) => warn!("Skipping unreadable source {}: {e}", path.display()),
                }
            }
        }
    }
    Ok(())
}

/// Builds the coverage model from annotated disassembly and trace data, one
/// binary at a time.
pub struct DisassemblyCorrelator {
    model: IntermediateCoverageModel,
    registry: BinaryRegistry,
    paths: SourcePaths,
    lines: Option<FunctionLineIndex>,
}

impl DisassemblyCorrelator {
    /// `lines` is optional: without it declaration lines are 0 and the
    /// no-source fallback is skipped.
    pub fn new(paths: SourcePaths, lines: Option<FunctionLineIndex>) -> Self {
        Self { model: IntermediateCoverageModel::new(), registry: BinaryRegistry::new(), paths, lines }
    }

    pub fn model(&self) -> &IntermediateCoverageModel {
        &self.model
    }

    pub fn registry(&self) -> &BinaryRegistry {
        &self.registry
    }

    fn declaration_line(&mut self, key: &str, function: &str) -> CoverageResult<u32> {
        match self.lines.as_mut() {
            Some(index) => index.line_number(&self.paths.local_path(key), function),
            None => Ok(0),
        }
    }

    /// Correlate one binary's disassembly transcript.
    ///
    /// Functions whose blocks carry source attribution are flagged in
    /// `functions`; the rest are left for [`Self::apply_no_source_fallback`].
    pub fn correlate_binary(
        &mut self,
        binary_name: &str,
        disassembly: &str,
        functions: &mut FunctionTable,
        traces: &ExecutionTraceStore,
    ) -> CoverageResult<CorrelationStats> {
        let binary_index = self.registry.index_for(binary_name);
        let mut stats = CorrelationStats::default();
        for block in parse_disassembly(disassembly) {
            stats.blocks += 1;
            self.correlate_block(binary_index, &block, functions, traces, &mut stats)?;
        }
        info!(
            "{binary_name} (index {binary_index}): {} of {} block(s) attributed, {} covered, \
             {}/{} instruction(s) executed",
            stats.attributed_blocks,
            stats.blocks,
            stats.covered_blocks,
            stats.covered_instructions,
            stats.instructions
        );
        Ok(stats)
    }

    fn correlate_block(
        &mut self,
        binary_index: u32,
        block: &FunctionBlock,
        functions: &mut FunctionTable,
        traces: &ExecutionTraceStore,
        stats: &mut CorrelationStats,
    ) -> CoverageResult<()> {
        let Some(home) = block.home_run() else {
            debug!("Block '{}' has no source attribution", block.label);
            return Ok(());
        };
        if !functions.contains(&block.label) {
            warn!("Function '{}' not found in the function list; block skipped", block.label);
            stats.unknown_blocks += 1;
            return Ok(());
        }
        functions.mark_source_mapped(&block.label);
        stats.attributed_blocks += 1;

        let home_key = self.paths.key_for_build_path(&home.file);
        let home_line = self.declaration_line(&home_key, &block.label)?;
        self.model.file_mut(&home_key).function_entry(&block.label, home_line);

        let mut block_covered = false;
        for (function, run) in block.resolved_runs() {
            functions.mark_source_mapped(function);
            let key = self.paths.key_for_build_path(&run.file);
            let decl_line = self.declaration_line(&key, function)?;
            let file = self.model.file_mut(&key);
            file.function_entry(function, decl_line);
            let mut run_covered = false;
            {
                let line = file.line_entry(run.line);
                for insn in &run.instructions {
                    let count = traces.count(insn.address);
                    line.record(binary_index, insn.address, &insn.opcode, count);
                    stats.instructions += 1;
                    if count > 0 {
                        stats.covered_instructions += 1;
                        run_covered = true;
                    }
                }
            }
            if run_covered {
                file.function_entry(function, decl_line).covered = true;
                block_covered = true;
            }
        }

        if block_covered {
            stats.covered_blocks += 1;
            self.model.file_mut(&home_key).function_entry(&block.label, home_line).covered = true;
        }
        Ok(())
    }

    /// Function-level coverage for functions the disassembly never attributed
    /// to a source line: covered when the entry address was traced, placed in
    /// the single local file that declares the function.
    ///
    /// Only absent `(file, function)` entries are inserted; entries that came
    /// from line attribution are never modified.
    pub fn apply_no_source_fallback(
        &mut self,
        functions: &FunctionTable,
        traces: &ExecutionTraceStore,
        search: &mut SourceSearch,
    ) -> CoverageResult<BTreeMap<String, FallbackOutcome>> {
        let mut outcomes = BTreeMap::new();
        let Some(index) = self.lines.as_mut() else {
            info!("Declaration lookup unavailable; skipping functions without source lines");
            return Ok(outcomes);
        };

        for function in functions.without_source_mapping() {
            let covered = traces.contains(function.start);
            let mut declared = Vec::new();
            for candidate in search.files_mentioning(&function.name)? {
                if let Some(line) = index.declaration(&candidate, &function.name)? {
                    declared.push((candidate, line));
                }
            }

            let outcome = match declared.len() {
                0 => {
                    warn!("Function '{}' not found in sources", function.name);
                    FallbackOutcome::NotFound
                }
                1 => {
                    let (path, line) = declared.remove(0);
                    let key = self.paths.key_for_local_path(&path);
                    let present = self
                        .model
                        .file(&key)
                        .is_some_and(|file| file.functions.contains_key(&function.name));
                    if present {
                        debug!("'{}' already attributed in {key}; fallback left it alone", function.name);
                        FallbackOutcome::AlreadyPresent { file: key }
                    } else {
                        self.model.file_mut(&key).function_entry(&function.name, line).covered = covered;
                        FallbackOutcome::Recorded { file: key, covered }
                    }
                }
                n => {
                    let paths: Vec<PathBuf> = declared.into_iter().map(|(p, _)| p).collect();
                    warn!(
                        "'{}' declared in {n} files: {}",
                        function.name,
                        paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
                    );
                    FallbackOutcome::Ambiguous(paths)
                }
            };
            outcomes.insert(function.name.clone(), outcome);
        }
        Ok(outcomes)
    }

    /// Finish the run, attaching pass-through metadata and the binary map.
    pub fn finish(
        mut self,
        sources: Vec<serde_json::Value>,
        metadata: Option<serde_json::Value>,
    ) -> IntermediateCoverageModel {
        self.model.configuration.sources = sources;
        if let Some(metadata) = metadata {
            self.model.configuration.metadata = metadata;
        }
        self.model.configuration.elf_map = self.registry.assigned().clone();
        self.model
    }
}
