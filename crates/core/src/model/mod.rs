//! Intermediate coverage model: the document handed from the correlation stage
//! to the report stage.
//!
//! Layout on disk (JSON, keys sorted):
//!
//! ```text
//! { "source_files": { <path>: { "functions": { <name>: {covered, line_number} },
//!                               "lines": { <line>: {covered, elf_index:
//!                                   { <binary index>: { <address>: [opcode, count] } } } } } },
//!   "configuration": { "sources": [...], "metadata": ..., "elf_map": { <binary>: <index> } } }
//! ```
//!
//! Merge policy, applied both by the correlator and by [`IntermediateCoverageModel::merge`]:
//! the first non-zero declaration line wins, `covered` only ever moves from
//! false to true, and re-observing an address for the same binary overwrites
//! its opcode record.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, CoverageResult};

/// `(opcode text, execution count)` for one instruction address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeHit(pub String, pub u64);

impl OpcodeHit {
    pub fn opcode(&self) -> &str {
        &self.0
    }

    pub fn count(&self) -> u64 {
        self.1
    }
}

/// Per-binary, per-address instruction records attributed to a source line.
pub type ElfIndexMap = BTreeMap<u32, BTreeMap<u64, OpcodeHit>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLine {
    pub covered: bool,
    #[serde(default)]
    pub elf_index: ElfIndexMap,
}

impl SourceLine {
    /// Record an instruction observation; a repeated address overwrites.
    pub fn record(&mut self, binary_index: u32, address: u64, opcode: &str, count: u64) {
        self.elf_index
            .entry(binary_index)
            .or_default()
            .insert(address, OpcodeHit(opcode.to_string(), count));
        if count > 0 {
            self.covered = true;
        }
    }

    /// Every opcode text recorded for this line, across all binaries.
    pub fn opcodes(&self) -> impl Iterator<Item = &str> {
        self.elf_index.values().flat_map(|by_addr| by_addr.values().map(OpcodeHit::opcode))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFunction {
    pub covered: bool,
    /// Declaration line in the source file, `0` when unknown.
    #[serde(default)]
    pub line_number: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileCoverage {
    #[serde(default)]
    pub functions: BTreeMap<String, SourceFunction>,
    #[serde(default)]
    pub lines: BTreeMap<u32, SourceLine>,
}

impl SourceFileCoverage {
    /// Get or create a function entry. A known declaration line is never replaced.
    pub fn function_entry(&mut self, name: &str, line_number: u32) -> &mut SourceFunction {
        let entry = self.functions.entry(name.to_string()).or_default();
        if entry.line_number == 0 {
            entry.line_number = line_number;
        }
        entry
    }

    pub fn line_entry(&mut self, line: u32) -> &mut SourceLine {
        self.lines.entry(line).or_default()
    }

    pub fn is_line_covered(&self, line: u32) -> bool {
        self.lines.get(&line).map(|l| l.covered).unwrap_or(false)
    }

    pub fn merge(&mut self, other: SourceFileCoverage) {
        for (name, func) in other.functions {
            let entry = self.function_entry(&name, func.line_number);
            entry.covered |= func.covered;
        }
        for (line, data) in other.lines {
            let entry = self.line_entry(line);
            entry.covered |= data.covered;
            for (binary_index, by_addr) in data.elf_index {
                entry.elf_index.entry(binary_index).or_default().extend(by_addr);
            }
        }
    }
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::String(String::new())
}

/// Run metadata carried next to the coverage data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfiguration {
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub elf_map: BTreeMap<String, u32>,
}

impl Default for ModelConfiguration {
    fn default() -> Self {
        Self { sources: Vec::new(), metadata: empty_metadata(), elf_map: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntermediateCoverageModel {
    #[serde(default)]
    pub source_files: BTreeMap<String, SourceFileCoverage>,
    #[serde(default)]
    pub configuration: ModelConfiguration,
}

impl IntermediateCoverageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_mut(&mut self, path: &str) -> &mut SourceFileCoverage {
        self.source_files.entry(path.to_string()).or_default()
    }

    pub fn file(&self, path: &str) -> Option<&SourceFileCoverage> {
        self.source_files.get(path)
    }

    /// Fold another document into this one (disjoint binaries or test runs of one project).
    pub fn merge(&mut self, other: IntermediateCoverageModel) {
        for (path, file) in other.source_files {
            self.file_mut(&path).merge(file);
        }
        for (name, index) in other.configuration.elf_map {
            self.configuration.elf_map.entry(name).or_insert(index);
        }
        for source in other.configuration.sources {
            if !self.configuration.sources.contains(&source) {
                self.configuration.sources.push(source);
            }
        }
    }

    pub fn to_json(&self) -> CoverageResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(body: &str) -> CoverageResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn save(&self, path: &Path) -> CoverageResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| CoverageError::io(path, e))
    }

    pub fn load(path: &Path) -> CoverageResult<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| CoverageError::io(path, e))?;
        Self::from_json(&body)
    }
}
