use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::{debug, error, info};
use thiserror::Error;

use crate::error::{CoverageError, CoverageResult};

/// Aggregated execution record for one instruction address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceHit {
    pub address: u64,
    pub exec_count: u64,
    pub instr_size: u32,
}

/// Why a trace line was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceLineError {
    #[error("expected '<hex address> <count> <size>', got {0} field(s)")]
    FieldCount(usize),
    #[error("invalid address '{0}'")]
    Address(String),
    #[error("invalid execution count '{0}'")]
    Count(String),
    #[error("invalid instruction size '{0}'")]
    Size(String),
}

/// Parse `<hex address> <decimal count> <decimal size>`.
pub fn parse_trace_line(line: &str) -> Result<TraceHit, TraceLineError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(TraceLineError::FieldCount(fields.len()));
    }
    let raw_addr = fields[0].trim_start_matches("0x").trim_start_matches("0X");
    let address = u64::from_str_radix(raw_addr, 16)
        .map_err(|_| TraceLineError::Address(fields[0].to_string()))?;
    let exec_count =
        fields[1].parse::<u64>().map_err(|_| TraceLineError::Count(fields[1].to_string()))?;
    let instr_size =
        fields[2].parse::<u32>().map_err(|_| TraceLineError::Size(fields[2].to_string()))?;
    Ok(TraceHit { address, exec_count, instr_size })
}

/// Address -> hit count table built from one binary's trace files.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTraceStore {
    hits: BTreeMap<u64, TraceHit>,
    rejected_lines: usize,
}

impl ExecutionTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every file matched by `patterns`. Matching nothing at all is fatal.
    pub fn load(patterns: &[String]) -> CoverageResult<Self> {
        let mut files = BTreeSet::new();
        for pattern in patterns {
            let paths = glob::glob(pattern).map_err(|e| {
                CoverageError::Configuration(format!("invalid trace pattern '{pattern}': {e}"))
            })?;
            for entry in paths {
                match entry {
                    Ok(path) if path.is_file() => {
                        files.insert(path);
                    }
                    Ok(_) => {}
                    Err(e) => error!("Unreadable trace path while expanding '{pattern}': {e}"),
                }
            }
        }
        if files.is_empty() {
            return Err(CoverageError::TraceLoad(format!("'{}'", patterns.join("', '"))));
        }

        let mut store = Self::new();
        for path in &files {
            store.ingest_file(path);
        }
        info!(
            "Loaded {} traced addresses from {} file(s) ({} line(s) rejected)",
            store.len(),
            files.len(),
            store.rejected_lines
        );
        Ok(store)
    }

    fn ingest_file(&mut self, path: &Path) {
        match std::fs::read_to_string(path) {
            Ok(body) => self.ingest_str(&path.display().to_string(), &body),
            Err(e) => error!("Failed to read trace file {}: {e}", path.display()),
        }
    }

    /// Fold one trace file's contents into the table. Bad lines are logged and skipped.
    pub fn ingest_str(&mut self, source: &str, body: &str) {
        for (idx, line) in body.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_trace_line(line) {
                Ok(hit) => self.add(hit),
                Err(e) => {
                    self.rejected_lines += 1;
                    error!("{source}:{}: skipping trace line '{line}': {e}", idx + 1);
                }
            }
        }
        debug!("{source}: {} distinct addresses so far", self.hits.len());
    }

    /// Counts accumulate per address; the size is taken from the latest record.
    pub fn add(&mut self, hit: TraceHit) {
        self.hits
            .entry(hit.address)
            .and_modify(|existing| {
                existing.exec_count = existing.exec_count.saturating_add(hit.exec_count);
                existing.instr_size = hit.instr_size;
            })
            .or_insert(hit);
    }

    /// Execution count at `address`, 0 when never traced.
    pub fn count(&self, address: u64) -> u64 {
        self.hits.get(&address).map(|h| h.exec_count).unwrap_or(0)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.hits.contains_key(&address)
    }

    pub fn get(&self, address: u64) -> Option<&TraceHit> {
        self.hits.get(&address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.hits.keys().copied()
    }

    pub fn rejected_lines(&self) -> usize {
        self.rejected_lines
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
