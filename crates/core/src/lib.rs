//! tracecov-core
//!
//! Core library for binary-level coverage: fuses execution traces, ELF symbol
//! and section metadata, and source-annotated disassembly into per-line and
//! per-function coverage, then recovers branch coverage from the source text
//! and writes an lcov tracefile.
//!
//! The work is split into two stages connected by the intermediate document
//! ([`model::IntermediateCoverageModel`]) so reports can be regenerated
//! without re-running the disassembler.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod paths;
pub mod services;

pub use error::{CoverageError, CoverageResult};
