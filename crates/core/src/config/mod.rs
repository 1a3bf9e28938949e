//! Run configuration for the correlation stage.
//!
//! Top-level sections:
//! - `configuration`: switches (workspace-relative source paths).
//! - `parameters`: toolchain paths, workspace, output, pass-through metadata.
//! - `elfs`: one entry per binary with its trace globs and exclusions.
//!
//! Both JSON and YAML are accepted; the file extension picks the parser.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, CoverageResult};

fn default_objdump() -> String {
    "objdump".to_string()
}

/// Behavioural switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSwitches {
    /// Store source paths relative to `parameters.workspace`.
    #[serde(default)]
    pub remove_workspace: bool,
}

/// Toolchain paths, workspace and pass-through data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Disassembler able to interleave source (`objdump -Sl`).
    #[serde(default = "default_objdump")]
    pub objdump: String,
    /// Declaration lookup tool. `None` means `ctags` on `PATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctags: Option<String>,
    /// Workspace the binaries were built from (prefix of DWARF paths).
    #[serde(default)]
    pub workspace: String,
    /// Where the intermediate document is written.
    #[serde(default)]
    pub output_file: String,
    /// Source provenance entries (git/http checkout descriptors), carried verbatim.
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
    /// Arbitrary metadata, carried verbatim.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// One analysed binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryConfig {
    /// Path to the ELF image. The file stem names the binary in `elf_map`.
    pub name: String,
    /// Glob patterns selecting the trace files recorded for this binary.
    #[serde(default)]
    pub traces: Vec<String>,
    /// Regular expressions (anchored at the start of the name) of functions to ignore.
    #[serde(default)]
    pub exclude_functions: Vec<String>,
}

impl BinaryConfig {
    pub fn new(name: impl Into<String>, traces: Vec<String>) -> Self {
        Self { name: name.into(), traces, exclude_functions: Vec::new() }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.name)
    }

    /// Short binary name used as the `elf_map` key (`build/bl31.elf` -> `bl31`).
    pub fn binary_name(&self) -> String {
        let path = Path::new(&self.name);
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Compile the exclusion patterns, anchored at the start of the function name.
    pub fn exclusion_patterns(&self) -> CoverageResult<Vec<Regex>> {
        self.exclude_functions
            .iter()
            .map(|pat| {
                Regex::new(&format!("^(?:{pat})")).map_err(|e| {
                    CoverageError::Configuration(format!(
                        "invalid exclude_functions pattern '{pat}' for {}: {e}",
                        self.name
                    ))
                })
            })
            .collect()
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub configuration: RunSwitches,
    pub parameters: RunParameters,
    pub elfs: Vec<BinaryConfig>,
}

impl RunConfig {
    /// Reject configurations that cannot drive a run before any work starts.
    pub fn validate(&self) -> CoverageResult<()> {
        if self.elfs.is_empty() {
            return Err(CoverageError::Configuration("'elfs' must list at least one binary".into()));
        }
        if self.parameters.workspace.trim().is_empty() {
            return Err(CoverageError::Configuration("'parameters.workspace' is required".into()));
        }
        if self.parameters.output_file.trim().is_empty() {
            return Err(CoverageError::Configuration(
                "'parameters.output_file' is required".into(),
            ));
        }
        if self.parameters.objdump.trim().is_empty() {
            return Err(CoverageError::Configuration("'parameters.objdump' must not be empty".into()));
        }
        for elf in &self.elfs {
            if elf.name.trim().is_empty() {
                return Err(CoverageError::Configuration("every elf needs a 'name'".into()));
            }
            if elf.traces.is_empty() {
                return Err(CoverageError::Configuration(format!(
                    "elf '{}' has no 'traces' patterns",
                    elf.name
                )));
            }
            elf.exclusion_patterns()?;
        }
        Ok(())
    }

    pub fn workspace(&self) -> PathBuf {
        PathBuf::from(&self.parameters.workspace)
    }

    pub fn output_file(&self) -> PathBuf {
        PathBuf::from(&self.parameters.output_file)
    }
}

/// Parse a configuration body; `yaml` selects the YAML parser.
pub fn parse_run_config(body: &str, yaml: bool) -> CoverageResult<RunConfig> {
    let config: RunConfig = if yaml {
        serde_yaml::from_str(body)
            .map_err(|e| CoverageError::Configuration(format!("failed to parse YAML: {e}")))?
    } else {
        serde_json::from_str(body)
            .map_err(|e| CoverageError::Configuration(format!("failed to parse JSON: {e}")))?
    };
    config.validate()?;
    Ok(config)
}

/// Load and validate a configuration file from disk.
pub fn load_run_config(path: &Path) -> CoverageResult<RunConfig> {
    let body = std::fs::read_to_string(path).map_err(|e| CoverageError::io(path, e))?;
    let yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"));
    parse_run_config(&body, yaml)
}
