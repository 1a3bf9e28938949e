use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::config::RunConfig;
use crate::error::{CoverageError, CoverageResult};

/// External analysis tools used by one run.
///
/// Built once from the configuration and handed to each component that shells
/// out, so nothing depends on process-wide tool paths.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub objdump: PathBuf,
    pub ctags: PathBuf,
}

impl Toolchain {
    pub fn new(objdump: impl Into<PathBuf>, ctags: impl Into<PathBuf>) -> Self {
        Self { objdump: objdump.into(), ctags: ctags.into() }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        let ctags = config.parameters.ctags.clone().unwrap_or_else(|| "ctags".to_string());
        Self::new(&config.parameters.objdump, ctags)
    }

    /// The disassembler must be runnable; anything else aborts the run.
    pub fn verify(&self) -> CoverageResult<String> {
        let version = run_tool(&self.objdump, &["--version"])?;
        Ok(version.lines().next().unwrap_or("").trim().to_string())
    }

    /// Whether the declaration lookup tool answers `--version`.
    pub fn declaration_lookup_available(&self) -> bool {
        run_tool(&self.ctags, &["--version"]).is_ok()
    }

    /// `objdump -Sl <elf>`: disassembly interleaved with source file/line attribution.
    pub fn disassemble_with_source(&self, elf: &Path) -> CoverageResult<String> {
        let elf_arg = elf.to_string_lossy();
        run_tool(&self.objdump, &["-Sl", elf_arg.as_ref()])
    }

    /// `ctags -x --c-kinds=f <file>`: cross-reference of function declarations.
    pub fn function_xref(&self, source: &Path) -> CoverageResult<String> {
        let source_arg = source.to_string_lossy();
        run_tool(&self.ctags, &["-x", "--c-kinds=f", source_arg.as_ref()])
    }
}

/// Producer of source-annotated disassembly for an ELF image.
pub trait Disassembler {
    fn disassemble(&self, elf: &Path) -> CoverageResult<String>;
}

impl Disassembler for Toolchain {
    fn disassemble(&self, elf: &Path) -> CoverageResult<String> {
        self.disassemble_with_source(elf)
    }
}

fn tool_name(tool: &Path) -> String {
    tool.file_name().and_then(|n| n.to_str()).unwrap_or("tool").to_string()
}

/// Run a tool to completion and return its stdout. Spawn failures and
/// non-zero exits are fatal.
pub fn run_tool(tool: &Path, args: &[&str]) -> CoverageResult<String> {
    debug!("Running {} {}", tool.display(), args.join(" "));
    let output = Command::new(tool).args(args).output().map_err(|e| {
        CoverageError::toolchain(tool_name(tool), format!("failed to spawn {}: {e}", tool.display()))
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoverageError::toolchain(
            tool_name(tool),
            format!("{} exited with {}: {}", tool.display(), output.status, stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
