use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::CoverageResult;
use crate::services::toolchain::Toolchain;

/// Function name -> declaration line for one source file.
pub type Declarations = HashMap<String, u32>;

/// Source of function declaration lines.
pub trait DeclarationLookup {
    fn declarations(&self, source: &Path) -> CoverageResult<Declarations>;
}

/// ctags-backed lookup.
pub struct CtagsLookup {
    toolchain: Toolchain,
}

impl CtagsLookup {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }
}

impl DeclarationLookup for CtagsLookup {
    fn declarations(&self, source: &Path) -> CoverageResult<Declarations> {
        let xref = self.toolchain.function_xref(source)?;
        Ok(parse_ctags_xref(&xref))
    }
}

/// Parse `ctags -x` output.
///
/// C functions appear as `<name> function <line> <file> <text>`; assembler
/// functions declared through the `func` macro appear as
/// `func label <line> <file> func <name>`.
pub fn parse_ctags_xref(body: &str) -> Declarations {
    let mut out = Declarations::new();
    for line in body.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 3 {
            continue;
        }
        let Ok(line_number) = cols[2].parse::<u32>() else { continue };
        match cols[1] {
            "function" => {
                out.insert(cols[0].to_string(), line_number);
            }
            "label" if cols[0] == "func" => {
                if let Some(name) = cols.last() {
                    out.insert(name.to_string(), line_number);
                }
            }
            _ => {}
        }
    }
    out
}

/// Cached per-file declaration lines.
pub struct FunctionLineIndex {
    lookup: Box<dyn DeclarationLookup>,
    cache: HashMap<PathBuf, Declarations>,
}

impl FunctionLineIndex {
    pub fn new(lookup: Box<dyn DeclarationLookup>) -> Self {
        Self { lookup, cache: HashMap::new() }
    }

    fn declarations_for(&mut self, source: &Path) -> CoverageResult<&Declarations> {
        if !self.cache.contains_key(source) {
            let decls = if source.is_file() {
                self.lookup.declarations(source)?
            } else {
                debug!("No local copy of {}; declaration lines unknown", source.display());
                Declarations::new()
            };
            self.cache.insert(source.to_path_buf(), decls);
        }
        Ok(&self.cache[source])
    }

    /// Declaration line of `function` in `source`, if the file declares it.
    pub fn declaration(&mut self, source: &Path, function: &str) -> CoverageResult<Option<u32>> {
        Ok(self.declarations_for(source)?.get(function).copied())
    }

    /// Declaration line, `0` when unknown.
    pub fn line_number(&mut self, source: &Path, function: &str) -> CoverageResult<u32> {
        Ok(self.declaration(source, function)?.unwrap_or(0))
    }
}
