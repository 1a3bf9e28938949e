use std::collections::BTreeMap;
use std::path::Path;

use goblin::elf::{header, section_header, Elf};
use log::{debug, warn};
use regex::Regex;

use crate::error::{CoverageError, CoverageResult};

/// Executable section as listed in the section headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSection {
    pub name: String,
    pub start: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    Code,
    Data,
}

/// Inclusive address range `[start, end]` of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutableRange {
    pub start: u64,
    pub end: u64,
    pub kind: RangeKind,
}

impl ExecutableRange {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address <= self.end
    }
}

/// Ranges derived from mapping-symbol markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutableRanges(pub Vec<ExecutableRange>);

impl ExecutableRanges {
    pub fn code(&self) -> impl Iterator<Item = &ExecutableRange> {
        self.0.iter().filter(|r| r.kind == RangeKind::Code)
    }

    /// True when `address` lies inside a code range.
    pub fn contains(&self, address: u64) -> bool {
        self.code().any(|r| r.contains(address))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Code,
    Data,
    SectionEnd,
}

/// Boundary marker at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeMarker {
    pub address: u64,
    pub kind: MarkerKind,
}

/// Turn address-sorted boundary markers into ranges.
///
/// A range is closed when the marker kind changes; it ends one byte before the
/// next differing marker. Section-end markers close ranges but never open one,
/// and a trailing range with no closing marker is dropped.
pub fn derive_ranges(mut markers: Vec<RangeMarker>) -> ExecutableRanges {
    // A section end sorts before a marker opening the next section at the same address.
    markers.sort_by_key(|m| (m.address, m.kind != MarkerKind::SectionEnd));
    let mut ranges = Vec::new();
    let Some(first) = markers.first() else {
        return ExecutableRanges::default();
    };
    let mut start = first.address;
    let mut current = first.kind;
    for marker in &markers[1..] {
        if marker.kind == current {
            continue;
        }
        let kind = match current {
            MarkerKind::Code => Some(RangeKind::Code),
            MarkerKind::Data => Some(RangeKind::Data),
            MarkerKind::SectionEnd => None,
        };
        if let Some(kind) = kind {
            if marker.address > start {
                ranges.push(ExecutableRange { start, end: marker.address - 1, kind });
            }
        }
        start = marker.address;
        current = marker.kind;
    }
    ExecutableRanges(ranges)
}

/// Classify an ARM/AArch64 mapping symbol (`$x`, `$a`, `$t`, `$d`, optionally `.<n>`).
pub fn mapping_marker(name: &str) -> Option<MarkerKind> {
    let base = name.split('.').next().unwrap_or(name);
    match base {
        "$x" | "$a" | "$t" => Some(MarkerKind::Code),
        "$d" => Some(MarkerKind::Data),
        _ => None,
    }
}

/// Function symbol with its half-open address span `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    pub name: String,
    pub start: u64,
    pub end: u64,
    /// Set once the disassembly attributes the function to a source line.
    pub has_source_mapping: bool,
}

impl FunctionSymbol {
    pub fn new(name: impl Into<String>, start: u64, end: u64) -> Self {
        Self { name: name.into(), start, end, has_source_mapping: false }
    }
}

/// Functions of one binary split into the active set and those excluded by pattern.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    pub active: BTreeMap<String, FunctionSymbol>,
    pub excluded: BTreeMap<String, FunctionSymbol>,
}

impl FunctionTable {
    /// Build from symbols in table order; the first symbol of a name wins.
    pub fn from_symbols(symbols: impl IntoIterator<Item = FunctionSymbol>) -> Self {
        let mut active: BTreeMap<String, FunctionSymbol> = BTreeMap::new();
        for sym in symbols {
            if active.contains_key(&sym.name) {
                warn!("Function '{}' is defined more than once; keeping the first", sym.name);
                continue;
            }
            active.insert(sym.name.clone(), sym);
        }
        Self { active, excluded: BTreeMap::new() }
    }

    /// Move every function whose name matches one of `patterns` to the excluded set.
    pub fn apply_exclusions(&mut self, patterns: &[Regex]) {
        if patterns.is_empty() {
            return;
        }
        let names: Vec<String> = self
            .active
            .keys()
            .filter(|name| patterns.iter().any(|p| p.is_match(name)))
            .cloned()
            .collect();
        for name in names {
            if let Some(sym) = self.active.remove(&name) {
                debug!("Excluding function '{name}'");
                self.excluded.insert(name, sym);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSymbol> {
        self.active.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    pub fn mark_source_mapped(&mut self, name: &str) {
        if let Some(sym) = self.active.get_mut(name) {
            sym.has_source_mapping = true;
        }
    }

    /// Active functions never attributed to a source line.
    pub fn without_source_mapping(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.active.values().filter(|f| !f.has_source_mapping)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Everything the correlation stage needs from one ELF image.
#[derive(Debug, Clone, Default)]
pub struct BinaryMetadata {
    pub code_sections: Vec<CodeSection>,
    pub ranges: ExecutableRanges,
    pub functions: FunctionTable,
}

/// Section and symbol extraction from an in-memory ELF image.
pub struct BinaryMetadataReader<'a> {
    elf: Elf<'a>,
}

impl<'a> BinaryMetadataReader<'a> {
    pub fn parse(bytes: &'a [u8]) -> CoverageResult<Self> {
        let elf = Elf::parse(bytes)
            .map_err(|e| CoverageError::Configuration(format!("not a readable ELF image: {e}")))?;
        Ok(Self { elf })
    }

    pub fn code_sections(&self) -> Vec<CodeSection> {
        let exec_flag = u64::from(section_header::SHF_EXECINSTR);
        self.elf
            .section_headers
            .iter()
            .filter(|sh| sh.sh_flags & exec_flag != 0 && sh.sh_size > 0)
            .map(|sh| CodeSection {
                name: self.elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
                start: sh.sh_addr,
                size: sh.sh_size,
            })
            .collect()
    }

    pub fn executable_ranges(&self) -> ExecutableRanges {
        let mut markers: Vec<RangeMarker> = self
            .elf
            .syms
            .iter()
            .filter_map(|sym| {
                let name = self.elf.strtab.get_at(sym.st_name)?;
                let kind = mapping_marker(name)?;
                Some(RangeMarker { address: sym.st_value, kind })
            })
            .collect();
        for sec in self.code_sections() {
            markers.push(RangeMarker {
                address: sec.start.saturating_add(sec.size),
                kind: MarkerKind::SectionEnd,
            });
        }
        derive_ranges(markers)
    }

    pub fn function_symbols(&self) -> Vec<FunctionSymbol> {
        let thumb = self.elf.header.e_machine == header::EM_ARM;
        self.elf
            .syms
            .iter()
            .filter(|sym| {
                sym.is_function() && sym.st_shndx != section_header::SHN_UNDEF as usize
            })
            .filter_map(|sym| {
                let name = self.elf.strtab.get_at(sym.st_name)?;
                if name.is_empty() {
                    return None;
                }
                let start = if thumb { sym.st_value & !1 } else { sym.st_value };
                Some(FunctionSymbol::new(name, start, start.saturating_add(sym.st_size)))
            })
            .collect()
    }

    pub fn read(&self) -> BinaryMetadata {
        BinaryMetadata {
            code_sections: self.code_sections(),
            ranges: self.executable_ranges(),
            functions: FunctionTable::from_symbols(self.function_symbols()),
        }
    }
}

/// Read and parse the binary at `path`.
pub fn read_binary_metadata(path: &Path) -> CoverageResult<BinaryMetadata> {
    if !path.is_file() {
        return Err(CoverageError::MissingBinary(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|e| CoverageError::io(path, e))?;
    let reader = BinaryMetadataReader::parse(&bytes)?;
    Ok(reader.read())
}
