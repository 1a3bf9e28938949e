use std::path::{Path, PathBuf};

use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use regex::Regex;
use tracecov_core::services::elf::{
    derive_ranges, mapping_marker, read_binary_metadata, FunctionSymbol, FunctionTable, MarkerKind,
    RangeKind, RangeMarker,
};
use tracecov_core::CoverageError;

fn symbol(name: &str, value: u64, size: u64, kind: SymbolKind, section: object::write::SectionId) -> Symbol {
    let scope = if kind == SymbolKind::Text { SymbolScope::Linkage } else { SymbolScope::Compilation };
    Symbol {
        name: name.as_bytes().to_vec(),
        value,
        size,
        kind,
        scope,
        weak: false,
        section: SymbolSection::Section(section),
        flags: SymbolFlags::None,
    }
}

/// AArch64 object: 32 bytes of `.text`, code up to 0x18 then a literal pool,
/// functions `foo` [4, 0xc) and `bar` [0xc, 0x14).
fn write_fixture(dir: &Path) -> PathBuf {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::Aarch64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.section_mut(text).append_data(&[0u8; 32], 4);

    obj.add_symbol(symbol("$x", 0, 0, SymbolKind::Label, text));
    obj.add_symbol(symbol("$d", 0x18, 0, SymbolKind::Label, text));
    obj.add_symbol(symbol("foo", 4, 8, SymbolKind::Text, text));
    obj.add_symbol(symbol("bar", 0xc, 8, SymbolKind::Text, text));

    let path = dir.join("bl31.elf");
    std::fs::write(&path, obj.write().expect("write elf")).expect("write fixture");
    path
}

#[test]
fn metadata_reader_extracts_sections_ranges_and_functions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_fixture(dir.path());
    let meta = read_binary_metadata(&path).expect("metadata");

    let text = meta.code_sections.iter().find(|s| s.name == ".text").expect(".text");
    assert_eq!((text.start, text.size), (0, 32));

    let ranges: Vec<(u64, u64, RangeKind)> =
        meta.ranges.0.iter().map(|r| (r.start, r.end, r.kind)).collect();
    assert_eq!(ranges, vec![(0, 0x17, RangeKind::Code), (0x18, 0x1f, RangeKind::Data)]);
    assert!(meta.ranges.contains(0x10));
    assert!(!meta.ranges.contains(0x18), "literal pool is data");

    let foo = meta.functions.get("foo").expect("foo");
    assert_eq!((foo.start, foo.end), (4, 0xc));
    assert!(!foo.has_source_mapping);
    assert!(meta.functions.contains("bar"));
    assert!(!meta.functions.contains("$x"), "mapping symbols are not functions");
    assert_eq!(meta.functions.len(), 2);
}

#[test]
fn missing_binary_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = read_binary_metadata(&dir.path().join("nope.elf")).expect_err("missing");
    assert!(matches!(err, CoverageError::MissingBinary(_)));
}

#[test]
fn non_elf_input_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("junk.elf");
    std::fs::write(&path, b"definitely not an elf").expect("write");
    assert!(read_binary_metadata(&path).is_err());
}

#[test]
fn ranges_close_on_kind_change_and_drop_the_open_tail() {
    let marker = |address, kind| RangeMarker { address, kind };
    let ranges = derive_ranges(vec![
        marker(0x40, MarkerKind::Data),
        marker(0x0, MarkerKind::Code),
        marker(0x20, MarkerKind::Code),
        marker(0x60, MarkerKind::SectionEnd),
        marker(0x100, MarkerKind::Code),
    ]);
    let got: Vec<(u64, u64, RangeKind)> = ranges.0.iter().map(|r| (r.start, r.end, r.kind)).collect();
    assert_eq!(got, vec![(0x0, 0x3f, RangeKind::Code), (0x40, 0x5f, RangeKind::Data)]);
}

#[test]
fn section_end_and_next_section_start_at_the_same_address() {
    let marker = |address, kind| RangeMarker { address, kind };
    let ranges = derive_ranges(vec![
        marker(0x0, MarkerKind::Code),
        marker(0x100, MarkerKind::Code),
        marker(0x100, MarkerKind::SectionEnd),
        marker(0x180, MarkerKind::SectionEnd),
    ]);
    assert_eq!(ranges.code().count(), 2);
    assert!(ranges.contains(0x17f));
    assert!(!ranges.contains(0x180));
}

#[test]
fn mapping_symbols_are_classified() {
    assert_eq!(mapping_marker("$x"), Some(MarkerKind::Code));
    assert_eq!(mapping_marker("$x.42"), Some(MarkerKind::Code));
    assert_eq!(mapping_marker("$t"), Some(MarkerKind::Code));
    assert_eq!(mapping_marker("$d.1"), Some(MarkerKind::Data));
    assert_eq!(mapping_marker("$xyz"), None);
    assert_eq!(mapping_marker("main"), None);
}

#[test]
fn duplicate_function_names_keep_the_first() {
    let table = FunctionTable::from_symbols(vec![
        FunctionSymbol::new("init", 0x100, 0x110),
        FunctionSymbol::new("init", 0x200, 0x210),
        FunctionSymbol::new("main", 0x300, 0x340),
    ]);
    assert_eq!(table.len(), 2);
    assert_eq!(table.get("init").map(|f| f.start), Some(0x100));
}

#[test]
fn exclusions_are_anchored_and_tracked_separately() {
    let mut table = FunctionTable::from_symbols(vec![
        FunctionSymbol::new("plat_setup", 0x10, 0x20),
        FunctionSymbol::new("my_plat_setup", 0x20, 0x30),
        FunctionSymbol::new("main", 0x30, 0x40),
    ]);
    table.apply_exclusions(&[Regex::new("^(?:plat_)").expect("regex")]);
    assert!(!table.contains("plat_setup"));
    assert!(table.contains("my_plat_setup"));
    assert!(table.excluded.contains_key("plat_setup"));

    table.mark_source_mapped("main");
    let unmapped: Vec<&str> = table.without_source_mapping().map(|f| f.name.as_str()).collect();
    assert_eq!(unmapped, vec!["my_plat_setup"]);
}

#[test]
fn function_linked_at_address_zero_is_kept() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::Aarch64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.section_mut(text).append_data(&[0u8; 16], 4);
    obj.add_symbol(symbol("$x", 0, 0, SymbolKind::Label, text));
    obj.add_symbol(symbol("bl1_entrypoint", 0, 8, SymbolKind::Text, text));
    obj.add_symbol(symbol("bl1_main", 8, 8, SymbolKind::Text, text));
    let path = dir.path().join("bl1.elf");
    std::fs::write(&path, obj.write().expect("write elf")).expect("write fixture");

    let meta = read_binary_metadata(&path).expect("metadata");
    let entry = meta.functions.get("bl1_entrypoint").expect("entry point at 0x0");
    assert_eq!((entry.start, entry.end), (0, 8));
    assert!(meta.functions.contains("bl1_main"));
    assert_eq!(meta.functions.len(), 2);
}
