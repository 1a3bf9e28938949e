use std::fs;
use std::path::Path;

use tracecov_core::paths::SourcePaths;
use tracecov_core::services::correlate::{
    BinaryRegistry, DisassemblyCorrelator, FallbackOutcome, SourceSearch,
};
use tracecov_core::services::elf::{FunctionSymbol, FunctionTable};
use tracecov_core::services::lines::{DeclarationLookup, Declarations, FunctionLineIndex};
use tracecov_core::services::traces::ExecutionTraceStore;
use tracecov_core::CoverageResult;

/// Declarations keyed by file name, standing in for ctags.
struct FixedDeclarations(Vec<(&'static str, &'static str, u32)>);

impl DeclarationLookup for FixedDeclarations {
    fn declarations(&self, source: &Path) -> CoverageResult<Declarations> {
        let file = source.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        Ok(self
            .0
            .iter()
            .filter(|(f, _, _)| *f == file)
            .map(|(_, name, line)| (name.to_string(), *line))
            .collect())
    }
}

fn index(decls: Vec<(&'static str, &'static str, u32)>) -> FunctionLineIndex {
    FunctionLineIndex::new(Box::new(FixedDeclarations(decls)))
}

fn traces(body: &str) -> ExecutionTraceStore {
    let mut store = ExecutionTraceStore::new();
    store.ingest_str("test", body);
    store
}

const FOO_BLOCK: &str = "\
0000000000001000 <foo>:
foo():
/work/src/foo.c:10
    1000:\td10043ff \tsub\tsp, sp, #0x10
/work/src/foo.c:11
    1004:\t7100001f \tcmp\tw0, #0x0
    1008:\t5400004d \tb.le\t1010 <foo+0x10>
helper():
/work/include/helper.h:4
    100c:\t11000400 \tadd\tw0, w0, #0x1

0000000000001014 <bar>:
    1014:\td65f03c0 \tret
";

fn foo_bar_table() -> FunctionTable {
    FunctionTable::from_symbols(vec![
        FunctionSymbol::new("foo", 0x1000, 0x1014),
        FunctionSymbol::new("bar", 0x1014, 0x1018),
    ])
}

#[test]
fn registry_assigns_reserved_and_sequential_indices() {
    let mut registry = BinaryRegistry::new();
    assert_eq!(registry.index_for("bl1"), 0);
    assert_eq!(registry.index_for("custom_stage"), 100);
    assert_eq!(registry.index_for("bl31"), 2);
    assert_eq!(registry.index_for("other"), 101);
    assert_eq!(registry.index_for("custom_stage"), 100, "assignment is stable");
    assert_eq!(registry.index_for("mcp_ram"), 13);
}

#[test]
fn elf_map_lists_well_known_and_custom_binaries() {
    let mut correlator = DisassemblyCorrelator::new(SourcePaths::new("/work", "/work", true), None);
    let empty = ExecutionTraceStore::new();
    correlator.correlate_binary("bl1", "", &mut FunctionTable::default(), &empty).expect("bl1");
    correlator
        .correlate_binary("custom_stage", "", &mut FunctionTable::default(), &empty)
        .expect("custom");
    let model = correlator.finish(Vec::new(), None);
    let elf_map: Vec<(&str, u32)> =
        model.configuration.elf_map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    assert_eq!(elf_map, vec![("bl1", 0), ("custom_stage", 100)]);
}

#[test]
fn attributed_instructions_land_on_their_source_lines() {
    let mut correlator = DisassemblyCorrelator::new(SourcePaths::new("/work", "/work", true), None);
    let mut functions = foo_bar_table();
    let stats = correlator
        .correlate_binary("bl31", FOO_BLOCK, &mut functions, &traces("0x1000 1 4\n0x1004 3 4\n"))
        .expect("correlate");

    assert_eq!(stats.blocks, 2);
    assert_eq!(stats.attributed_blocks, 1);
    assert_eq!(stats.covered_blocks, 1);
    assert_eq!(stats.instructions, 4);
    assert_eq!(stats.covered_instructions, 2);

    let model = correlator.model();
    let foo_c = model.file("src/foo.c").expect("workspace-relative key");
    assert!(foo_c.is_line_covered(10));
    assert!(foo_c.is_line_covered(11));
    let line11 = &foo_c.lines[&11];
    let bl31 = &line11.elf_index[&2];
    assert_eq!(bl31[&0x1004].count(), 3);
    assert_eq!(bl31[&0x1008].count(), 0);
    assert!(bl31[&0x1008].opcode().contains("b.le"));
    assert!(foo_c.functions["foo"].covered);
    assert_eq!(foo_c.functions["foo"].line_number, 0, "no declaration lookup configured");

    let helper = model.file("include/helper.h").expect("inlined file");
    assert!(!helper.is_line_covered(4));
    assert!(!helper.functions["helper"].covered);

    assert!(functions.get("foo").map(|f| f.has_source_mapping).unwrap_or(false));
    let unmapped: Vec<&str> = functions.without_source_mapping().map(|f| f.name.as_str()).collect();
    assert_eq!(unmapped, vec!["bar"]);
}

#[test]
fn later_binaries_never_clear_coverage() {
    let mut correlator = DisassemblyCorrelator::new(SourcePaths::new("/work", "/work", true), None);
    correlator
        .correlate_binary("bl1", FOO_BLOCK, &mut foo_bar_table(), &traces("0x1000 1 4\n"))
        .expect("first");
    correlator
        .correlate_binary("bl2", FOO_BLOCK, &mut foo_bar_table(), &ExecutionTraceStore::new())
        .expect("second");

    let foo_c = correlator.model().file("src/foo.c").expect("file");
    assert!(foo_c.is_line_covered(10));
    assert!(foo_c.functions["foo"].covered);
    let line10 = &foo_c.lines[&10];
    assert_eq!(line10.elf_index[&0][&0x1000].count(), 1);
    assert_eq!(line10.elf_index[&1][&0x1000].count(), 0);
}

#[test]
fn blocks_for_unknown_functions_are_skipped() {
    let mut correlator = DisassemblyCorrelator::new(SourcePaths::new("/work", "/work", true), None);
    let mut functions = FunctionTable::from_symbols(vec![FunctionSymbol::new("bar", 0x1014, 0x1018)]);
    let stats = correlator
        .correlate_binary("bl1", FOO_BLOCK, &mut functions, &traces("0x1000 1 4\n"))
        .expect("correlate");
    assert_eq!(stats.unknown_blocks, 1);
    assert!(correlator.model().source_files.is_empty());
}

#[test]
fn declaration_lines_come_from_the_local_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("src")).expect("mkdir");
    fs::write(dir.path().join("src/foo.c"), "int foo(int x)\n{\n}\n").expect("write");

    let paths = SourcePaths::new("/work", dir.path(), true);
    let mut correlator =
        DisassemblyCorrelator::new(paths, Some(index(vec![("foo.c", "foo", 9)])));
    correlator
        .correlate_binary("bl1", FOO_BLOCK, &mut foo_bar_table(), &ExecutionTraceStore::new())
        .expect("correlate");
    let foo_c = correlator.model().file("src/foo.c").expect("file");
    assert_eq!(foo_c.functions["foo"].line_number, 9);
    assert!(!foo_c.functions["foo"].covered);
}

#[test]
fn unattributed_function_is_placed_by_text_search() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("foo.c"), "int foo(void)\n{\n\treturn 0;\n}\n").expect("foo.c");
    fs::write(dir.path().join("main.c"), "int main(void) { return foo(); }\n").expect("main.c");
    fs::write(dir.path().join("notes.txt"), "foo\n").expect("notes");

    let paths = SourcePaths::new(dir.path(), dir.path(), true);
    let mut correlator = DisassemblyCorrelator::new(
        paths,
        Some(index(vec![("foo.c", "foo", 1), ("main.c", "main", 1)])),
    );
    let mut functions = FunctionTable::from_symbols(vec![FunctionSymbol::new("foo", 0x1000, 0x1010)]);
    let store = traces("0x1000 5 4\n");
    correlator
        .correlate_binary("bl1", "0000000000001000 <foo>:\n    1000:\td65f03c0 \tret\n", &mut functions, &store)
        .expect("correlate");

    let mut search = SourceSearch::new(dir.path());
    let outcomes = correlator.apply_no_source_fallback(&functions, &store, &mut search).expect("fallback");
    assert_eq!(outcomes["foo"], FallbackOutcome::Recorded { file: "foo.c".into(), covered: true });

    let foo = &correlator.model().file("foo.c").expect("foo.c").functions["foo"];
    assert!(foo.covered);
    assert_eq!(foo.line_number, 1);
}

#[test]
fn fallback_reports_missing_and_ambiguous_declarations() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("a.c"), "void dup(void) {}\n").expect("a.c");
    fs::write(dir.path().join("b.S"), "func dup\n").expect("b.S");

    let paths = SourcePaths::new(dir.path(), dir.path(), true);
    let mut correlator = DisassemblyCorrelator::new(
        paths,
        Some(index(vec![("a.c", "dup", 1), ("b.S", "dup", 1)])),
    );
    let functions = FunctionTable::from_symbols(vec![
        FunctionSymbol::new("dup", 0x10, 0x20),
        FunctionSymbol::new("ghost", 0x20, 0x30),
    ]);
    let mut search = SourceSearch::new(dir.path());
    let outcomes = correlator
        .apply_no_source_fallback(&functions, &traces("0x10 1 4\n"), &mut search)
        .expect("fallback");

    assert!(matches!(&outcomes["dup"], FallbackOutcome::Ambiguous(files) if files.len() == 2));
    assert_eq!(outcomes["ghost"], FallbackOutcome::NotFound);
    assert!(correlator.model().source_files.is_empty());
}

#[test]
fn fallback_never_modifies_line_attributed_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("src")).expect("mkdir");
    fs::write(dir.path().join("src/foo.c"), "int foo(int x)\n{\n}\nint quux(void)\n{\n}\n")
        .expect("write");

    // Absolute keys: the local file is re-rooted under the build workspace.
    let paths = SourcePaths::new("/work", dir.path(), false);
    let mut correlator = DisassemblyCorrelator::new(
        paths,
        Some(index(vec![("foo.c", "foo", 1), ("foo.c", "quux", 4)])),
    );
    correlator
        .correlate_binary("bl1", FOO_BLOCK, &mut foo_bar_table(), &ExecutionTraceStore::new())
        .expect("dwarf pass");
    let before = correlator.model().file("/work/src/foo.c").expect("dwarf key").functions["foo"].clone();
    assert!(!before.covered);

    let unmapped = FunctionTable::from_symbols(vec![
        FunctionSymbol::new("foo", 0x8000, 0x8010),
        FunctionSymbol::new("quux", 0x8010, 0x8020),
    ]);
    let mut search = SourceSearch::new(dir.path());
    let outcomes = correlator
        .apply_no_source_fallback(&unmapped, &traces("0x8000 1 4\n0x8010 2 4\n"), &mut search)
        .expect("fallback");
    assert_eq!(outcomes["foo"], FallbackOutcome::AlreadyPresent { file: "/work/src/foo.c".into() });
    assert_eq!(
        outcomes["quux"],
        FallbackOutcome::Recorded { file: "/work/src/foo.c".into(), covered: true }
    );

    let model = correlator.model();
    assert_eq!(model.source_files.keys().filter(|k| k.ends_with("foo.c")).count(), 1);
    let foo_c = model.file("/work/src/foo.c").expect("dwarf key");
    assert_eq!(foo_c.functions["foo"], before, "line-attributed entry is untouched");
    assert!(foo_c.functions["quux"].covered);
    assert_eq!(foo_c.functions["quux"].line_number, 4);
}

#[test]
fn fallback_is_skipped_without_declaration_lookup() {
    let mut correlator = DisassemblyCorrelator::new(SourcePaths::new("/w", "/w", true), None);
    let functions = FunctionTable::from_symbols(vec![FunctionSymbol::new("foo", 0x10, 0x20)]);
    let mut search = SourceSearch::new("/nonexistent");
    let outcomes = correlator
        .apply_no_source_fallback(&functions, &ExecutionTraceStore::new(), &mut search)
        .expect("skipped");
    assert!(outcomes.is_empty());
}
