use std::fs;
use std::path::Path;

use tracecov_core::diagnostics::{write_diagnostics_log, DiagnosticKind};
use tracecov_core::model::IntermediateCoverageModel;
use tracecov_core::services::pipeline::write_report;
use tracecov_core::services::report::ReportEmitter;

const SOURCE: &str = "int helper(void)
{
    return 1;
}
int main(void)
{
    if (helper()) {
        return 0;
    }
    return 1;
}
";

fn sample_model() -> IntermediateCoverageModel {
    let mut model = IntermediateCoverageModel::new();
    let file = model.file_mut("src/a.c");
    file.function_entry("helper", 1).covered = true;
    file.function_entry("main", 5).covered = true;
    file.line_entry(3).record(0, 0x100, "52800020 \tmov\tw0, #0x1", 1);
    file.line_entry(7).record(0, 0x110, "34000060 \tcbz\tw0, 11c <main+0xc>", 1);
    file.line_entry(8).record(0, 0x114, "52800000 \tmov\tw0, #0x0", 0);
    file.line_entry(10).record(0, 0x11c, "52800020 \tmov\tw0, #0x1", 1);
    model.file_mut("src/gone.c").function_entry("lost", 3);
    model
}

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("src")).expect("mkdir");
    fs::write(dir.path().join("src/a.c"), SOURCE).expect("write source");
    dir
}

fn expected_record(sf: &Path) -> String {
    format!(
        "TN:\nSF:{}\nFN:1,helper\nFN:5,main\nFNDA:1,helper\nFNDA:1,main\nFNF:2\nFNH:2\n\
         BRDA:7,0,0,0\nBRDA:7,0,1,1\nBRF:2\nBRH:1\n\
         DA:3,1\nDA:7,1\nDA:8,0\nDA:10,1\nLF:4\nLH:3\nend_of_record\n\n",
        sf.display()
    )
}

#[test]
fn emits_one_record_per_existing_file() {
    let dir = workspace();
    let mut out = Vec::new();
    let summary = ReportEmitter::new(dir.path()).emit(&sample_model(), &mut out).expect("emit");

    let sf = dir.path().join("src/a.c");
    assert_eq!(String::from_utf8(out).expect("utf8"), expected_record(&sf));

    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.skipped, vec!["src/gone.c".to_string()]);
    assert_eq!(summary.diagnostics.len(), 1);
    assert_eq!(summary.diagnostics[0].kind, DiagnosticKind::MissingSourceFile);
}

#[test]
fn totals_respect_found_hit_ordering() {
    let dir = workspace();
    let summary = ReportEmitter::new(dir.path()).emit(&sample_model(), &mut Vec::new()).expect("emit");
    for file in &summary.files {
        assert!(file.functions_found >= file.functions_hit);
        assert!(file.lines_found >= file.lines_hit);
        assert!(file.branches_found >= file.branches_hit);
    }
    let total = summary.totals();
    assert_eq!((total.lines_found, total.lines_hit), (4, 3));
    assert_eq!((total.branches_found, total.branches_hit), (2, 1));
}

#[test]
fn report_stage_reads_the_document_and_writes_the_tracefile() {
    let dir = workspace();
    let json = dir.path().join("intermediate.json");
    sample_model().save(&json).expect("save");
    let info = dir.path().join("coverage.info");

    let first = write_report(&json, dir.path(), &info).expect("report");
    let first_text = fs::read_to_string(&info).expect("read info");
    write_report(&json, dir.path(), &info).expect("report again");
    assert_eq!(fs::read_to_string(&info).expect("read info"), first_text, "output is stable");

    let sf = dir.path().join("src/a.c");
    assert_eq!(first_text, expected_record(&sf));
    assert_eq!(first.files.len(), 1);
}

#[test]
fn diagnostics_log_has_a_header_and_one_line_per_entry() {
    let dir = workspace();
    let summary = ReportEmitter::new(dir.path()).emit(&sample_model(), &mut Vec::new()).expect("emit");
    let mut log = Vec::new();
    write_diagnostics_log(&mut log, "2026-01-01T00:00:00+00:00", &summary.diagnostics).expect("log");
    let text = String::from_utf8(log).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("2026-01-01T00:00:00+00:00"));
    assert!(lines[1].starts_with("src/gone.c: [missing-source-file]"));
}

#[cfg(unix)]
#[test]
fn source_paths_keep_symlinked_workspace_as_named() {
    let dir = workspace();
    let outer = tempfile::tempdir().expect("tempdir");
    let link = outer.path().join("ws-link");
    std::os::unix::fs::symlink(dir.path(), &link).expect("symlink");

    let mut out = Vec::new();
    ReportEmitter::new(link.join("src/..")).emit(&sample_model(), &mut out).expect("emit");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains(&format!("SF:{}\n", link.join("src/a.c").display())), "{text}");
}
