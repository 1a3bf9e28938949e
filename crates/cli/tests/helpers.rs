use std::path::Path;

use tempfile::tempdir;
use tracecov::{canonicalize_or_current, percent};

#[test]
fn canonicalize_or_current_resolves_existing_relative_path() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    std::fs::create_dir_all(&subdir).expect("create nested");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current("nested").expect("canonicalize nested");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));

    std::env::set_current_dir(original).expect("restore cwd");
}

#[test]
fn canonicalize_or_current_keeps_missing_paths_absolute() {
    let result = canonicalize_or_current("does/not/exist").expect("fallback");
    assert!(result.is_absolute());
    assert!(result.ends_with(Path::new("does/not/exist")));
}

#[test]
fn percent_formats_one_decimal_and_handles_empty_sets() {
    assert_eq!(percent(1, 3), "33.3%");
    assert_eq!(percent(2, 2), "100.0%");
    assert_eq!(percent(0, 0), "-");
}
