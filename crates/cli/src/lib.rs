use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod commands;

/// Canonicalize a path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);
    if path == Path::new(".") {
        return env::current_dir().context("Failed to get current directory");
    }
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) => {
            let cwd = env::current_dir().context("Failed to get current directory")?;
            Ok(cwd.join(path))
        }
    }
}

/// Install the logger; `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .try_init();
}

/// Percentage with one decimal, `-` when nothing was found.
pub fn percent(hit: usize, found: usize) -> String {
    if found == 0 {
        "-".to_string()
    } else {
        format!("{:.1}%", hit as f64 * 100.0 / found as f64)
    }
}
