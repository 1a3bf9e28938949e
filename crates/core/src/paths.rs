use std::path::{Path, PathBuf};

/// Maps between source paths recorded in DWARF, files in the local tree, and
/// model keys.
///
/// The build workspace is the prefix the binaries were compiled under; the
/// local workspace is where those sources live now (often the same directory).
#[derive(Debug, Clone)]
pub struct SourcePaths {
    pub build_root: PathBuf,
    pub local_root: PathBuf,
    /// Store keys relative to the workspace instead of absolute.
    pub relative: bool,
}

impl SourcePaths {
    pub fn new(build_root: impl Into<PathBuf>, local_root: impl Into<PathBuf>, relative: bool) -> Self {
        Self { build_root: build_root.into(), local_root: local_root.into(), relative }
    }

    /// Model key for a path taken from the disassembly's source attribution.
    pub fn key_for_build_path(&self, path: &str) -> String {
        if self.relative {
            if let Ok(rel) = Path::new(path).strip_prefix(&self.build_root) {
                return rel.to_string_lossy().to_string();
            }
        }
        path.to_string()
    }

    /// Model key for a file discovered in the local tree.
    ///
    /// In absolute mode the file is re-rooted under the build workspace so it
    /// agrees with keys produced from DWARF paths.
    pub fn key_for_local_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.local_root) {
            Ok(rel) if self.relative => rel.to_string_lossy().to_string(),
            Ok(rel) => self.build_root.join(rel).to_string_lossy().to_string(),
            Err(_) => path.to_string_lossy().to_string(),
        }
    }

    /// Where the file behind a model key lives on local disk.
    pub fn local_path(&self, key: &str) -> PathBuf {
        let key_path = Path::new(key);
        if key_path.is_absolute() {
            match key_path.strip_prefix(&self.build_root) {
                Ok(rel) => self.local_root.join(rel),
                Err(_) => key_path.to_path_buf(),
            }
        } else {
            self.local_root.join(key_path)
        }
    }
}
