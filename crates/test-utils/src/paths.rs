//! Filesystem helpers for tests.

use std::path::{Path, PathBuf};

/// Creates a temporary directory for test output.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Write `contents` to `dir/relative`, creating parent directories.
pub fn write_file(dir: &Path, relative: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    std::fs::write(&path, contents).expect("Failed to write test file");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_file_creates_parents() {
        let dir = temp_test_dir();
        let path = write_file(dir.path(), "incoming/synop/a.csv", "x");
        assert!(path.exists());
    }
}
