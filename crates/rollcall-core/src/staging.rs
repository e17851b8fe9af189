//! Temp files created next to their destination so `persist` is a rename
//! within one filesystem.

use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

/// Open an anonymous temp file in the directory that will hold `target`.
pub(crate) fn beside(target: &Path) -> io::Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    NamedTempFile::new_in(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_file_lands_in_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = beside(&dir.path().join("out.csv")).unwrap();
        assert_eq!(tmp.path().parent(), Some(dir.path()));
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(beside(&dir.path().join("nope").join("out.csv")).is_err());
    }
}
