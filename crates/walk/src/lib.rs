#![deny(unsafe_code)]

//! # Overview
//!
//! `walk` enumerates the files a transfer run will attempt: the regular
//! files directly inside the source directory, in a deterministic order.
//! `.` and `..` are never candidates, subdirectories and special files are
//! skipped, and names the wire format cannot carry (non-UTF-8, or longer
//! than the protocol's basename limit) are skipped with a diagnostic rather
//! than failing the whole run.
//!
//! Results are sorted by basename so repeated runs over the same tree visit
//! files in the same order.

use std::path::{Path, PathBuf};

use logging::debug_log;
use thiserror::Error;

/// Longest basename the wire format can carry, in bytes.
pub const MAX_BASENAME: usize = 255;

/// Why the source directory could not be enumerated.
#[derive(Debug, Error)]
pub enum WalkError {
    /// The path does not exist or could not be inspected.
    #[error("cannot stat source directory {path}: {source}")]
    Inaccessible {
        /// Path that was being enumerated.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The path exists but is not a directory.
    #[error("{path} exists but is not a directory")]
    NotADirectory {
        /// Path that was being enumerated.
        path: PathBuf,
    },
}

/// One transfer candidate: a regular file and its basename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    /// Full path to the file.
    pub path: PathBuf,
    /// Basename as it will travel on the wire.
    pub name: String,
}

/// Enumerates the regular files directly inside `dir`, sorted by basename.
pub fn source_files(dir: &Path) -> Result<Vec<SourceFile>, WalkError> {
    let metadata = std::fs::metadata(dir).map_err(|source| WalkError::Inaccessible {
        path: dir.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(WalkError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|source| WalkError::Inaccessible {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        match entry.file_type() {
            Ok(kind) if kind.is_file() => {}
            _ => {
                debug_log!(Io, 2, "skipping non-regular entry {}", path.display());
                continue;
            }
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            debug_log!(Io, 1, "skipping non-UTF-8 name {}", path.display());
            continue;
        };
        if name.len() > MAX_BASENAME {
            debug_log!(Io, 1, "skipping overlong basename ({} bytes)", name.len());
            continue;
        }
        files.push(SourceFile { path, name });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn lists_regular_files_sorted_by_name() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("b.txt"), b"b").expect("write");
        fs::write(dir.path().join("a.txt"), b"a").expect("write");
        fs::write(dir.path().join("c.txt"), b"c").expect("write");

        let files = source_files(dir.path()).expect("walk");
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn skips_subdirectories() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("file"), b"x").expect("write");
        fs::create_dir(dir.path().join("nested")).expect("mkdir");

        let files = source_files(dir.path()).expect("walk");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "file");
    }

    #[test]
    fn accepts_basename_of_maximum_length() {
        let dir = tempdir().expect("tempdir");
        let longest = "x".repeat(MAX_BASENAME);
        fs::write(dir.path().join(&longest), b"x").expect("write");

        let files = source_files(dir.path()).expect("walk");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, longest);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let gone = dir.path().join("absent");
        assert!(matches!(
            source_files(&gone),
            Err(WalkError::Inaccessible { .. })
        ));
    }

    #[test]
    fn file_path_is_not_a_directory() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("plain");
        fs::write(&file, b"x").expect("write");
        assert!(matches!(
            source_files(&file),
            Err(WalkError::NotADirectory { .. })
        ));
    }

    #[test]
    fn empty_directory_yields_no_files() {
        let dir = tempdir().expect("tempdir");
        assert!(source_files(dir.path()).expect("walk").is_empty());
    }
}
