//! File provider for text sources.

use crate::error::StageError;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of listing a directory tree.
#[derive(Debug, Default)]
pub struct FileListing {
  /// Regular files, sorted lexicographically by path.
  pub files: Vec<PathBuf>,
  /// Entries that could not be listed.
  pub errors: Vec<StageError>,
}

/// Recursively lists regular files under `root`.
///
/// Unreadable entries (including a missing root) are collected as
/// [`StageError::SourceRead`] instead of aborting the walk.
pub fn list_files(root: impl AsRef<Path>) -> FileListing {
  let root = root.as_ref();
  let mut listing = FileListing::default();

  for entry in WalkDir::new(root).follow_links(true) {
    match entry {
      Ok(entry) if entry.file_type().is_file() => listing.files.push(entry.into_path()),
      Ok(_) => {}
      Err(err) => {
        let path = err.path().unwrap_or(root).to_path_buf();
        let source = err
          .into_io_error()
          .unwrap_or_else(|| io::Error::other("filesystem loop"));
        listing.errors.push(StageError::SourceRead { path, source });
      }
    }
  }

  listing.files.sort();
  listing
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn test_lists_nested_files_sorted() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("b")).unwrap();
    fs::write(dir.path().join("b/two.txt"), "x").unwrap();
    fs::write(dir.path().join("a.txt"), "x").unwrap();
    fs::write(dir.path().join("c.txt"), "x").unwrap();

    let listing = list_files(dir.path());
    let names: Vec<_> = listing
      .files
      .iter()
      .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
      .collect();

    assert!(listing.errors.is_empty());
    assert_eq!(
      names,
      vec![
        PathBuf::from("a.txt"),
        PathBuf::from("b/two.txt"),
        PathBuf::from("c.txt"),
      ]
    );
  }

  #[test]
  fn test_missing_root_is_reported() {
    let listing = list_files("/no/such/dir/for/tupleweave");
    assert!(listing.files.is_empty());
    assert_eq!(listing.errors.len(), 1);
    assert!(matches!(listing.errors[0], StageError::SourceRead { .. }));
  }
}
