//! JSON node files on disk.
//!
//! # Responsibility
//! - Load and save one record per file.
//! - Enumerate node files by extension under a directory tree.
//! - Relocate node files and prune the directories they leave empty.
//!
//! # Invariants
//! - Saving creates missing parent directories.
//! - Directory scans are recursive and return paths in sorted order.

use crate::model::record::Record;
use crate::repo::{RepoError, RepoResult};
use log::debug;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RepoError + '_ {
    move |source| RepoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads one JSON value from `path`.
pub fn load_value(path: &Path) -> RepoResult<Value> {
    let raw = fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&raw).map_err(|source| RepoError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and decodes one node record from `path`.
pub fn load_record<T: Record>(path: &Path) -> RepoResult<T> {
    let value = load_value(path)?;
    T::from_record(&value).map_err(|source| RepoError::Record {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `value` as pretty JSON, creating parent directories.
pub fn save_value(path: &Path, value: &Value) -> RepoResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let raw = serde_json::to_string_pretty(value).map_err(|source| RepoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, raw).map_err(io_error(path))?;
    debug!(
        "event=file_save module=repo status=ok path={}",
        path.display()
    );
    Ok(())
}

pub fn save_record<T: Record>(path: &Path, node: &T) -> RepoResult<()> {
    save_value(path, &node.to_record())
}

/// Lists files under `root` whose name ends with `.{extension}`.
///
/// A missing `root` yields an empty list.
pub fn list_files_with_extension(root: &Path, extension: &str) -> RepoResult<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| walk_error(root, err))?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == extension)
        {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

fn walk_error(root: &Path, err: walkdir::Error) -> RepoError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop while scanning"));
    RepoError::Io { path, source }
}

/// Moves a file or directory from `from` to `to`, creating `to`'s parent.
pub fn relocate(from: &Path, to: &Path) -> RepoResult<()> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::rename(from, to).map_err(io_error(from))?;
    debug!(
        "event=file_move module=repo status=ok from={} to={}",
        from.display(),
        to.display()
    );
    Ok(())
}

/// Removes `dir` and then its parents while they are empty, stopping at
/// `root`. Directories that still hold anything are left alone.
pub fn remove_empty_dirs(root: &Path, dir: &Path) {
    let mut current = dir;
    while current != root && current.starts_with(root) {
        if fs::remove_dir(current).is_err() {
            break;
        }
        debug!(
            "event=dir_prune module=repo status=ok path={}",
            current.display()
        );
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{list_files_with_extension, load_value, relocate, remove_empty_dirs, save_value};
    use crate::repo::RepoError;
    use serde_json::json;
    use std::fs;

    #[test]
    fn scan_is_recursive_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        save_value(&dir.path().join("a.bbdef"), &json!({})).unwrap();
        save_value(&dir.path().join("nested/deeper/b.bbdef"), &json!({})).unwrap();
        save_value(&dir.path().join("nested/c.bbitem"), &json!({})).unwrap();

        let found = list_files_with_extension(dir.path(), "bbdef").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|path| path.extension().unwrap() == "bbdef"));
        assert!(found.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(list_files_with_extension(&dir.path().join("missing"), "bbdef")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn invalid_json_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bbdoc");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_value(&path), Err(RepoError::Json { .. })));
    }

    #[test]
    fn relocate_moves_directories() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("old");
        save_value(&from.join("x.bbitem"), &json!({ "k": 1 })).unwrap();
        let to = dir.path().join("new/place");
        relocate(&from, &to).unwrap();
        assert_eq!(load_value(&to.join("x.bbitem")).unwrap(), json!({ "k": 1 }));
        assert!(!from.exists());
    }

    #[test]
    fn pruning_stops_at_first_non_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("p");
        save_value(&keep.join("p.bbproj"), &json!({})).unwrap();
        let leaf = keep.join("d/inner");
        fs::create_dir_all(&leaf).unwrap();

        remove_empty_dirs(dir.path(), &leaf);

        assert!(!keep.join("d").exists());
        assert!(keep.join("p.bbproj").is_file());
        remove_empty_dirs(dir.path(), dir.path());
        assert!(dir.path().is_dir());
    }
}
