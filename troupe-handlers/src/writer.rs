//! Hash-gated atomic file writes inside a project root.
//!
//! ## `atomic_write` protocol
//!
//! 1. Normalise line endings of the new content to LF.
//! 2. SHA-256 hash the new content and the file currently on disk.
//! 3. Skip if identical.
//! 4. Write to `<path>.troupe.tmp`.
//! 5. Rename to final path (atomic on POSIX).

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, HandlerError};

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File was skipped; its content already matched.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path } | WriteResult::Unchanged { path } => path,
        }
    }
}

/// Join a task-supplied relative path onto `root`.
///
/// Absolute paths, drive prefixes and `..` components are rejected so a
/// task can never write outside the project.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, HandlerError> {
    let candidate = Path::new(relative);
    let escapes = candidate.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || relative.is_empty() {
        return Err(HandlerError::PathEscapesRoot {
            path: candidate.to_path_buf(),
        });
    }
    Ok(root.join(candidate))
}

/// Atomically replace `path` with `content` unless it already holds it.
pub fn atomic_write(path: &Path, content: &str) -> Result<WriteResult, HandlerError> {
    write_if_changed(path, &normalize(content), &tmp_path(path))
}

/// Append `text` to `path` (created if absent) with the same tmp + rename
/// protocol as [`atomic_write`].
///
/// Only `text` is normalised to LF; bytes already in the file are kept as
/// they are.
pub fn append(path: &Path, text: &str) -> Result<WriteResult, HandlerError> {
    let mut content = read_optional(path)?.unwrap_or_default();
    content.push_str(&normalize(text));
    write_if_changed(path, &content, &tmp_path(path))
}

/// File contents, or `None` if the file does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>, HandlerError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

fn normalize(content: &str) -> String {
    content.replace("\r\n", "\n")
}

fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.troupe.tmp", path.display()))
}

fn write_if_changed(path: &Path, content: &str, tmp: &Path) -> Result<WriteResult, HandlerError> {
    let digest = sha256_hex(content.as_bytes());
    if let Some(current) = read_bytes_optional(path)? {
        if sha256_hex(&current) == digest {
            tracing::debug!(path = %path.display(), "unchanged");
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!(path = %path.display(), "wrote");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

fn read_bytes_optional(path: &Path) -> Result<Option<Vec<u8>>, HandlerError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn first_write_creates_parents() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("scripts").join("systems").join("SkillTree.gd");
        let result = atomic_write(&path, "extends Node\n").expect("write");
        assert!(matches!(result, WriteResult::Written { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "extends Node\n");
    }

    #[test]
    fn identical_content_is_not_rewritten() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("file.gd");
        atomic_write(&path, "same").expect("first");
        let mtime_1 = fs::metadata(&path).expect("meta").modified().expect("mtime");

        std::thread::sleep(Duration::from_millis(20));
        let result = atomic_write(&path, "same").expect("second");

        assert!(matches!(result, WriteResult::Unchanged { .. }));
        let mtime_2 = fs::metadata(&path).expect("meta").modified().expect("mtime");
        assert_eq!(mtime_1, mtime_2, "file was rewritten");
    }

    #[test]
    fn crlf_and_lf_content_are_the_same() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("normalize.md");
        atomic_write(&path, "line1\r\nline2\r\n").expect("first");
        let second = atomic_write(&path, "line1\nline2\n").expect("second");
        assert!(matches!(second, WriteResult::Unchanged { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "line1\nline2\n");
    }

    #[test]
    fn tmp_file_removed_after_write() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("clean.md");
        atomic_write(&path, "data").expect("write");
        assert!(!tmp.path().join("clean.md.troupe.tmp").exists());
    }

    #[test]
    fn append_creates_then_extends() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("docs").join("log.md");
        append(&path, "first").expect("append");
        append(&path, " second").expect("append");
        assert_eq!(fs::read_to_string(&path).expect("read"), "first second");
    }

    #[test]
    fn append_keeps_existing_line_endings() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("notes.md");
        fs::write(&path, "line1\r\nline2\r\n").expect("write");

        append(&path, "line3\r\n").expect("append");
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "line1\r\nline2\r\nline3\n"
        );
    }

    #[rstest]
    #[case("../outside.txt")]
    #[case("a/../../b")]
    #[case("/etc/passwd")]
    #[case("")]
    fn resolve_rejects_escaping_paths(#[case] relative: &str) {
        let err = resolve(Path::new("/project"), relative).unwrap_err();
        assert!(matches!(err, HandlerError::PathEscapesRoot { .. }));
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let path = resolve(Path::new("/project"), "./data/items.json").expect("resolve");
        assert_eq!(path, PathBuf::from("/project/./data/items.json"));
    }

    #[test]
    #[cfg(unix)]
    fn rename_failure_leaves_original_and_cleans_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().expect("tempdir");
        let readonly_dir = root.path().join("readonly");
        fs::create_dir_all(&readonly_dir).expect("mkdir");
        let path = readonly_dir.join("file.md");
        fs::write(&path, "original").expect("write");

        let mut perms = fs::metadata(&readonly_dir).expect("meta").permissions();
        perms.set_mode(0o555);
        fs::set_permissions(&readonly_dir, perms).expect("chmod");

        let tmp_dir = TempDir::new().expect("tempdir");
        let tmp_file = tmp_dir.path().join("file.md.troupe.tmp");
        let result = write_if_changed(&path, "new content", &tmp_file);

        let mut perms = fs::metadata(&readonly_dir).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&readonly_dir, perms).expect("chmod");

        // Root ignores directory permissions; only check when the write failed.
        if result.is_err() {
            assert_eq!(fs::read_to_string(&path).expect("read"), "original");
            assert!(!tmp_file.exists(), ".troupe.tmp should be cleaned up");
        }
    }
}
