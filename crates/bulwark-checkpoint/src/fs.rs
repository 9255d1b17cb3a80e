//! Filesystem state backend.
//!
//! An `fs:` scope `/workspace/out` maps to `{root}/workspace/out`. The
//! target may be a file, a directory tree or absent; restore brings it back
//! to whichever it was. Symlinks and special files are neither captured nor
//! removed.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bulwark_capabilities::ResourceClass;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CheckpointError, CheckpointResult};
use crate::scope::ScopeEntry;
use crate::state::{Blob, ScopeState, StateStore};

/// Default snapshot ceiling per scope entry: 64 MiB.
pub const DEFAULT_MAX_SNAPSHOT_BYTES: u64 = 67_108_864;

/// Captures and restores `fs:` scopes under a root directory.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    root: PathBuf,
    max_snapshot_bytes: u64,
}

impl FsStateStore {
    /// Map absolute `fs:` scopes onto `root` (use `/` for the host
    /// filesystem).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }

    /// Refuse snapshots larger than `bytes` per scope entry.
    #[must_use]
    pub fn with_max_snapshot_bytes(mut self, bytes: u64) -> Self {
        self.max_snapshot_bytes = bytes;
        self
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, entry: &ScopeEntry) -> CheckpointResult<PathBuf> {
        if entry.class != ResourceClass::Fs {
            return Err(CheckpointError::Unsupported { class: entry.class });
        }
        if entry.path.is_empty() {
            return Err(CheckpointError::ScopeTooBroad {
                entry: entry.to_string(),
            });
        }
        Ok(entry.path.iter().fold(self.root.clone(), |p, s| p.join(s)))
    }
}

fn relative_key(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

fn join_key(base: &Path, key: &str) -> PathBuf {
    if key.is_empty() {
        base.to_path_buf()
    } else {
        key.split('/').fold(base.to_path_buf(), |p, s| p.join(s))
    }
}

fn capture_blocking(entry: &ScopeEntry, target: &Path, limit: u64) -> CheckpointResult<ScopeState> {
    let mut state = ScopeState::for_entry(entry);
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(state),
        Err(e) => return Err(CheckpointError::io(target, e)),
    };

    if meta.is_file() {
        if meta.len() > limit {
            return Err(CheckpointError::SnapshotTooLarge {
                entry: entry.to_string(),
                limit,
            });
        }
        let bytes = fs::read(target).map_err(|e| CheckpointError::io(target, e))?;
        state.items.insert(String::new(), Blob(bytes));
        return Ok(state);
    }
    if !meta.is_dir() {
        warn!(path = %target.display(), "scope target is not a file or directory");
        return Ok(state);
    }

    let mut total: u64 = 0;
    for item in WalkDir::new(target).follow_links(false) {
        let item = item.map_err(|e| {
            let path = e.path().map_or_else(|| target.to_path_buf(), Path::to_path_buf);
            CheckpointError::io(path, e.into())
        })?;
        let key = relative_key(target, item.path());
        let file_type = item.file_type();
        if file_type.is_dir() {
            state.containers.insert(key);
        } else if file_type.is_file() {
            let len = item
                .metadata()
                .map_err(|e| CheckpointError::io(item.path(), e.into()))?
                .len();
            total = total.saturating_add(len);
            if total > limit {
                return Err(CheckpointError::SnapshotTooLarge {
                    entry: entry.to_string(),
                    limit,
                });
            }
            let bytes = fs::read(item.path()).map_err(|e| CheckpointError::io(item.path(), e))?;
            state.items.insert(key, Blob(bytes));
        } else {
            debug!(path = %item.path().display(), "skipping non-regular file");
        }
    }
    Ok(state)
}

fn remove_any(path: &Path) -> CheckpointResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CheckpointError::io(path, e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| CheckpointError::io(path, e))
}

fn write_if_changed(path: &Path, bytes: &[u8]) -> CheckpointResult<()> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.is_dir() {
            remove_any(path)?;
        } else if meta.is_file() && fs::read(path).is_ok_and(|current| current == bytes) {
            return Ok(());
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| CheckpointError::io(path, e))
}

fn restore_blocking(target: &Path, state: &ScopeState) -> CheckpointResult<()> {
    // Target was a single file.
    if let Some(blob) = state.items.get("") {
        return write_if_changed(target, &blob.0);
    }
    // Target did not exist.
    if !state.containers.contains("") {
        return remove_any(target);
    }

    if fs::symlink_metadata(target).is_ok_and(|m| !m.is_dir()) {
        remove_any(target)?;
    }
    fs::create_dir_all(target).map_err(|e| CheckpointError::io(target, e))?;

    // Remove what the snapshot does not know about, deepest first.
    let mut extras = Vec::new();
    for item in WalkDir::new(target).follow_links(false).contents_first(true) {
        let item = item.map_err(|e| {
            let path = e.path().map_or_else(|| target.to_path_buf(), Path::to_path_buf);
            CheckpointError::io(path, e.into())
        })?;
        let key = relative_key(target, item.path());
        if key.is_empty() {
            continue;
        }
        let known = if item.file_type().is_dir() {
            state.containers.contains(&key)
        } else if item.file_type().is_file() {
            state.items.contains_key(&key)
        } else {
            true
        };
        if !known {
            extras.push(item.path().to_path_buf());
        }
    }
    for path in extras {
        remove_any(&path)?;
    }

    for dir in state.containers.iter().filter(|k| !k.is_empty()) {
        let path = join_key(target, dir);
        if fs::symlink_metadata(&path).is_ok_and(|m| !m.is_dir()) {
            remove_any(&path)?;
        }
        fs::create_dir_all(&path).map_err(|e| CheckpointError::io(&path, e))?;
    }
    for (key, blob) in &state.items {
        write_if_changed(&join_key(target, key), &blob.0)?;
    }
    Ok(())
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn capture(&self, entry: &ScopeEntry) -> CheckpointResult<ScopeState> {
        let target = self.target(entry)?;
        let limit = self.max_snapshot_bytes;
        let owned = entry.clone();
        let state = tokio::task::spawn_blocking(move || capture_blocking(&owned, &target, limit))
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))??;
        debug!(
            entry = %entry,
            files = state.items.len(),
            bytes = state.byte_len(),
            "captured fs scope"
        );
        Ok(state)
    }

    async fn restore(&self, entry: &ScopeEntry, state: &ScopeState) -> CheckpointResult<()> {
        let target = self.target(entry)?;
        let owned = state.clone();
        tokio::task::spawn_blocking(move || restore_blocking(&target, &owned))
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))??;
        debug!(entry = %entry, "restored fs scope");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &[&str]) -> ScopeEntry {
        ScopeEntry::new(ResourceClass::Fs, path.iter().copied())
    }

    #[tokio::test]
    async fn test_directory_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("workspace/out");
        fs::create_dir_all(dir.join("nested/empty")).unwrap();
        fs::write(dir.join("a.txt"), b"alpha").unwrap();
        fs::write(dir.join("nested/b.txt"), b"beta").unwrap();

        let states = FsStateStore::new(root.path());
        let scope = entry(&["workspace", "out"]);
        let snapshot = states.capture(&scope).await.unwrap();
        assert_eq!(snapshot.items.len(), 2);
        assert!(snapshot.containers.contains("nested/empty"));

        fs::write(dir.join("a.txt"), b"clobbered").unwrap();
        fs::remove_file(dir.join("nested/b.txt")).unwrap();
        fs::create_dir_all(dir.join("junk/deeper")).unwrap();
        fs::write(dir.join("junk/deeper/c.txt"), b"junk").unwrap();
        fs::remove_dir(dir.join("nested/empty")).unwrap();

        states.restore(&scope, &snapshot).await.unwrap();
        states.restore(&scope, &snapshot).await.unwrap();

        assert_eq!(fs::read(dir.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dir.join("nested/b.txt")).unwrap(), b"beta");
        assert!(dir.join("nested/empty").is_dir());
        assert!(!dir.join("junk").exists());
        assert_eq!(states.capture(&scope).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_single_file_and_absent_targets() {
        let root = tempfile::tempdir().unwrap();
        let states = FsStateStore::new(root.path());

        fs::write(root.path().join("notes.md"), b"v1").unwrap();
        let file_scope = entry(&["notes.md"]);
        let file_snapshot = states.capture(&file_scope).await.unwrap();
        fs::write(root.path().join("notes.md"), b"v2").unwrap();
        states.restore(&file_scope, &file_snapshot).await.unwrap();
        assert_eq!(fs::read(root.path().join("notes.md")).unwrap(), b"v1");

        let absent = entry(&["created-later"]);
        let absent_snapshot = states.capture(&absent).await.unwrap();
        fs::create_dir_all(root.path().join("created-later/x")).unwrap();
        states.restore(&absent, &absent_snapshot).await.unwrap();
        assert!(!root.path().join("created-later").exists());
    }

    #[tokio::test]
    async fn test_snapshot_ceiling() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("big")).unwrap();
        fs::write(root.path().join("big/a"), vec![0_u8; 600]).unwrap();
        fs::write(root.path().join("big/b"), vec![0_u8; 600]).unwrap();

        let states = FsStateStore::new(root.path()).with_max_snapshot_bytes(1000);
        let err = states.capture(&entry(&["big"])).await.unwrap_err();
        assert!(matches!(err, CheckpointError::SnapshotTooLarge { limit: 1000, .. }));
    }

    #[tokio::test]
    async fn test_root_scope_is_too_broad() {
        let states = FsStateStore::new("/");
        assert!(matches!(
            states.capture(&entry(&[])).await,
            Err(CheckpointError::ScopeTooBroad { .. })
        ));
    }
}
