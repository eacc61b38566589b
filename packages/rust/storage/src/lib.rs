//! Filesystem output sink for mirrored snapshots.
//!
//! The [`SnapshotStore`] writes named blobs under an output root. Paths are
//! relative to the root; parent directories are created on demand and an
//! existing file is overwritten, never appended to or renamed aside.
//!
//! **Write rules:**
//! - bytes go to a temporary sibling first and are renamed over the target
//! - identical content (SHA-256) is left untouched and reported [`WriteOutcome::Unchanged`]

use std::path::{Path, PathBuf};

use assetmirror_shared::{MirrorError, Result, SnapshotKind};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// What a write did to the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The file did not exist before.
    Created,
    /// The file existed with different content and was replaced.
    Updated,
    /// The file already held exactly these bytes.
    Unchanged,
}

impl WriteOutcome {
    /// Whether bytes were actually written.
    pub fn wrote(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Path-addressed blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at `root`. Nothing is touched on disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a root-relative path.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Make sure the directory `relative` exists.
    pub async fn ensure_dir(&self, relative: &Path) -> Result<()> {
        let dir = self.resolve(relative);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MirrorError::io(&dir, e))
    }

    /// Write `bytes` to `relative`, creating parents and overwriting any previous file.
    pub async fn write_file(&self, relative: &Path, bytes: &[u8]) -> Result<WriteOutcome> {
        let target = self.resolve(relative);

        let outcome = match tokio::fs::read(&target).await {
            Ok(existing) if digest(&existing) == digest(bytes) => {
                debug!(path = %target.display(), "content unchanged");
                return Ok(WriteOutcome::Unchanged);
            }
            Ok(_) => WriteOutcome::Updated,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => WriteOutcome::Created,
            Err(e) => return Err(MirrorError::io(&target, e)),
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::io(parent, e))?;
        }

        let tmp = temp_sibling(&target);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| MirrorError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| MirrorError::io(&target, e))?;

        debug!(path = %target.display(), bytes = bytes.len(), ?outcome, "wrote file");
        Ok(outcome)
    }

    /// Write a raw response snapshot for asset `id` mirrored at `asset_path`.
    pub async fn write_snapshot(
        &self,
        asset_path: &Path,
        id: &str,
        kind: SnapshotKind,
        body: &[u8],
    ) -> Result<WriteOutcome> {
        self.write_file(&snapshot_path(asset_path, id, kind), body)
            .await
    }

    /// Write `value` as pretty JSON.
    pub async fn write_json<T: Serialize>(&self, relative: &Path, value: &T) -> Result<WriteOutcome> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| MirrorError::parse(format!("failed to serialize {}: {e}", relative.display())))?;
        self.write_file(relative, &json).await
    }
}

/// Deterministic snapshot location: `<asset_path>-<id>.<kind suffix>`.
pub fn snapshot_path(asset_path: &Path, id: &str, kind: SnapshotKind) -> PathBuf {
    let mut name = asset_path.as_os_str().to_owned();
    name.push(format!("-{id}.{}", kind.suffix()));
    PathBuf::from(name)
}

fn temp_sibling(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_owned())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

fn digest(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_store() -> SnapshotStore {
        SnapshotStore::new(std::env::temp_dir().join(format!("am_store_{}", Uuid::now_v7())))
    }

    #[test]
    fn snapshot_names_are_deterministic() {
        let path = Path::new("proj").join("img.png");
        assert_eq!(
            snapshot_path(&path, "1001", SnapshotKind::Content),
            Path::new("proj").join("img.png-1001.content.xml")
        );
        assert_eq!(
            snapshot_path(&path, "1001", SnapshotKind::Metadata),
            Path::new("proj").join("img.png-1001.meta.xml")
        );
    }

    #[tokio::test]
    async fn write_creates_parents() {
        let store = test_store();
        let rel = Path::new("a").join("b").join("c.xml");

        let outcome = store.write_file(&rel, b"<x/>").await.expect("write");
        assert_eq!(outcome, WriteOutcome::Created);
        assert_eq!(std::fs::read(store.resolve(&rel)).unwrap(), b"<x/>");

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn rewrite_reports_unchanged_or_updated() {
        let store = test_store();
        let rel = PathBuf::from("file.xml");

        store.write_file(&rel, b"one").await.unwrap();
        assert_eq!(
            store.write_file(&rel, b"one").await.unwrap(),
            WriteOutcome::Unchanged
        );
        assert_eq!(
            store.write_file(&rel, b"two").await.unwrap(),
            WriteOutcome::Updated
        );
        assert_eq!(std::fs::read(store.resolve(&rel)).unwrap(), b"two");

        // No temporary files left behind.
        let entries: Vec<_> = std::fs::read_dir(store.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn snapshot_and_json_writes() {
        let store = test_store();
        let asset = Path::new("proj").join("my-doc.pdf");

        store
            .write_snapshot(&asset, "7", SnapshotKind::Content, b"<response/>")
            .await
            .unwrap();
        store
            .write_json(Path::new("json/my-doc.pdf.asset-element.json"), &vec!["a", "b"])
            .await
            .unwrap();

        assert!(store.resolve(&asset.with_file_name("my-doc.pdf-7.content.xml")).is_file());
        let json = std::fs::read_to_string(store.resolve(Path::new("json/my-doc.pdf.asset-element.json"))).unwrap();
        assert!(json.contains("\"a\""));

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn ensure_dir_is_idempotent() {
        let store = test_store();
        store.ensure_dir(Path::new("x/y")).await.unwrap();
        store.ensure_dir(Path::new("x/y")).await.unwrap();
        assert!(store.resolve(Path::new("x/y")).is_dir());

        let _ = std::fs::remove_dir_all(store.root());
    }
}
