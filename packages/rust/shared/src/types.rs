//! Core domain types shared by every assetmirror crate.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Opaque session token returned by the logon service.
///
/// Shared read-only for the whole traversal. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Session(String);

impl Session {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, as sent in the `session` request attribute.
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Session(***)")
    }
}

// ---------------------------------------------------------------------------
// NamespacePath
// ---------------------------------------------------------------------------

/// Slash-delimited location in the remote namespace tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespacePath(String);

impl NamespacePath {
    /// Create a namespace path from its string form.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The namespace as sent in query filters.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace of a directory named `name` directly below this one.
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{}", self.0.trim_end_matches('/'), name))
    }

    /// Local directory (relative to the output root) this namespace mirrors into.
    pub fn local_path(&self) -> PathBuf {
        local_relative_path(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NamespacePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ---------------------------------------------------------------------------
// SnapshotKind
// ---------------------------------------------------------------------------

/// Which persisted copy of an asset retrieval a snapshot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Raw response of the content retrieval.
    Content,
    /// Raw response of the metadata retrieval.
    Metadata,
}

impl SnapshotKind {
    /// File name suffix, including the extension.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Content => "content.xml",
            Self::Metadata => "meta.xml",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content => f.write_str("content"),
            Self::Metadata => f.write_str("metadata"),
        }
    }
}

// ---------------------------------------------------------------------------
// Local path construction
// ---------------------------------------------------------------------------

/// Turn a remote display name into a path relative to some local directory.
///
/// Splits on `/`, drops empty, `.` and `..` segments and replaces spaces with `-`.
/// Returns `None` when nothing usable is left.
pub fn local_relative_path(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for segment in name.split(['/', '\\']) {
        let segment = segment.trim();
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        path.push(segment.replace(' ', "-"));
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}
