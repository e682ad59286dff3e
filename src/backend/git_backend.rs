//! The uniform read interface over git-hosting backends.
//!
//! The core treats decentralized mirrors and conventional hosted services
//! through the same shape: a flat file tree per branch, and individual file
//! blobs. Protocol-specific translation lives in the implementations.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sources::SourceCandidate;

// =============================================================================
// Error Types
// =============================================================================

/// Error type for backend read operations.
///
/// A backend failing is never fatal for resolution; callers absorb these
/// into per-candidate status.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The tree, branch, or file does not exist on this backend.
    #[error("not found")]
    NotFound,

    /// The backend could not be reached or answered unexpectedly.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

// =============================================================================
// FileEntry
// =============================================================================

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
}

/// One entry in a repository's flat file tree.
///
/// `path` uses forward-slash separators and is always relative to the
/// repository root, with no leading slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub entry_type: EntryType,
    pub size: u64,
    /// Inline content for small files carried in the announcement itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_binary: Option<bool>,
}

impl FileEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: normalize_tree_path(&path.into()),
            entry_type: EntryType::File,
            size,
            content: None,
            is_binary: None,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: normalize_tree_path(&path.into()),
            entry_type: EntryType::Dir,
            size: 0,
            content: None,
            is_binary: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Enforce the tree-path invariant: forward slashes, relative, no leading
/// slash.
pub fn normalize_tree_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches('/')
        .trim_end_matches('/')
        .to_string()
}

// =============================================================================
// GitBackend Trait
// =============================================================================

/// Read interface over one backend kind.
///
/// The owning repository is identified by the candidate URL; implementations
/// derive owner/repo from its path.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Fetch the flat file tree for a branch.
    async fn fetch_tree(&self, candidate: &SourceCandidate, branch: &str)
        -> Result<Vec<FileEntry>>;

    /// Fetch one file's raw bytes.
    async fn fetch_file(
        &self,
        candidate: &SourceCandidate,
        path: &str,
        branch: &str,
    ) -> Result<Bytes>;
}

/// Characters escaped inside a URL path segment.
const PATH_SEGMENT: &percent_encoding::AsciiSet = &percent_encoding::CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'?')
    .add(b'/')
    .add(b'\\');

/// Percent-encode a tree path for use in a backend URL, keeping `/`
/// separators intact.
pub(crate) fn encode_tree_path(path: &str) -> String {
    path.split('/')
        .map(|seg| percent_encoding::utf8_percent_encode(seg, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a candidate URL's path into (owner, repo).
pub(crate) fn owner_repo_of(candidate: &SourceCandidate) -> Result<(String, String)> {
    let url = url::Url::parse(&candidate.url)
        .map_err(|e| BackendError::Unavailable(format!("bad candidate url: {}", e)))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [.., owner, repo] => Ok((
            owner.to_string(),
            repo.trim_end_matches(".git").to_string(),
        )),
        _ => Err(BackendError::Unavailable(format!(
            "candidate url has no owner/repo path: {}",
            candidate.url
        ))),
    }
}
