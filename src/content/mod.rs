//! Per-file content resolution.
//!
//! Reads go through a fixed priority chain: content embedded in the tree
//! entry itself, then an unpublished local edit, then the cached tree
//! record, and only then the network. Remote attempts walk the sources that
//! already produced this repository's tree (in the order they succeeded)
//! before falling back to the full candidate list. On conventional hosted
//! services the requested branch is tried first, then `main`, then
//! `master`, since announcements routinely name a default branch the
//! mirror renamed.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use base64::Engine;
use bytes::Bytes;
use lru::LruCache;
use thiserror::Error;
use tracing::debug;

use crate::backend::{FileEntry, GitBackend};
use crate::cache::{RepoStateCache, TreeKey};
use crate::sources::{SourceCandidate, SourceKind};
use crate::tree::SourceHistory;

// =============================================================================
// Error Types
// =============================================================================

/// Error type for file content resolution.
#[derive(Debug, Error)]
pub enum ContentError {
    /// No source in the chain could produce the file.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The chain already failed for this path this session; an explicit
    /// user-driven retry is required before trying again.
    #[error("retry refused, path already failed this session: {0}")]
    RetryRefused(String),
}

/// Result type for content operations.
pub type Result<T> = std::result::Result<T, ContentError>;

// =============================================================================
// FileOutcome
// =============================================================================

/// A resolved file. Exactly one of the two fields is set: decoded text for
/// textual files, a mime-typed `data:` URL for binary ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub text: Option<String>,
    pub binary_data_url: Option<String>,
}

impl FileOutcome {
    fn text(content: impl Into<String>) -> Self {
        Self {
            text: Some(content.into()),
            binary_data_url: None,
        }
    }

    fn binary(path: &str, bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            text: None,
            binary_data_url: Some(format!("data:{};base64,{}", mime_for(path), encoded)),
        }
    }
}

// =============================================================================
// Binary detection
// =============================================================================

const BINARY_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("wasm", "application/wasm"),
];

fn extension_of(path: &str) -> Option<String> {
    path.rsplit('/')
        .next()?
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn mime_for(path: &str) -> &'static str {
    extension_of(path)
        .and_then(|ext| {
            BINARY_EXTENSIONS
                .iter()
                .find(|(e, _)| *e == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or("application/octet-stream")
}

/// Whether a payload should be treated as binary: known binary extension,
/// an explicit flag on the tree entry, or a null byte in the first 8 KiB.
fn looks_binary(path: &str, entry: Option<&FileEntry>, bytes: &[u8]) -> bool {
    if let Some(flag) = entry.and_then(|e| e.is_binary) {
        return flag;
    }
    if let Some(ext) = extension_of(path) {
        if BINARY_EXTENSIONS.iter().any(|(e, _)| *e == ext) {
            return true;
        }
    }
    bytes.iter().take(8192).any(|b| *b == 0)
}

fn decode(path: &str, entry: Option<&FileEntry>, bytes: Bytes) -> FileOutcome {
    if looks_binary(path, entry, &bytes) {
        return FileOutcome::binary(path, &bytes);
    }
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => FileOutcome::text(text),
        Err(e) => FileOutcome::binary(path, e.as_bytes()),
    }
}

// =============================================================================
// FileContentResolver
// =============================================================================

const ATTEMPTED_CAPACITY: usize = 512;

/// Resolves individual file contents through the priority chain.
pub struct FileContentResolver {
    backend: Arc<dyn GitBackend>,
    cache: Arc<RepoStateCache>,
    /// Paths whose remote chain was exhausted this session. Automatic
    /// re-reads of these are refused so a rerendering caller cannot hammer
    /// every failing source again.
    attempted: Mutex<LruCache<String, ()>>,
}

impl FileContentResolver {
    pub fn new(backend: Arc<dyn GitBackend>, cache: Arc<RepoStateCache>) -> Self {
        Self {
            backend,
            cache,
            attempted: Mutex::new(LruCache::new(
                NonZeroUsize::new(ATTEMPTED_CAPACITY).unwrap(),
            )),
        }
    }

    /// Resolve one file.
    ///
    /// `entry` is the tree entry for `path` when the caller has it; inline
    /// content on it short-circuits the chain entirely. `history` and
    /// `candidates` feed the remote fallback order.
    pub async fn resolve(
        &self,
        key: &TreeKey,
        path: &str,
        entry: Option<&FileEntry>,
        history: &SourceHistory,
        candidates: &[SourceCandidate],
    ) -> Result<FileOutcome> {
        // Inline content carried in the tree itself.
        if let Some(content) = entry.and_then(|e| e.content.as_deref()) {
            return Ok(FileOutcome::text(content));
        }

        // Unpublished local edit.
        if let Some(edit) = self.cache.local_edit(key, path) {
            return Ok(FileOutcome::text(edit));
        }

        // Inline content on the cached tree record, for callers without the
        // live entry in hand.
        let cached_entry = self
            .cache
            .tree(key)
            .await
            .and_then(|t| t.files.into_iter().find(|f| f.path == path));
        if let Some(content) = cached_entry.as_ref().and_then(|e| e.content.clone()) {
            return Ok(FileOutcome::text(content));
        }
        let entry = entry.or(cached_entry.as_ref());

        let marker = attempt_marker(key, path);
        if self.attempted.lock().unwrap().contains(&marker) {
            return Err(ContentError::RetryRefused(path.to_string()));
        }

        // Remote chain: successful sources first, then the rest.
        let mut tried: Vec<String> = Vec::new();
        let mut ordered: Vec<SourceCandidate> = Vec::new();
        for candidate in history.snapshot().into_iter().chain(candidates.iter().cloned()) {
            if tried.contains(&candidate.url) {
                continue;
            }
            tried.push(candidate.url.clone());
            ordered.push(candidate);
        }

        for candidate in &ordered {
            for branch in branches_to_try(candidate, &key.branch) {
                match self.backend.fetch_file(candidate, path, &branch).await {
                    Ok(bytes) => return Ok(decode(path, entry, bytes)),
                    Err(e) => {
                        debug!(
                            source = %candidate.url,
                            branch = %branch,
                            path = %path,
                            error = %e,
                            "file read failed, moving down the chain"
                        );
                    }
                }
            }
        }

        self.attempted.lock().unwrap().put(marker, ());
        Err(ContentError::NotFound(path.to_string()))
    }

    /// Clear the failed-this-session marker for a path, re-enabling the
    /// remote chain. For explicit user-driven retries only.
    pub fn allow_retry(&self, key: &TreeKey, path: &str) {
        self.attempted
            .lock()
            .unwrap()
            .pop(&attempt_marker(key, path));
    }
}

fn attempt_marker(key: &TreeKey, path: &str) -> String {
    format!("{}:{}:{}:{}", key.owner, key.repo, key.branch, path)
}

/// Hosted services frequently carry the content under `main` or `master`
/// when the announced default branch is stale; mirrors serve exactly the
/// branch asked for.
fn branches_to_try(candidate: &SourceCandidate, branch: &str) -> Vec<String> {
    let mut branches = vec![branch.to_string()];
    if candidate.kind == SourceKind::External {
        for fallback in ["main", "master"] {
            if !branches.iter().any(|b| b == fallback) {
                branches.push(fallback.to_string());
            }
        }
    }
    branches
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cache::{MemoryStore, ResolvedTree};
    use chrono::Utc;

    fn key() -> TreeKey {
        TreeKey::new("a".repeat(64), "repo", "main")
    }

    fn candidate(url: &str, kind: SourceKind) -> SourceCandidate {
        SourceCandidate {
            url: url.to_string(),
            kind,
            priority: 0,
        }
    }

    fn resolver(backend: Arc<MemoryBackend>) -> (FileContentResolver, Arc<RepoStateCache>) {
        let cache = Arc::new(RepoStateCache::new(Arc::new(MemoryStore::new())));
        (FileContentResolver::new(backend, cache.clone()), cache)
    }

    #[tokio::test]
    async fn embedded_content_never_touches_the_network() {
        let backend = Arc::new(MemoryBackend::new());
        let (resolver, _cache) = resolver(backend.clone());
        let entry = FileEntry::file("README.md", 11).with_content("hello world");

        let outcome = resolver
            .resolve(&key(), "README.md", Some(&entry), &SourceHistory::new(), &[])
            .await
            .unwrap();
        assert_eq!(outcome.text.as_deref(), Some("hello world"));
        assert!(outcome.binary_data_url.is_none());
        assert_eq!(backend.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn local_edit_overrides_remote_content() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_blob("https://mirror.one/k/r", "main", "a.rs", "remote");
        let (resolver, cache) = resolver(backend.clone());
        cache.set_local_edit(&key(), "a.rs", "local draft");

        let outcome = resolver
            .resolve(
                &key(),
                "a.rs",
                None,
                &SourceHistory::new(),
                &[candidate("https://mirror.one/k/r", SourceKind::Mirror)],
            )
            .await
            .unwrap();
        assert_eq!(outcome.text.as_deref(), Some("local draft"));
        assert_eq!(backend.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn cached_inline_content_is_used_without_the_live_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let (resolver, cache) = resolver(backend.clone());
        cache
            .admit_remote(
                &key(),
                ResolvedTree {
                    files: vec![FileEntry::file("notes.md", 4).with_content("memo")],
                    source_of_record: None,
                    fetched_at: Utc::now(),
                },
            )
            .await;

        let outcome = resolver
            .resolve(&key(), "notes.md", None, &SourceHistory::new(), &[])
            .await
            .unwrap();
        assert_eq!(outcome.text.as_deref(), Some("memo"));
        assert_eq!(backend.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn external_hosts_fall_back_to_main_then_master() {
        let backend = Arc::new(MemoryBackend::new());
        // The file only exists under master on this host.
        backend.put_blob("https://github.com/o/r", "master", "lib.rs", "pub fn f() {}");
        let (resolver, _cache) = resolver(backend.clone());

        let tree_key = TreeKey::new("a".repeat(64), "repo", "trunk");
        let outcome = resolver
            .resolve(
                &tree_key,
                "lib.rs",
                None,
                &SourceHistory::new(),
                &[candidate("https://github.com/o/r", SourceKind::External)],
            )
            .await
            .unwrap();
        assert_eq!(outcome.text.as_deref(), Some("pub fn f() {}"));
    }

    #[tokio::test]
    async fn binary_files_come_back_as_data_urls() {
        let backend = Arc::new(MemoryBackend::new());
        let png: &'static [u8] = b"\x89PNG\x00\x01";
        backend.put_blob("https://mirror.one/k/r", "main", "logo.png", png);
        let (resolver, _cache) = resolver(backend.clone());

        let outcome = resolver
            .resolve(
                &key(),
                "logo.png",
                None,
                &SourceHistory::new(),
                &[candidate("https://mirror.one/k/r", SourceKind::Mirror)],
            )
            .await
            .unwrap();
        assert!(outcome.text.is_none());
        let url = outcome.binary_data_url.unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn exhausted_paths_refuse_automatic_retries() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_failure("https://mirror.one/k/r", "down");
        let (resolver, _cache) = resolver(backend.clone());
        let candidates = [candidate("https://mirror.one/k/r", SourceKind::Mirror)];

        let first = resolver
            .resolve(&key(), "gone.rs", None, &SourceHistory::new(), &candidates)
            .await;
        assert!(matches!(first, Err(ContentError::NotFound(_))));
        let calls_after_first = backend.fetch_calls();

        let second = resolver
            .resolve(&key(), "gone.rs", None, &SourceHistory::new(), &candidates)
            .await;
        assert!(matches!(second, Err(ContentError::RetryRefused(_))));
        assert_eq!(backend.fetch_calls(), calls_after_first);

        // An explicit retry re-enables the chain.
        resolver.allow_retry(&key(), "gone.rs");
        let third = resolver
            .resolve(&key(), "gone.rs", None, &SourceHistory::new(), &candidates)
            .await;
        assert!(matches!(third, Err(ContentError::NotFound(_))));
        assert!(backend.fetch_calls() > calls_after_first);
    }

    #[tokio::test]
    async fn successful_sources_are_consulted_before_the_rest() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_failure("https://github.com/o/r", "down");
        backend.put_blob("https://mirror.two/k/r", "main", "a.rs", "from history");
        let (resolver, _cache) = resolver(backend.clone());

        let history = SourceHistory::new();
        history.push(candidate("https://mirror.two/k/r", SourceKind::Mirror));

        let outcome = resolver
            .resolve(
                &key(),
                "a.rs",
                None,
                &history,
                &[candidate("https://github.com/o/r", SourceKind::External)],
            )
            .await
            .unwrap();
        assert_eq!(outcome.text.as_deref(), Some("from history"));
        // Only the history source was asked.
        assert_eq!(backend.fetch_calls(), 1);
    }
}
