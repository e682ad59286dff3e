//! In-memory backend for tests.
//!
//! Trees and blobs are registered per (candidate url, branch); candidates
//! can be given artificial latency or made to fail, which is how the tree
//! race and fallback chains are exercised without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::sources::SourceCandidate;

use super::git_backend::{BackendError, FileEntry, GitBackend, Result};

#[derive(Default)]
struct CandidateFixture {
    trees: HashMap<String, Vec<FileEntry>>,
    blobs: HashMap<(String, String), Bytes>,
    delay: Option<Duration>,
    fail_with: Option<String>,
}

/// An in-memory [`GitBackend`] with scriptable latency and failures.
#[derive(Default)]
pub struct MemoryBackend {
    fixtures: Mutex<HashMap<String, CandidateFixture>>,
    fetch_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tree for (candidate url, branch).
    pub fn put_tree(&self, url: &str, branch: &str, entries: Vec<FileEntry>) {
        let mut fixtures = self.fixtures.lock().unwrap();
        fixtures
            .entry(url.to_string())
            .or_default()
            .trees
            .insert(branch.to_string(), entries);
    }

    /// Register a blob for (candidate url, branch, path).
    pub fn put_blob(&self, url: &str, branch: &str, path: &str, bytes: impl Into<Bytes>) {
        let mut fixtures = self.fixtures.lock().unwrap();
        fixtures
            .entry(url.to_string())
            .or_default()
            .blobs
            .insert((branch.to_string(), path.to_string()), bytes.into());
    }

    /// Delay every operation against this candidate.
    pub fn set_delay(&self, url: &str, delay: Duration) {
        let mut fixtures = self.fixtures.lock().unwrap();
        fixtures.entry(url.to_string()).or_default().delay = Some(delay);
    }

    /// Make every operation against this candidate fail.
    pub fn set_failure(&self, url: &str, message: &str) {
        let mut fixtures = self.fixtures.lock().unwrap();
        fixtures.entry(url.to_string()).or_default().fail_with = Some(message.to_string());
    }

    /// Number of fetch operations issued so far (trees and blobs).
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    async fn prepare(&self, url: &str) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, fail_with) = {
            let fixtures = self.fixtures.lock().unwrap();
            match fixtures.get(url) {
                Some(f) => (f.delay, f.fail_with.clone()),
                None => (None, None),
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = fail_with {
            return Err(BackendError::Unavailable(message));
        }
        Ok(())
    }
}

#[async_trait]
impl GitBackend for MemoryBackend {
    async fn fetch_tree(
        &self,
        candidate: &SourceCandidate,
        branch: &str,
    ) -> Result<Vec<FileEntry>> {
        self.prepare(&candidate.url).await?;
        let fixtures = self.fixtures.lock().unwrap();
        fixtures
            .get(&candidate.url)
            .and_then(|f| f.trees.get(branch))
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn fetch_file(
        &self,
        candidate: &SourceCandidate,
        path: &str,
        branch: &str,
    ) -> Result<Bytes> {
        self.prepare(&candidate.url).await?;
        let fixtures = self.fixtures.lock().unwrap();
        fixtures
            .get(&candidate.url)
            .and_then(|f| f.blobs.get(&(branch.to_string(), path.to_string())))
            .cloned()
            .ok_or(BackendError::NotFound)
    }
}
