//! Per-repository local state: the resolved-tree cache and the
//! local-precedence arbiter.
//!
//! Before any remote-resolved tree is allowed to overwrite local state, the
//! arbiter checks for unpublished edits or an already-populated file list
//! for the exact branch. When either holds, the remote data is accepted for
//! display fallback only and the authoritative local record is left alone,
//! so a slow or stale remote fetch can never clobber edits made since the
//! last successful publish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::FileEntry;
use crate::identity::{OwnerKey, PrefixDirectory};

use super::key_value::{KeyValueStore, PutOutcome};

// =============================================================================
// Keys and Records
// =============================================================================

/// Cache key for one branch of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeKey {
    pub owner: OwnerKey,
    pub repo: String,
    pub branch: String,
}

impl TreeKey {
    pub fn new(
        owner: impl Into<OwnerKey>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    fn store_key(&self) -> String {
        format!("tree:{}:{}:{}", self.owner, self.repo, self.branch)
    }
}

/// The cached record of one successful resolution round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTree {
    pub files: Vec<FileEntry>,
    /// URL of the source the tree of record came from.
    pub source_of_record: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Local state for one branch, layered over the persistent store.
#[derive(Debug, Clone, Default)]
struct BranchState {
    tree: Option<ResolvedTree>,
    unpublished_edits: bool,
    /// Unpublished per-path content overrides.
    edits: HashMap<String, String>,
}

/// The arbiter's verdict on freshly resolved remote data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Written into the authoritative local cache.
    WriteThrough,
    /// Accepted for display fallback only; local state untouched.
    DisplayOnly,
}

// =============================================================================
// RepoStateCache
// =============================================================================

/// Authoritative local cache for resolved trees, local edits, and the
/// prefix-lookup records backing identity resolution.
pub struct RepoStateCache {
    store: Arc<dyn KeyValueStore>,
    branches: Mutex<HashMap<TreeKey, BranchState>>,
    contributors: Mutex<Vec<OwnerKey>>,
    activity: Mutex<Vec<OwnerKey>>,
}

impl RepoStateCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            branches: Mutex::new(HashMap::new()),
            contributors: Mutex::new(Vec::new()),
            activity: Mutex::new(Vec::new()),
        }
    }

    /// Read the cached tree for a branch: in-memory layer first, then the
    /// persistent store.
    pub async fn tree(&self, key: &TreeKey) -> Option<ResolvedTree> {
        if let Some(state) = self.branches.lock().unwrap().get(key) {
            if state.tree.is_some() {
                return state.tree.clone();
            }
        }

        let bytes = match self.store.get(&key.store_key()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_slice::<ResolvedTree>(&bytes) {
            Ok(tree) => {
                let mut branches = self.branches.lock().unwrap();
                branches.entry(key.clone()).or_default().tree = Some(tree.clone());
                Some(tree)
            }
            Err(e) => {
                warn!(error = %e, "cache record undecodable; treating as miss");
                None
            }
        }
    }

    /// Offer freshly resolved remote data to the arbiter.
    ///
    /// Write-through happens at most once per resolution round; recency is
    /// that of the round, not of wall-clock arrival. On a quota-rejected
    /// store write the record is kept in memory only and the round still
    /// completes.
    pub async fn admit_remote(&self, key: &TreeKey, tree: ResolvedTree) -> Admission {
        let unpublished = self
            .branches
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.unpublished_edits)
            .unwrap_or(false);
        // The local record may live only in the persistent store (a prior
        // session); reading through `tree` covers both layers.
        let has_local_files = self
            .tree(key)
            .await
            .map(|t| !t.files.is_empty())
            .unwrap_or(false);
        if unpublished || has_local_files {
            debug!(
                repo = %key.repo,
                branch = %key.branch,
                "remote tree held back by local precedence"
            );
            return Admission::DisplayOnly;
        }

        {
            let mut branches = self.branches.lock().unwrap();
            branches.entry(key.clone()).or_default().tree = Some(tree.clone());
        }

        match serde_json::to_vec(&tree) {
            Ok(bytes) => match self.store.put(&key.store_key(), bytes).await {
                Ok(PutOutcome::Stored) => {}
                Ok(PutOutcome::QuotaExceeded) => {
                    warn!(
                        repo = %key.repo,
                        branch = %key.branch,
                        "cache quota exceeded; keeping tree in memory only"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "cache write failed; keeping tree in memory only");
                }
            },
            Err(e) => warn!(error = %e, "tree record unserializable"),
        }
        Admission::WriteThrough
    }

    /// Drop the cached tree for a branch (branch switch, or a remote-wins
    /// arbiter decision). Local edits and the unpublished flag survive.
    pub fn invalidate(&self, key: &TreeKey) {
        let mut branches = self.branches.lock().unwrap();
        if let Some(state) = branches.get_mut(key) {
            state.tree = None;
        }
    }

    // -------------------------------------------------------------------------
    // Local edits
    // -------------------------------------------------------------------------

    /// Record an unpublished edit for a path. Sets the unpublished-edits
    /// flag for the branch.
    pub fn set_local_edit(&self, key: &TreeKey, path: &str, content: impl Into<String>) {
        let mut branches = self.branches.lock().unwrap();
        let state = branches.entry(key.clone()).or_default();
        state.edits.insert(path.to_string(), content.into());
        state.unpublished_edits = true;
    }

    /// The unpublished edit override for a path, if any.
    pub fn local_edit(&self, key: &TreeKey, path: &str) -> Option<String> {
        self.branches
            .lock()
            .unwrap()
            .get(key)
            .and_then(|s| s.edits.get(path).cloned())
    }

    /// Whether the branch carries unpublished edits.
    pub fn has_unpublished_edits(&self, key: &TreeKey) -> bool {
        self.branches
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.unpublished_edits)
            .unwrap_or(false)
    }

    /// Clear edits and the unpublished flag after a successful publish.
    pub fn mark_published(&self, key: &TreeKey) {
        let mut branches = self.branches.lock().unwrap();
        if let Some(state) = branches.get_mut(key) {
            state.edits.clear();
            state.unpublished_edits = false;
        }
    }

    // -------------------------------------------------------------------------
    // Prefix records
    // -------------------------------------------------------------------------

    /// Record contributor keys observed on an announcement.
    pub fn record_contributors(&self, keys: impl IntoIterator<Item = OwnerKey>) {
        let mut contributors = self.contributors.lock().unwrap();
        for key in keys {
            if !contributors.contains(&key) {
                contributors.push(key);
            }
        }
    }

    /// Record a key observed on activity records.
    pub fn record_activity(&self, key: OwnerKey) {
        let mut activity = self.activity.lock().unwrap();
        if !activity.contains(&key) {
            activity.push(key);
        }
    }
}

#[async_trait]
impl PrefixDirectory for RepoStateCache {
    async fn repo_owner_matching(&self, prefix: &str) -> Option<OwnerKey> {
        self.branches
            .lock()
            .unwrap()
            .keys()
            .map(|k| &k.owner)
            .find(|owner| owner.starts_with(prefix))
            .cloned()
    }

    async fn contributor_matching(&self, prefix: &str) -> Option<OwnerKey> {
        self.contributors
            .lock()
            .unwrap()
            .iter()
            .find(|key| key.starts_with(prefix))
            .cloned()
    }

    async fn activity_matching(&self, prefix: &str) -> Option<OwnerKey> {
        self.activity
            .lock()
            .unwrap()
            .iter()
            .find(|key| key.starts_with(prefix))
            .cloned()
    }
}

// =============================================================================
// Tests
// =============================================================================
