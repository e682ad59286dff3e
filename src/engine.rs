//! End-to-end resolution orchestration.
//!
//! The engine wires the stages together: raw entity to owner key,
//! owner/repo to the current announcement, announcement to a ranked
//! candidate list, candidates to a tree of record, and the arbiter-gated
//! cache write at the end. All routing state travels in an explicit
//! [`ResolveContext`]; the engine holds no per-repository globals.
//!
//! Concurrent resolutions of the same `(owner, repo, branch)` are joined:
//! the second caller waits on the round already in flight instead of
//! spawning a duplicate relay-and-fetch cascade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::backend::{FileEntry, GitBackend};
use crate::cache::{Admission, KeyValueStore, RepoStateCache, ResolvedTree, TreeKey};
use crate::config::EngineConfig;
use crate::content::{self, FileContentResolver, FileOutcome};
use crate::events::{EventError, EventResolver, RelayClient, RepoAnnouncement};
use crate::identity::{IdentityResolver, NameService};
use crate::sources::{expand_sources, SourceCandidate};
use crate::tree::{FetchStatus, SourceHistory, TreeFetchHandle, TreeFetcher};

// =============================================================================
// Error Types
// =============================================================================

/// Errors terminating a resolution.
///
/// `Clone` so one in-flight round can hand its outcome to every joined
/// caller.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The route entity could not be turned into an owner key.
    #[error("unresolvable entity: {0}")]
    Decode(String),

    /// No announcement record exists for the repository.
    #[error("repository not found")]
    NotFound,

    /// The announcement failed integrity or ownership checks. Resolution is
    /// refused rather than displaying mismatched data.
    #[error("corrupted announcement: {0}")]
    Corrupted(String),
}

impl From<EventError> for ResolveError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::NotFound => ResolveError::NotFound,
            EventError::Corrupted(detail) => ResolveError::Corrupted(detail),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ResolveError>;

// =============================================================================
// Context and Outcome
// =============================================================================

/// One resolution request: the raw route entity, repository name, and
/// branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveContext {
    /// Raw entity as routed: hex key, encoded key, 8-char prefix, or
    /// name-service handle.
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl ResolveContext {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

/// A completed resolution round.
#[derive(Clone)]
pub struct Resolution {
    pub key: TreeKey,
    pub announcement: RepoAnnouncement,
    /// The remote view of the tree. When `admission` is
    /// [`Admission::DisplayOnly`] the authoritative record stays in the
    /// cache; this field is the fallback for display.
    pub tree: ResolvedTree,
    pub candidates: Vec<SourceCandidate>,
    pub history: SourceHistory,
    /// The arbiter's verdict, or `None` when nothing was fetched (deleted
    /// repository, or no candidate produced files).
    pub admission: Option<Admission>,
}

struct Round {
    handle: TreeFetchHandle,
    candidates: Vec<SourceCandidate>,
}

/// Ownership of one in-flight round's map entry.
///
/// Removes the entry on drop, so a caller whose future is dropped mid-round
/// (navigation away) cannot leave a dead channel behind for later
/// resolutions of the same key to join.
struct RoundClaim<'a> {
    in_flight: &'a Mutex<HashMap<TreeKey, SharedOutcome>>,
    key: TreeKey,
    tx: watch::Sender<Option<Result<Resolution>>>,
    published: bool,
}

impl RoundClaim<'_> {
    /// Remove the entry, then broadcast the outcome. Removal comes first so
    /// a caller arriving after the broadcast starts a fresh round instead
    /// of reading a stale one.
    fn publish(mut self, result: &Result<Resolution>) {
        self.in_flight.lock().unwrap().remove(&self.key);
        self.published = true;
        let _ = self.tx.send(Some(result.clone()));
    }
}

impl Drop for RoundClaim<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.in_flight.lock().unwrap().remove(&self.key);
        }
    }
}

// =============================================================================
// ResolveEngine
// =============================================================================

type SharedOutcome = watch::Receiver<Option<Result<Resolution>>>;

/// Orchestrates full repository resolution.
pub struct ResolveEngine {
    config: EngineConfig,
    identity: IdentityResolver,
    events: EventResolver,
    fetcher: TreeFetcher,
    content: FileContentResolver,
    cache: Arc<RepoStateCache>,
    in_flight: Mutex<HashMap<TreeKey, SharedOutcome>>,
    rounds: Mutex<HashMap<TreeKey, Round>>,
}

impl ResolveEngine {
    pub fn new(
        config: EngineConfig,
        relay_client: Arc<dyn RelayClient>,
        backend: Arc<dyn GitBackend>,
        name_service: Arc<dyn NameService>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let cache = Arc::new(RepoStateCache::new(store));
        Self {
            identity: IdentityResolver::new(cache.clone(), name_service),
            events: EventResolver::new(relay_client, &config),
            fetcher: TreeFetcher::new(backend.clone(), &config),
            content: FileContentResolver::new(backend, cache.clone()),
            cache,
            config,
            in_flight: Mutex::new(HashMap::new()),
            rounds: Mutex::new(HashMap::new()),
        }
    }

    /// The local state cache backing this engine.
    pub fn cache(&self) -> &Arc<RepoStateCache> {
        &self.cache
    }

    /// Resolve a repository branch end to end.
    ///
    /// A second call for the same `(owner, repo, branch)` while a round is
    /// in flight joins that round and receives the same outcome.
    pub async fn resolve_tree(&self, ctx: &ResolveContext) -> Result<Resolution> {
        let owner = self
            .identity
            .resolve(&ctx.owner, &ctx.repo)
            .await
            .ok_or_else(|| ResolveError::Decode(ctx.owner.clone()))?;
        let key = TreeKey::new(owner, ctx.repo.clone(), ctx.branch.clone());

        // The lock scope must close before any await so the returned future
        // stays Send.
        let claimed = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(rx) = in_flight.get(&key).cloned() {
                Err(rx)
            } else {
                let (tx, rx) = watch::channel(None);
                in_flight.insert(key.clone(), rx);
                Ok(RoundClaim {
                    in_flight: &self.in_flight,
                    key: key.clone(),
                    tx,
                    published: false,
                })
            }
        };
        let claim = match claimed {
            Ok(claim) => claim,
            Err(rx) => return join_round(rx).await,
        };

        let result = self.run_round(&key, ctx).await;
        claim.publish(&result);
        result
    }

    async fn run_round(&self, key: &TreeKey, ctx: &ResolveContext) -> Result<Resolution> {
        let announcement = self
            .events
            .resolve(&key.owner, &ctx.repo, &self.config.relays.urls)
            .await?;

        // Feed the local prefix records for future abbreviated lookups.
        self.cache
            .record_contributors(announcement.contributors.iter().filter_map(|c| c.key.clone()));
        self.cache.record_activity(key.owner.clone());

        if announcement.deleted {
            info!(repo = %ctx.repo, "repository flagged deleted, skipping fetch");
            return Ok(Resolution {
                key: key.clone(),
                announcement,
                tree: empty_tree(),
                candidates: Vec::new(),
                history: SourceHistory::new(),
                admission: None,
            });
        }

        let candidates = expand_sources(
            &self.config,
            &announcement.clone_locations,
            announcement.source_mirror.as_deref(),
        );
        debug!(repo = %ctx.repo, candidates = candidates.len(), "racing sources");

        let (resolution, handle) = self.fetcher.fetch_tree(&candidates, &ctx.branch).await;
        let history = handle.history.clone();
        {
            let mut rounds = self.rounds.lock().unwrap();
            if let Some(previous) = rounds.insert(
                key.clone(),
                Round {
                    handle,
                    candidates: candidates.clone(),
                },
            ) {
                previous.handle.cancel();
            }
        }

        let tree = ResolvedTree {
            files: resolution.files,
            source_of_record: resolution.source_of_record.map(|c| c.url),
            fetched_at: Utc::now(),
        };
        let admission = if tree.files.is_empty() {
            None
        } else {
            Some(self.cache.admit_remote(key, tree.clone()).await)
        };

        Ok(Resolution {
            key: key.clone(),
            announcement,
            tree,
            candidates,
            history,
            admission,
        })
    }

    /// Resolve one file against the latest round for this branch. Falls
    /// back to a bare candidate-less chain when no round was run (inline
    /// and locally edited content still resolve).
    pub async fn resolve_file(
        &self,
        key: &TreeKey,
        path: &str,
        entry: Option<&FileEntry>,
    ) -> content::Result<FileOutcome> {
        let (history, candidates) = {
            let rounds = self.rounds.lock().unwrap();
            match rounds.get(key) {
                Some(round) => (round.handle.history.clone(), round.candidates.clone()),
                None => (SourceHistory::new(), Vec::new()),
            }
        };
        self.content
            .resolve(key, path, entry, &history, &candidates)
            .await
    }

    /// Re-enable the remote chain for a path after the user asked for a
    /// retry.
    pub fn allow_file_retry(&self, key: &TreeKey, path: &str) {
        self.content.allow_retry(key, path);
    }

    /// Live per-candidate statuses of the latest round for this branch.
    pub fn fetch_statuses(&self, key: &TreeKey) -> Option<Vec<FetchStatus>> {
        self.rounds
            .lock()
            .unwrap()
            .get(key)
            .map(|round| round.handle.board.snapshot())
    }

    /// Cancel the outstanding fetches of the latest round for this branch
    /// (navigation away, branch switch).
    pub fn cancel(&self, key: &TreeKey) {
        if let Some(round) = self.rounds.lock().unwrap().get(key) {
            round.handle.cancel();
        }
    }
}

fn empty_tree() -> ResolvedTree {
    ResolvedTree {
        files: Vec::new(),
        source_of_record: None,
        fetched_at: Utc::now(),
    }
}

async fn join_round(mut rx: SharedOutcome) -> Result<Resolution> {
    loop {
        if let Some(result) = rx.borrow_and_update().clone() {
            return result;
        }
        if rx.changed().await.is_err() {
            return Err(ResolveError::NotFound);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
