//! Multi-source tree race.
//!
//! One fetch is issued per candidate; all run concurrently and report into
//! the shared status board. The first candidate to succeed with a non-empty
//! file list becomes the tree of record and unblocks the caller immediately.
//! The remaining candidates are allowed to finish in the background; their
//! successes are recorded as additional sources (a fallback set for later
//! file reads) but never replace the tree of record. The first-success
//! decision is made by the single coordinator task draining the result
//! channel, so two near-simultaneous successes cannot both believe they are
//! first.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::debug;

use crate::backend::{BackendError, FileEntry, GitBackend};
use crate::config::EngineConfig;
use crate::sources::SourceCandidate;

use super::status::{FetchState, StatusBoard};

// =============================================================================
// Results
// =============================================================================

/// The outcome the caller is unblocked with.
///
/// An empty `files` with `source_of_record == None` means no candidate
/// succeeded: "no files available", a normal terminal state rather than an
/// error.
#[derive(Debug, Clone)]
pub struct TreeResolution {
    pub files: Vec<FileEntry>,
    pub source_of_record: Option<SourceCandidate>,
}

impl TreeResolution {
    fn empty() -> Self {
        Self {
            files: Vec::new(),
            source_of_record: None,
        }
    }
}

/// Ordered record of candidates that succeeded with a non-empty tree, in
/// the order they succeeded. Used later as the fallback set for individual
/// file reads.
#[derive(Clone, Default)]
pub struct SourceHistory {
    successes: Arc<Mutex<Vec<SourceCandidate>>>,
}

impl SourceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, candidate: SourceCandidate) {
        let mut successes = self.successes.lock().unwrap();
        if !successes.iter().any(|c| c.url == candidate.url) {
            successes.push(candidate);
        }
    }

    /// Successful sources in success order.
    pub fn snapshot(&self) -> Vec<SourceCandidate> {
        self.successes.lock().unwrap().clone()
    }
}

/// Handle on a running fetch round.
///
/// The caller already holds the tree of record; this handle exposes the
/// still-updating status board and source history, and cancels the round's
/// outstanding fetches when asked (navigation away, branch switch).
pub struct TreeFetchHandle {
    pub board: Arc<StatusBoard>,
    pub history: SourceHistory,
    cancel: watch::Sender<bool>,
}

impl TreeFetchHandle {
    /// Cancel all outstanding fetches for this round.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

// =============================================================================
// TreeFetcher
// =============================================================================

/// Races a ranked candidate list for a branch's file tree.
pub struct TreeFetcher {
    backend: Arc<dyn GitBackend>,
    per_source_timeout: Duration,
    race_timeout: Duration,
}

impl TreeFetcher {
    pub fn new(backend: Arc<dyn GitBackend>, config: &EngineConfig) -> Self {
        Self {
            backend,
            per_source_timeout: config.timeouts.per_source,
            race_timeout: config.timeouts.race,
        }
    }

    /// Run the race. Returns as soon as a tree of record exists (or the
    /// round is exhausted or times out) together with the live handle.
    pub async fn fetch_tree(
        &self,
        candidates: &[SourceCandidate],
        branch: &str,
    ) -> (TreeResolution, TreeFetchHandle) {
        let board = Arc::new(StatusBoard::new(candidates));
        let history = SourceHistory::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handle = TreeFetchHandle {
            board: board.clone(),
            history: history.clone(),
            cancel: cancel_tx,
        };

        if candidates.is_empty() {
            return (TreeResolution::empty(), handle);
        }

        let (result_tx, result_rx) =
            mpsc::channel::<(SourceCandidate, Result<Vec<FileEntry>, BackendError>)>(
                candidates.len(),
            );
        let mut tasks = JoinSet::new();
        for candidate in candidates.iter().cloned() {
            let backend = self.backend.clone();
            let board = board.clone();
            let result_tx = result_tx.clone();
            let branch = branch.to_string();
            let timeout = self.per_source_timeout;
            tasks.spawn(async move {
                board.record(&candidate.url, FetchState::Fetching, None, None);
                let result = match tokio::time::timeout(
                    timeout,
                    backend.fetch_tree(&candidate, &branch),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Unavailable("timed out".to_string())),
                };
                let _ = result_tx.send((candidate, result)).await;
            });
        }
        drop(result_tx);

        let (first_tx, first_rx) = oneshot::channel::<TreeResolution>();
        tokio::spawn(coordinate(
            tasks,
            result_rx,
            cancel_rx,
            board,
            history,
            first_tx,
        ));

        let resolution = match tokio::time::timeout(self.race_timeout, first_rx).await {
            Ok(Ok(resolution)) => resolution,
            // Race bound hit or coordinator gone: surface "no files" and let
            // any remaining background work finish on its own.
            _ => TreeResolution::empty(),
        };
        (resolution, handle)
    }
}

/// Single-writer aggregation loop.
async fn coordinate(
    mut tasks: JoinSet<()>,
    mut results: mpsc::Receiver<(SourceCandidate, Result<Vec<FileEntry>, BackendError>)>,
    mut cancel: watch::Receiver<bool>,
    board: Arc<StatusBoard>,
    history: SourceHistory,
    first: oneshot::Sender<TreeResolution>,
) {
    let mut first = Some(first);
    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    tasks.abort_all();
                    for status in board.snapshot() {
                        if matches!(status.state, FetchState::Pending | FetchState::Fetching) {
                            board.record(
                                &status.candidate.url,
                                FetchState::Failed,
                                Some("cancelled".to_string()),
                                None,
                            );
                        }
                    }
                    break;
                }
            }
            result = results.recv() => match result {
                Some((candidate, Ok(files))) => {
                    board.record(
                        &candidate.url,
                        FetchState::Success,
                        None,
                        Some(files.clone()),
                    );
                    if files.is_empty() {
                        // A reachable source with nothing on this branch is
                        // a success for status purposes but can neither be
                        // the tree of record nor serve file reads.
                        continue;
                    }
                    history.push(candidate.clone());
                    if let Some(first) = first.take() {
                        debug!(source = %candidate.url, files = files.len(), "tree of record");
                        let _ = first.send(TreeResolution {
                            files,
                            source_of_record: Some(candidate),
                        });
                    } else {
                        debug!(source = %candidate.url, "additional successful source");
                    }
                }
                Some((candidate, Err(e))) => {
                    // One source failing never penalizes the others.
                    board.record(
                        &candidate.url,
                        FetchState::Failed,
                        Some(e.to_string()),
                        None,
                    );
                }
                None => break,
            }
        }
    }
    if let Some(first) = first.take() {
        let _ = first.send(TreeResolution::empty());
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::sources::SourceKind;

    fn candidate(url: &str, kind: SourceKind) -> SourceCandidate {
        SourceCandidate {
            url: url.to_string(),
            kind,
            priority: 0,
        }
    }

    fn twelve_files() -> Vec<FileEntry> {
        (0..12)
            .map(|i| FileEntry::file(format!("file{}.rs", i), 10))
            .collect()
    }

    fn fetcher(backend: Arc<MemoryBackend>) -> TreeFetcher {
        let mut config = EngineConfig::default();
        config.timeouts.per_source = Duration::from_millis(2_000);
        config.timeouts.race = Duration::from_millis(5_000);
        TreeFetcher::new(backend, &config)
    }

    async fn wait_settled(board: &StatusBoard) {
        for _ in 0..200 {
            if board.settled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("board never settled");
    }

    #[tokio::test]
    async fn first_nonempty_success_becomes_tree_of_record() {
        let backend = Arc::new(MemoryBackend::new());
        // External host: reachable but empty on this branch.
        backend.put_tree("https://github.com/o/r", "main", vec![]);
        // Fast mirror: 12 files after a short delay.
        backend.put_tree("https://mirror.one/k/r", "main", twelve_files());
        backend.set_delay("https://mirror.one/k/r", Duration::from_millis(50));
        // Slow mirror: same 12 files, much later.
        backend.put_tree("https://mirror.two/k/r", "main", twelve_files());
        backend.set_delay("https://mirror.two/k/r", Duration::from_millis(300));

        let candidates = vec![
            candidate("https://github.com/o/r", SourceKind::External),
            candidate("https://mirror.one/k/r", SourceKind::Mirror),
            candidate("https://mirror.two/k/r", SourceKind::Mirror),
        ];

        let (resolution, handle) = fetcher(backend).fetch_tree(&candidates, "main").await;
        assert_eq!(resolution.files.len(), 12);
        assert_eq!(
            resolution.source_of_record.as_ref().unwrap().url,
            "https://mirror.one/k/r"
        );

        // The slow mirror still finishes and lands in the history as an
        // additional successful source, after the winner.
        wait_settled(&handle.board).await;
        let history = handle.history.snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].url, "https://mirror.one/k/r");
        assert_eq!(history[1].url, "https://mirror.two/k/r");
    }

    #[tokio::test]
    async fn no_success_yields_empty_tree_not_error() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_failure("https://a.example/o/r", "unreachable");
        // b has no tree registered for the branch: NotFound.
        let candidates = vec![
            candidate("https://a.example/o/r", SourceKind::Unknown),
            candidate("https://b.example/o/r", SourceKind::Unknown),
        ];

        let (resolution, handle) = fetcher(backend).fetch_tree(&candidates, "main").await;
        assert!(resolution.files.is_empty());
        assert!(resolution.source_of_record.is_none());

        wait_settled(&handle.board).await;
        assert!(handle
            .board
            .snapshot()
            .iter()
            .all(|s| s.state == FetchState::Failed));
    }

    #[tokio::test]
    async fn branch_missing_on_one_candidate_does_not_penalize_others() {
        let backend = Arc::new(MemoryBackend::new());
        // a knows nothing about this branch; b has it.
        backend.put_tree("https://b.example/o/r", "dev", twelve_files());
        let candidates = vec![
            candidate("https://a.example/o/r", SourceKind::Mirror),
            candidate("https://b.example/o/r", SourceKind::Mirror),
        ];

        let (resolution, _handle) = fetcher(backend).fetch_tree(&candidates, "dev").await;
        assert_eq!(
            resolution.source_of_record.unwrap().url,
            "https://b.example/o/r"
        );
    }

    #[tokio::test]
    async fn cancellation_fails_outstanding_candidates() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_tree("https://slow.example/o/r", "main", twelve_files());
        backend.set_delay("https://slow.example/o/r", Duration::from_millis(60_000));

        let mut config = EngineConfig::default();
        config.timeouts.per_source = Duration::from_secs(120);
        config.timeouts.race = Duration::from_millis(200);
        let fetcher = TreeFetcher::new(backend, &config);

        let candidates = vec![candidate("https://slow.example/o/r", SourceKind::Mirror)];
        let (resolution, handle) = fetcher.fetch_tree(&candidates, "main").await;
        // Race bound hit before the slow source answered.
        assert!(resolution.source_of_record.is_none());

        handle.cancel();
        wait_settled(&handle.board).await;
        let snapshot = handle.board.snapshot();
        assert_eq!(snapshot[0].state, FetchState::Failed);
        assert_eq!(snapshot[0].error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn empty_candidate_list_resolves_to_no_files() {
        let backend = Arc::new(MemoryBackend::new());
        let (resolution, _handle) = fetcher(backend).fetch_tree(&[], "main").await;
        assert!(resolution.files.is_empty());
    }
}
