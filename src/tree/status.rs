//! Per-candidate fetch status tracking.
//!
//! One [`FetchStatus`] exists per candidate per fetch round. Transitions are
//! monotonic (`pending -> fetching -> {success|failed}`) and a recorded
//! success is never downgraded, regardless of the delivery order of late
//! signals for the same candidate.

use std::sync::Mutex;

use tokio::sync::watch;

use crate::backend::FileEntry;
use crate::sources::SourceCandidate;

/// State of one candidate's fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    Fetching,
    Success,
    Failed,
}

/// Status of one candidate within one fetch round.
#[derive(Debug, Clone)]
pub struct FetchStatus {
    pub candidate: SourceCandidate,
    pub state: FetchState,
    pub error: Option<String>,
    pub files: Option<Vec<FileEntry>>,
}

impl FetchStatus {
    fn pending(candidate: SourceCandidate) -> Self {
        Self {
            candidate,
            state: FetchState::Pending,
            error: None,
            files: None,
        }
    }
}

/// Whether a transition is allowed. Success absorbs everything after it;
/// a failure may still be upgraded by a success signal that raced it.
fn transition_allowed(current: FetchState, next: FetchState) -> bool {
    match (current, next) {
        (FetchState::Pending, _) => true,
        (FetchState::Fetching, FetchState::Success | FetchState::Failed) => true,
        (FetchState::Failed, FetchState::Success) => true,
        (FetchState::Success, _) => false,
        _ => false,
    }
}

/// The aggregated view of all candidates in one round.
///
/// All writes funnel through this board; readers take snapshots or watch the
/// update channel for streaming progress display.
pub struct StatusBoard {
    statuses: Mutex<Vec<FetchStatus>>,
    updates: watch::Sender<Vec<FetchStatus>>,
}

impl StatusBoard {
    pub fn new(candidates: &[SourceCandidate]) -> Self {
        let statuses: Vec<FetchStatus> = candidates
            .iter()
            .cloned()
            .map(FetchStatus::pending)
            .collect();
        let (updates, _) = watch::channel(statuses.clone());
        Self {
            statuses: Mutex::new(statuses),
            updates,
        }
    }

    /// Record a state change for one candidate. Disallowed transitions are
    /// ignored, which is what protects a success from late failure signals.
    pub fn record(
        &self,
        candidate_url: &str,
        state: FetchState,
        error: Option<String>,
        files: Option<Vec<FileEntry>>,
    ) {
        let mut statuses = self.statuses.lock().unwrap();
        let Some(status) = statuses.iter_mut().find(|s| s.candidate.url == candidate_url)
        else {
            return;
        };
        if !transition_allowed(status.state, state) {
            return;
        }
        status.state = state;
        status.error = error;
        if files.is_some() {
            status.files = files;
        }
        let snapshot = statuses.clone();
        drop(statuses);
        let _ = self.updates.send(snapshot);
    }

    /// Current statuses.
    pub fn snapshot(&self) -> Vec<FetchStatus> {
        self.statuses.lock().unwrap().clone()
    }

    /// Watch the board for streaming progress updates.
    pub fn subscribe(&self) -> watch::Receiver<Vec<FetchStatus>> {
        self.updates.subscribe()
    }

    /// True once no candidate is pending or fetching.
    pub fn settled(&self) -> bool {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .all(|s| matches!(s.state, FetchState::Success | FetchState::Failed))
    }
}

// =============================================================================
// Tests
// =============================================================================
