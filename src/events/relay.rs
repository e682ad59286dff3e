//! Relay query interface consumed by the event resolver.
//!
//! Relays are independent store-and-forward nodes; the transport (websocket
//! framing, signatures) is a collaborator's job. The resolver only needs a
//! per-relay subscription yielding announcement events followed by an
//! end-of-stream marker.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::event::AnnouncementEvent;

/// Error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay could not be reached or refused the subscription.
    #[error("relay unavailable: {0}")]
    Unavailable(String),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

// =============================================================================
// Filter
// =============================================================================

/// Selects announcement events by author key and repo-name tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Author public keys (lowercase hex). Empty matches any author.
    pub authors: Vec<String>,
    /// Event kinds. Empty matches any kind.
    pub kinds: Vec<u32>,
    /// Repo-name `d` tag value.
    pub repo_name: Option<String>,
}

impl Filter {
    /// Filter for one repository's announcements.
    pub fn repo_announcements(author: &str, repo_name: &str) -> Self {
        Self {
            authors: vec![author.to_string()],
            kinds: vec![super::event::REPO_ANNOUNCEMENT_KIND],
            repo_name: Some(repo_name.to_string()),
        }
    }

    /// Whether an event matches this filter.
    pub fn matches(&self, event: &AnnouncementEvent) -> bool {
        if !self.authors.is_empty() && !self.authors.iter().any(|a| *a == event.pubkey) {
            return false;
        }
        self.matches_repo(event)
    }

    /// Whether an event is for this filter's kind and repo, ignoring the
    /// author. Used to tell unrelated relay chatter apart from events that
    /// are about this repository but fail ownership checks.
    pub fn matches_repo(&self, event: &AnnouncementEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(repo_name) = &self.repo_name {
            if event.repo_name() != Some(repo_name.as_str()) {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A message from one relay subscription.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(AnnouncementEvent),
    /// The relay has sent everything it had at subscription time. Late
    /// arrivals may still follow.
    EndOfStream,
}

/// A live subscription to one relay. Dropping it unsubscribes.
pub struct Subscription {
    receiver: mpsc::Receiver<RelayMessage>,
}

impl Subscription {
    /// Create a subscription from a message channel. The sender side closing
    /// ends the subscription.
    pub fn new(receiver: mpsc::Receiver<RelayMessage>) -> Self {
        Self { receiver }
    }

    /// Next message, or `None` once the relay connection is gone.
    pub async fn next(&mut self) -> Option<RelayMessage> {
        self.receiver.recv().await
    }
}

// =============================================================================
// RelayClient Trait
// =============================================================================

/// Opens subscriptions against individual relays.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Subscribe to events matching `filter` on the given relay.
    async fn subscribe(&self, relay_url: &str, filter: &Filter) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::REPO_ANNOUNCEMENT_KIND;

    fn event(pubkey: &str, repo: &str) -> AnnouncementEvent {
        let mut e = AnnouncementEvent {
            id: String::new(),
            pubkey: pubkey.to_string(),
            created_at: 1,
            kind: REPO_ANNOUNCEMENT_KIND,
            tags: vec![vec!["d".into(), repo.into()]],
            content: String::new(),
        };
        e.id = e.compute_id();
        e
    }

    #[test]
    fn filter_matches_author_kind_and_repo_tag() {
        let author = "ab".repeat(32);
        let filter = Filter::repo_announcements(&author, "myrepo");
        assert!(filter.matches(&event(&author, "myrepo")));
        assert!(!filter.matches(&event(&author, "other")));
        assert!(!filter.matches(&event(&"cd".repeat(32), "myrepo")));
    }
}
