//! Announcement resolution across a relay set.
//!
//! Queries every relay for the repository's announcement events and
//! reconciles replies under replaceable-event semantics: only the record
//! with the highest `created_at` (ties broken by lexicographically greatest
//! event id) survives. All concurrent arrivals are serialized through the
//! single coordinator loop below, so no two tasks ever race to decide the
//! current announcement.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::identity::OwnerKey;

use super::announcement::RepoAnnouncement;
use super::event::AnnouncementEvent;
use super::relay::{Filter, RelayClient, RelayMessage};

// =============================================================================
// Error Types
// =============================================================================

/// Errors surfaced by announcement resolution.
///
/// Individual relay failures are absorbed; they only remove that relay's
/// vote.
#[derive(Debug, Error)]
pub enum EventError {
    /// No relay returned a matching announcement record.
    #[error("no announcement found")]
    NotFound,

    /// The announcement's ownership fields are internally inconsistent.
    /// Resolution is blocked outright rather than displaying mismatched
    /// data.
    #[error("corrupted announcement: {0}")]
    Corrupted(String),
}

/// Result type for event resolution.
pub type Result<T> = std::result::Result<T, EventError>;

// =============================================================================
// Replaceable-Event Arbiter
// =============================================================================

/// Holds only the best record seen so far. Total order: `created_at`, then
/// event id. Older records are discarded, never merged.
struct LatestWins {
    best: Option<AnnouncementEvent>,
}

impl LatestWins {
    fn new() -> Self {
        Self { best: None }
    }

    /// Consider a record; returns true if it replaced the current best.
    fn consider(&mut self, event: AnnouncementEvent) -> bool {
        let replaces = match &self.best {
            None => true,
            Some(best) => {
                event.created_at > best.created_at
                    || (event.created_at == best.created_at && event.id > best.id)
            }
        };
        if replaces {
            self.best = Some(event);
        }
        replaces
    }
}

// =============================================================================
// EventResolver
// =============================================================================

enum RelayUpdate {
    Event(AnnouncementEvent),
    /// The relay finished its initial delivery, errored, or timed out.
    Done { relay: String, error: Option<String> },
}

/// Produces the current [`RepoAnnouncement`] for `(owner, repo_name)`.
pub struct EventResolver {
    relay_client: Arc<dyn RelayClient>,
    mirror_hosts: Vec<String>,
    grace_window: Duration,
    per_relay_timeout: Duration,
}

impl EventResolver {
    pub fn new(relay_client: Arc<dyn RelayClient>, config: &EngineConfig) -> Self {
        Self {
            relay_client,
            mirror_hosts: config.sources.mirror_hosts.clone(),
            grace_window: config.timeouts.grace_window,
            per_relay_timeout: config.timeouts.per_source,
        }
    }

    /// Resolve the current announcement for `(owner, repo_name)` across the
    /// given relays.
    ///
    /// Returns the announcement built from the single best record. A
    /// deleted/archived repository yields a terminal announcement with
    /// `deleted == true`; the caller must not trigger any fetch for it.
    pub async fn resolve(
        &self,
        owner: &OwnerKey,
        repo_name: &str,
        relays: &[String],
    ) -> Result<RepoAnnouncement> {
        if relays.is_empty() {
            return Err(EventError::NotFound);
        }

        let filter = Filter::repo_announcements(owner, repo_name);
        let relays = self.order_relays(relays);

        let (tx, mut rx) = mpsc::channel::<RelayUpdate>(64);
        let mut tasks = JoinSet::new();
        for relay in relays {
            let client = self.relay_client.clone();
            let filter = filter.clone();
            let tx = tx.clone();
            let timeout = self.per_relay_timeout;
            tasks.spawn(relay_task(client, relay, filter, tx, timeout));
        }
        drop(tx);

        let mut pending = tasks.len();
        let mut latest = LatestWins::new();

        // Phase 1: wait for the first usable record, or for every relay to
        // come up empty.
        while latest.best.is_none() && pending > 0 {
            match rx.recv().await {
                Some(RelayUpdate::Event(event)) => {
                    self.accept(&mut latest, event, owner, &filter)?;
                }
                Some(RelayUpdate::Done { relay, error }) => {
                    if let Some(error) = error {
                        warn!(relay = %relay, error = %error, "relay dropped from resolution");
                    }
                    pending -= 1;
                }
                None => break,
            }
        }

        // Phase 2: a short grace window lets slower relays contribute a
        // newer record (or, when nothing was accepted yet, a late arrival)
        // before the result is declared.
        let grace = tokio::time::sleep(self.grace_window);
        tokio::pin!(grace);
        while pending > 0 || latest.best.is_none() {
            tokio::select! {
                update = rx.recv() => match update {
                    Some(RelayUpdate::Event(event)) => {
                        self.accept(&mut latest, event, owner, &filter)?;
                    }
                    Some(RelayUpdate::Done { .. }) => {
                        pending = pending.saturating_sub(1);
                    }
                    None => break,
                },
                _ = &mut grace => break,
            }
        }

        match latest.best {
            Some(event) => Ok(RepoAnnouncement::from_event(&event, owner)),
            None => Err(EventError::NotFound),
        }
    }

    /// Validate a record and feed it to the arbiter.
    ///
    /// Events that are not about this repository at all are relay noise and
    /// are discarded silently; only a record claiming this repo under the
    /// wrong author, or one failing id verification, is corruption.
    fn accept(
        &self,
        latest: &mut LatestWins,
        event: AnnouncementEvent,
        owner: &OwnerKey,
        filter: &Filter,
    ) -> Result<()> {
        if !filter.matches_repo(&event) {
            debug!(event_id = %event.id, "discarding unrelated relay reply");
            return Ok(());
        }
        if event.pubkey != *owner {
            return Err(EventError::Corrupted(format!(
                "announcement author {} does not match resolved owner {}",
                event.pubkey, owner
            )));
        }
        if !event.id_is_valid() {
            return Err(EventError::Corrupted(format!(
                "event id {} fails verification",
                event.id
            )));
        }
        let id = event.id.clone();
        let created_at = event.created_at;
        if latest.consider(event) {
            debug!(event_id = %id, created_at, "announcement record replaced");
        }
        Ok(())
    }

    /// Git-capable relays are also file mirrors; querying them first reduces
    /// round trips. Ordering is otherwise stable.
    fn order_relays(&self, relays: &[String]) -> Vec<String> {
        let is_git_capable = |relay: &str| {
            url::Url::parse(relay)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
                .map(|host| self.mirror_hosts.iter().any(|m| *m == host))
                .unwrap_or(false)
        };
        let (git_capable, rest): (Vec<String>, Vec<String>) = relays
            .iter()
            .cloned()
            .partition(|relay| is_git_capable(relay));
        git_capable.into_iter().chain(rest).collect()
    }
}

/// Forward one relay's messages into the shared update channel.
///
/// The relay's initial delivery is bounded by `timeout`; after end-of-stream
/// the task keeps draining late arrivals until the subscription or the
/// coordinator goes away.
async fn relay_task(
    client: Arc<dyn RelayClient>,
    relay: String,
    filter: Filter,
    tx: mpsc::Sender<RelayUpdate>,
    timeout: Duration,
) {
    let mut subscription = match client.subscribe(&relay, &filter).await {
        Ok(subscription) => subscription,
        Err(e) => {
            let _ = tx
                .send(RelayUpdate::Done {
                    relay,
                    error: Some(e.to_string()),
                })
                .await;
            return;
        }
    };

    let mut done_sent = false;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let message = if done_sent {
            subscription.next().await
        } else {
            match tokio::time::timeout_at(deadline, subscription.next()).await {
                Ok(message) => message,
                Err(_) => {
                    // Timed out: this relay's vote is removed, nothing more.
                    done_sent = true;
                    let _ = tx
                        .send(RelayUpdate::Done {
                            relay: relay.clone(),
                            error: Some("timed out".to_string()),
                        })
                        .await;
                    continue;
                }
            }
        };
        match message {
            Some(RelayMessage::Event(event)) => {
                if tx.send(RelayUpdate::Event(event)).await.is_err() {
                    return;
                }
            }
            Some(RelayMessage::EndOfStream) => {
                if !done_sent {
                    done_sent = true;
                    if tx
                        .send(RelayUpdate::Done {
                            relay: relay.clone(),
                            error: None,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            None => {
                if !done_sent {
                    let _ = tx
                        .send(RelayUpdate::Done {
                            relay,
                            error: Some("connection closed".to_string()),
                        })
                        .await;
                }
                return;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::REPO_ANNOUNCEMENT_KIND;
    use crate::events::relay::{RelayError, Subscription};
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn owner() -> OwnerKey {
        "ab".repeat(32)
    }

    fn announcement_event(created_at: u64, clone_url: &str) -> AnnouncementEvent {
        let mut event = AnnouncementEvent {
            id: String::new(),
            pubkey: owner(),
            created_at,
            kind: REPO_ANNOUNCEMENT_KIND,
            tags: vec![
                vec!["d".into(), "myrepo".into()],
                vec!["clone".into(), clone_url.into()],
            ],
            content: String::new(),
        };
        event.id = event.compute_id();
        event
    }

    /// One scripted step in a fake relay's delivery.
    #[derive(Clone)]
    enum Step {
        Event(AnnouncementEvent),
        Eose,
        DelayMs(u64),
    }

    /// Fake relay client replaying a fixed script per relay URL. Unknown
    /// relays fail to subscribe.
    struct ScriptedRelays {
        scripts: HashMap<String, Vec<Step>>,
    }

    #[async_trait]
    impl RelayClient for ScriptedRelays {
        async fn subscribe(
            &self,
            relay_url: &str,
            _filter: &Filter,
        ) -> std::result::Result<Subscription, RelayError> {
            let script = self
                .scripts
                .get(relay_url)
                .cloned()
                .ok_or_else(|| RelayError::Unavailable("unknown relay".into()))?;
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for step in script {
                    match step {
                        Step::Event(event) => {
                            if tx.send(RelayMessage::Event(event)).await.is_err() {
                                return;
                            }
                        }
                        Step::Eose => {
                            if tx.send(RelayMessage::EndOfStream).await.is_err() {
                                return;
                            }
                        }
                        Step::DelayMs(ms) => {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                        }
                    }
                }
            });
            Ok(Subscription::new(rx))
        }
    }

    fn resolver(scripts: HashMap<String, Vec<Step>>, grace_ms: u64) -> EventResolver {
        let mut config = EngineConfig::default();
        config.timeouts.grace_window = Duration::from_millis(grace_ms);
        config.timeouts.per_source = Duration::from_millis(2_000);
        EventResolver::new(Arc::new(ScriptedRelays { scripts }), &config)
    }

    #[tokio::test]
    async fn newest_record_wins_across_relays() {
        let older = announcement_event(100, "https://old.example/r");
        let newer = announcement_event(150, "https://new.example/r");
        let mut scripts = HashMap::new();
        scripts.insert(
            "wss://a".to_string(),
            vec![Step::Event(older), Step::Eose],
        );
        scripts.insert(
            "wss://b".to_string(),
            vec![Step::Event(newer), Step::Eose],
        );

        let ann = resolver(scripts, 300)
            .resolve(&owner(), "myrepo", &["wss://a".into(), "wss://b".into()])
            .await
            .unwrap();
        assert_eq!(ann.created_at, 150);
        assert_eq!(ann.clone_locations, vec!["https://new.example/r"]);
    }

    #[tokio::test]
    async fn created_at_ties_break_by_greatest_event_id() {
        let mut a = announcement_event(100, "https://a.example/r");
        let mut b = announcement_event(100, "https://b.example/r");
        // Same created_at, distinct ids from distinct tags.
        a.id = a.compute_id();
        b.id = b.compute_id();
        let expected = if a.id > b.id { a.clone() } else { b.clone() };

        let mut scripts = HashMap::new();
        scripts.insert("wss://a".to_string(), vec![Step::Event(a), Step::Eose]);
        scripts.insert("wss://b".to_string(), vec![Step::Event(b), Step::Eose]);

        let ann = resolver(scripts, 300)
            .resolve(&owner(), "myrepo", &["wss://a".into(), "wss://b".into()])
            .await
            .unwrap();
        assert_eq!(ann.event_id, expected.id);
    }

    #[tokio::test]
    async fn failing_relay_only_loses_its_vote() {
        let event = announcement_event(100, "https://a.example/r");
        let mut scripts = HashMap::new();
        scripts.insert("wss://good".to_string(), vec![Step::Event(event), Step::Eose]);
        // "wss://bad" has no script and fails to subscribe.

        let ann = resolver(scripts, 300)
            .resolve(&owner(), "myrepo", &["wss://bad".into(), "wss://good".into()])
            .await
            .unwrap();
        assert_eq!(ann.created_at, 100);
    }

    #[tokio::test]
    async fn all_relays_empty_is_not_found() {
        let mut scripts = HashMap::new();
        scripts.insert("wss://a".to_string(), vec![Step::Eose]);
        scripts.insert("wss://b".to_string(), vec![Step::Eose]);

        let result = resolver(scripts, 100)
            .resolve(&owner(), "myrepo", &["wss://a".into(), "wss://b".into()])
            .await;
        assert!(matches!(result, Err(EventError::NotFound)));
    }

    #[tokio::test]
    async fn late_arrival_within_grace_window_is_accepted() {
        let late = announcement_event(200, "https://late.example/r");
        let mut scripts = HashMap::new();
        scripts.insert(
            "wss://slow".to_string(),
            vec![Step::Eose, Step::DelayMs(100), Step::Event(late)],
        );

        let ann = resolver(scripts, 800)
            .resolve(&owner(), "myrepo", &["wss://slow".into()])
            .await
            .unwrap();
        assert_eq!(ann.created_at, 200);
    }

    #[tokio::test]
    async fn unrelated_relay_chatter_is_discarded_not_fatal() {
        // A misbehaving relay delivers an event for a different author and a
        // different repo before the real record.
        let mut stray = AnnouncementEvent {
            id: String::new(),
            pubkey: "cd".repeat(32),
            created_at: 500,
            kind: REPO_ANNOUNCEMENT_KIND,
            tags: vec![vec!["d".into(), "otherrepo".into()]],
            content: String::new(),
        };
        stray.id = stray.compute_id();
        let real = announcement_event(100, "https://a.example/r");

        let mut scripts = HashMap::new();
        scripts.insert(
            "wss://a".to_string(),
            vec![Step::Event(stray), Step::Event(real), Step::Eose],
        );

        let ann = resolver(scripts, 100)
            .resolve(&owner(), "myrepo", &["wss://a".into()])
            .await
            .unwrap();
        assert_eq!(ann.created_at, 100);
        assert_eq!(ann.repo_name, "myrepo");
    }

    #[tokio::test]
    async fn wrong_author_is_corrupted() {
        let mut event = announcement_event(100, "https://a.example/r");
        event.pubkey = "cd".repeat(32);
        event.id = event.compute_id();
        let mut scripts = HashMap::new();
        scripts.insert("wss://a".to_string(), vec![Step::Event(event), Step::Eose]);

        let result = resolver(scripts, 100)
            .resolve(&owner(), "myrepo", &["wss://a".into()])
            .await;
        assert!(matches!(result, Err(EventError::Corrupted(_))));
    }

    #[tokio::test]
    async fn tampered_event_id_is_corrupted() {
        let mut event = announcement_event(100, "https://a.example/r");
        event.id = "0".repeat(64);
        let mut scripts = HashMap::new();
        scripts.insert("wss://a".to_string(), vec![Step::Event(event), Step::Eose]);

        let result = resolver(scripts, 100)
            .resolve(&owner(), "myrepo", &["wss://a".into()])
            .await;
        assert!(matches!(result, Err(EventError::Corrupted(_))));
    }

    #[tokio::test]
    async fn deleted_payload_yields_terminal_announcement() {
        let mut event = announcement_event(100, "https://a.example/r");
        event.content = r#"{"deleted":true}"#.to_string();
        event.id = event.compute_id();
        let mut scripts = HashMap::new();
        scripts.insert("wss://a".to_string(), vec![Step::Event(event), Step::Eose]);

        let ann = resolver(scripts, 100)
            .resolve(&owner(), "myrepo", &["wss://a".into()])
            .await
            .unwrap();
        assert!(ann.deleted);
    }

    #[test]
    fn latest_wins_never_goes_backwards() {
        let mut latest = LatestWins::new();
        assert!(latest.consider(announcement_event(150, "https://new.example/r")));
        assert!(!latest.consider(announcement_event(100, "https://old.example/r")));
        assert_eq!(latest.best.as_ref().unwrap().created_at, 150);
    }
}
