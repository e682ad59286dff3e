//! The reconciled view of a repository's metadata.
//!
//! A [`RepoAnnouncement`] is always built from exactly one announcement
//! event: the one with the highest `created_at` seen so far. Fields come
//! from structured tags first, with the JSON payload filling in only where a
//! tag is absent. Announcements are rebuilt wholesale when a newer record
//! arrives, never partially merged across `created_at` values.

use serde::{Deserialize, Serialize};

use crate::identity::OwnerKey;

use super::event::AnnouncementEvent;

// =============================================================================
// Contributor
// =============================================================================

/// Role of a contributor on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributorRole {
    Owner,
    Maintainer,
    Contributor,
}

/// A repository contributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    /// Public key, when the contributor is key-identified.
    pub key: Option<OwnerKey>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// External-host login handle, used for dedup when no key is present.
    pub login: Option<String>,
    /// 0..=100. Exactly one contributor carries 100 together with the owner
    /// role.
    pub weight: u8,
    pub role: ContributorRole,
}

impl Contributor {
    fn owner(key: OwnerKey) -> Self {
        Self {
            key: Some(key),
            display_name: String::new(),
            avatar_url: None,
            login: None,
            weight: 100,
            role: ContributorRole::Owner,
        }
    }
}

// =============================================================================
// Payload
// =============================================================================

/// The JSON payload carried in an announcement event's content.
///
/// Every field is optional and malformed payloads degrade to the default;
/// parsing never faults resolution.
#[derive(Debug, Default, Deserialize)]
struct AnnouncementPayload {
    description: Option<String>,
    #[serde(default, alias = "cloneUrls")]
    clone: Vec<String>,
    #[serde(default)]
    relays: Vec<String>,
    source: Option<String>,
    fork: Option<String>,
    #[serde(default)]
    web: Vec<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    contributors: Vec<PayloadContributor>,
}

#[derive(Debug, Default, Deserialize)]
struct PayloadContributor {
    #[serde(alias = "pubkey")]
    key: Option<String>,
    #[serde(default)]
    name: String,
    avatar: Option<String>,
    login: Option<String>,
    weight: Option<u8>,
    role: Option<String>,
}

// =============================================================================
// RepoAnnouncement
// =============================================================================

/// The reconciled repository metadata built from the current announcement
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAnnouncement {
    pub owner: OwnerKey,
    pub repo_name: String,
    pub description: String,
    pub clone_locations: Vec<String>,
    pub relay_list: Vec<String>,
    pub source_mirror: Option<String>,
    pub fork_origin: Option<String>,
    /// Browse URLs carried for display.
    pub web_urls: Vec<String>,
    pub contributors: Vec<Contributor>,
    pub created_at: u64,
    pub event_id: String,
    /// Terminal: the repository is flagged deleted or archived. No fetch is
    /// triggered for a deleted announcement.
    pub deleted: bool,
}

impl RepoAnnouncement {
    /// Build an announcement from one event.
    ///
    /// `owner` is the resolved canonical owner key; the event's author must
    /// already have been checked against it by the caller.
    pub fn from_event(event: &AnnouncementEvent, owner: &OwnerKey) -> Self {
        let payload: AnnouncementPayload =
            serde_json::from_str(&event.content).unwrap_or_default();

        let clone_locations = {
            let from_tags: Vec<String> =
                event.tag_values("clone").map(|v| v.to_string()).collect();
            if from_tags.is_empty() {
                payload.clone.clone()
            } else {
                from_tags
            }
        };

        let relay_list = {
            let from_tags = parse_relay_tags(event);
            if from_tags.is_empty() {
                payload.relays.clone()
            } else {
                from_tags
            }
        };

        let description = event
            .first_tag_value("description")
            .map(|v| v.to_string())
            .or(payload.description.clone())
            .unwrap_or_default();

        let source_mirror = event
            .first_tag_value("source")
            .map(|v| v.to_string())
            .or(payload.source.clone());

        let fork_origin = event
            .first_tag_value("fork")
            .map(|v| v.to_string())
            .or(payload.fork.clone());

        let web_urls = {
            let from_tags: Vec<String> = event.tag_values("web").map(|v| v.to_string()).collect();
            if from_tags.is_empty() {
                payload.web.clone()
            } else {
                from_tags
            }
        };

        let contributors = build_contributors(event, &payload, owner);

        Self {
            owner: owner.clone(),
            repo_name: event.repo_name().unwrap_or_default().to_string(),
            description,
            clone_locations,
            relay_list,
            source_mirror,
            fork_origin,
            web_urls,
            contributors,
            created_at: event.created_at,
            event_id: event.id.clone(),
            deleted: payload.deleted || payload.archived,
        }
    }
}

/// Relay tags accept two forms: one tag per relay, or a single tag holding a
/// comma-separated list.
fn parse_relay_tags(event: &AnnouncementEvent) -> Vec<String> {
    event
        .tag_values("relays")
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

// =============================================================================
// Contributors
// =============================================================================

/// Collect contributors from tags and payload, dedup them, and enforce the
/// single-owner invariant.
fn build_contributors(
    event: &AnnouncementEvent,
    payload: &AnnouncementPayload,
    owner: &OwnerKey,
) -> Vec<Contributor> {
    let mut contributors: Vec<Contributor> = Vec::new();

    // `contributor` tags carry [key, weight, role] triples.
    for tag in event
        .tags
        .iter()
        .filter(|t| t.first().map(|n| n.as_str()) == Some("contributor"))
    {
        let Some(key) = tag.get(1).filter(|k| !k.is_empty()) else {
            continue;
        };
        let weight = tag
            .get(2)
            .and_then(|w| w.parse::<u8>().ok())
            .unwrap_or(0)
            .min(100);
        let role = tag
            .get(3)
            .map(|r| parse_role(r))
            .unwrap_or(ContributorRole::Contributor);
        contributors.push(Contributor {
            key: Some(key.to_ascii_lowercase()),
            display_name: String::new(),
            avatar_url: None,
            login: None,
            weight,
            role,
        });
    }

    // Legacy `maintainers` tags: a bare key list.
    for key in event.tag_values("maintainers") {
        if key.is_empty() {
            continue;
        }
        contributors.push(Contributor {
            key: Some(key.to_ascii_lowercase()),
            display_name: String::new(),
            avatar_url: None,
            login: None,
            weight: 0,
            role: ContributorRole::Maintainer,
        });
    }

    // Payload contributors fill in only when no tag-derived list exists.
    if contributors.is_empty() {
        for pc in &payload.contributors {
            let key = pc.key.as_deref().filter(|k| !k.is_empty());
            if key.is_none() && pc.login.is_none() {
                continue;
            }
            contributors.push(Contributor {
                key: key.map(|k| k.to_ascii_lowercase()),
                display_name: pc.name.clone(),
                avatar_url: pc.avatar.clone(),
                login: pc.login.clone(),
                weight: pc.weight.unwrap_or(0).min(100),
                role: pc.role.as_deref().map(parse_role).unwrap_or(ContributorRole::Contributor),
            });
        }
    }

    dedup_contributors(&mut contributors);
    enforce_single_owner(&mut contributors, owner);
    contributors
}

fn parse_role(s: &str) -> ContributorRole {
    match s.to_ascii_lowercase().as_str() {
        "owner" => ContributorRole::Owner,
        "maintainer" => ContributorRole::Maintainer,
        _ => ContributorRole::Contributor,
    }
}

/// Dedup by key when present, else by login. First occurrence wins.
fn dedup_contributors(contributors: &mut Vec<Contributor>) {
    let mut seen_keys: Vec<String> = Vec::new();
    let mut seen_logins: Vec<String> = Vec::new();
    contributors.retain(|c| match (&c.key, &c.login) {
        (Some(key), _) => {
            if seen_keys.contains(key) {
                false
            } else {
                seen_keys.push(key.clone());
                true
            }
        }
        (None, Some(login)) => {
            let login = login.to_ascii_lowercase();
            if seen_logins.contains(&login) {
                false
            } else {
                seen_logins.push(login);
                true
            }
        }
        (None, None) => false,
    });
}

/// Exactly one contributor ends up with `weight == 100 && role == Owner`:
/// the resolved owner. If the owner key is absent from the incoming list, it
/// is synthesized and placed first.
fn enforce_single_owner(contributors: &mut Vec<Contributor>, owner: &OwnerKey) {
    let mut found = false;
    for c in contributors.iter_mut() {
        if c.key.as_deref() == Some(owner.as_str()) {
            c.weight = 100;
            c.role = ContributorRole::Owner;
            found = true;
        } else {
            if c.role == ContributorRole::Owner {
                c.role = ContributorRole::Maintainer;
            }
            if c.weight == 100 {
                c.weight = 99;
            }
        }
    }
    if !found {
        contributors.insert(0, Contributor::owner(owner.clone()));
    }
}

// =============================================================================
// Tests
// =============================================================================
