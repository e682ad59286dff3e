//! Raw repository-announcement events as delivered by relays.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Event kind for replaceable repository announcements.
pub const REPO_ANNOUNCEMENT_KIND: u32 = 30617;

/// A signed, replaceable record published to relays describing a repository's
/// metadata and mirror locations.
///
/// Tags are parsed defensively elsewhere; this struct carries them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementEvent {
    /// Event id: sha-256 of the canonical serialization, lowercase hex.
    pub id: String,
    /// Author public key, lowercase hex.
    pub pubkey: String,
    /// Unix seconds.
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    /// JSON payload that may duplicate or supplement tag data.
    pub content: String,
}

impl AnnouncementEvent {
    /// Compute the canonical event id: the sha-256 hash of the JSON array
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(&self) -> String {
        let canonical = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content,
        ]);
        let serialized = serde_json::to_string(&canonical).expect("canonical array serializes");
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether the claimed id matches the canonical serialization.
    pub fn id_is_valid(&self) -> bool {
        self.id == self.compute_id()
    }

    /// All values of tags with the given name, skipping the name itself.
    ///
    /// A tag like `["clone", "url1", "url2"]` contributes both urls; repeated
    /// tags contribute in document order. Tags with no value are skipped.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(|n| n.as_str()) == Some(name))
            .flat_map(|tag| tag.iter().skip(1))
            .map(|v| v.as_str())
    }

    /// The first value of the first tag with the given name, if any.
    pub fn first_tag_value<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.tag_values(name).next()
    }

    /// The repository name carried in the replaceable-event `d` tag.
    pub fn repo_name(&self) -> Option<&str> {
        self.first_tag_value("d")
    }
}
