//! Configuration types for reposcout-rs.
//!
//! This module defines the structures used to represent engine configuration
//! as parsed from an INI-format config file.

use std::time::Duration;

// =============================================================================
// Config Sections
// =============================================================================

/// [relays] section - relay endpoints queried for announcement events.
#[derive(Debug, Clone)]
pub struct RelaysConfig {
    /// Relay URLs, queried in order after git-capable reordering.
    pub urls: Vec<String>,
}

/// [sources] section - source expansion behavior.
#[derive(Debug, Clone)]
pub struct SourcesConfig {
    /// Hostnames of known decentralized-mirror servers.
    ///
    /// One observed clone URL on any of these implies speculative candidates
    /// on all the others, using the same path.
    pub mirror_hosts: Vec<String>,
    /// Hostnames of known external hosting services.
    pub external_hosts: Vec<String>,
    /// Upper bound on the expanded candidate list.
    pub max_candidates: usize,
}

/// [timeouts] section - per-operation time bounds.
#[derive(Debug, Clone)]
pub struct TimeoutsConfig {
    /// How long to keep waiting for slower relays after the first usable
    /// announcement record arrives.
    pub grace_window: Duration,
    /// Per-candidate bound for a single tree or file fetch.
    pub per_source: Duration,
    /// Overall bound on the multi-source race before giving up on the
    /// remaining candidates.
    pub race: Duration,
}

/// [cache] section - persistent cache behavior.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte quota for the backing key-value store, if any. Writes beyond the
    /// quota degrade to in-memory only.
    pub quota_bytes: Option<u64>,
}

// =============================================================================
// Top-Level Config
// =============================================================================

/// Complete engine configuration as parsed from a config file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub relays: RelaysConfig,
    pub sources: SourcesConfig,
    pub timeouts: TimeoutsConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// True if the given hostname is a known decentralized-mirror host.
    pub fn is_mirror_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.sources.mirror_hosts.iter().any(|m| *m == host)
    }

    /// True if the given hostname is a known external hosting service.
    pub fn is_external_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.sources.external_hosts.iter().any(|e| *e == host)
    }
}
