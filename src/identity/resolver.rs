//! Resolution of raw route entities to canonical owner keys.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use super::entity::{decode_encoded_key, EntityRef, OwnerKey};

const MEMO_CAPACITY: usize = 256;

// =============================================================================
// PrefixDirectory Trait
// =============================================================================

/// Local lookup sources for abbreviated key prefixes.
///
/// Prefix resolution consults these in priority order: cached repository
/// records first, then contributor records, then previously observed
/// activity. Each lookup returns the first owner key whose hex form starts
/// with the prefix, or `None`.
#[async_trait]
pub trait PrefixDirectory: Send + Sync {
    /// Owner keys of locally cached repository records.
    async fn repo_owner_matching(&self, prefix: &str) -> Option<OwnerKey>;

    /// Keys of known contributor records.
    async fn contributor_matching(&self, prefix: &str) -> Option<OwnerKey>;

    /// Keys seen on previously observed activity records.
    async fn activity_matching(&self, prefix: &str) -> Option<OwnerKey>;
}

/// A directory with no local records. Every lookup misses.
pub struct EmptyPrefixDirectory;

#[async_trait]
impl PrefixDirectory for EmptyPrefixDirectory {
    async fn repo_owner_matching(&self, _prefix: &str) -> Option<OwnerKey> {
        None
    }
    async fn contributor_matching(&self, _prefix: &str) -> Option<OwnerKey> {
        None
    }
    async fn activity_matching(&self, _prefix: &str) -> Option<OwnerKey> {
        None
    }
}

// =============================================================================
// NameService Trait
// =============================================================================

/// Error type for name-service lookups.
#[derive(Debug, thiserror::Error)]
#[error("name service error: {0}")]
pub struct NameServiceError(pub String);

/// Resolves a `name@domain` handle to an owner key over the network.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Resolve a handle. `Ok(None)` means the service answered but does not
    /// know the name.
    async fn resolve(&self, name: &str, domain: &str)
        -> Result<Option<OwnerKey>, NameServiceError>;
}

/// HTTP implementation of [`NameService`] using the well-known JSON document
/// convention: `https://{domain}/.well-known/nostr.json?name={name}`.
pub struct HttpNameService {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct WellKnownNames {
    #[serde(default)]
    names: HashMap<String, String>,
}

impl HttpNameService {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpNameService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameService for HttpNameService {
    async fn resolve(
        &self,
        name: &str,
        domain: &str,
    ) -> Result<Option<OwnerKey>, NameServiceError> {
        let url = format!("https://{}/.well-known/nostr.json?name={}", domain, name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NameServiceError(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let doc: WellKnownNames = response
            .json()
            .await
            .map_err(|e| NameServiceError(e.to_string()))?;

        Ok(doc.names.get(name).map(|k| k.to_ascii_lowercase()))
    }
}

// =============================================================================
// IdentityResolver
// =============================================================================

/// Resolves a raw route entity to a canonical owner key.
///
/// Resolution is memoized per `(raw_entity, repo_name)` pair. Handle
/// resolution is asynchronous and re-entrant-safe: concurrent calls for the
/// same handle share a single in-flight lookup.
pub struct IdentityResolver {
    directory: Arc<dyn PrefixDirectory>,
    name_service: Arc<dyn NameService>,
    memo: Mutex<LruCache<(String, String), Option<OwnerKey>>>,
    in_flight_handles: Mutex<HashMap<String, Arc<OnceCell<Option<OwnerKey>>>>>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn PrefixDirectory>, name_service: Arc<dyn NameService>) -> Self {
        Self {
            directory,
            name_service,
            memo: Mutex::new(LruCache::new(
                NonZeroUsize::new(MEMO_CAPACITY).expect("nonzero capacity"),
            )),
            in_flight_handles: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a raw entity to an owner key.
    ///
    /// Returns `None` when the entity cannot be resolved; malformed encoded
    /// keys degrade to `None` rather than surfacing an error past this
    /// boundary. Callers getting `None` for a prefix should fall back to
    /// querying the event resolver with a broad filter.
    pub async fn resolve(&self, raw_entity: &str, repo_name: &str) -> Option<OwnerKey> {
        let memo_key = (raw_entity.to_string(), repo_name.to_string());
        if let Some(hit) = self.memo.lock().unwrap().get(&memo_key) {
            return hit.clone();
        }

        let resolved = match EntityRef::parse(raw_entity) {
            EntityRef::HexKey(key) => Some(key),
            EntityRef::Encoded(encoded) => match decode_encoded_key(&encoded) {
                Ok(key) => Some(key),
                Err(e) => {
                    debug!(entity = %raw_entity, error = %e, "failed to decode entity");
                    None
                }
            },
            EntityRef::Prefix(prefix) => self.resolve_prefix(&prefix).await,
            EntityRef::Handle(handle) => match self.resolve_handle(&handle).await {
                Ok(resolved) => resolved,
                // Transient lookup failure: leave the memo untouched so the
                // next call retries instead of seeing a cached miss.
                Err(_) => return None,
            },
            EntityRef::Unrecognized(_) => None,
        };

        self.memo.lock().unwrap().put(memo_key, resolved.clone());
        resolved
    }

    /// Resolve an 8-character prefix against local records, in priority
    /// order. First match wins.
    async fn resolve_prefix(&self, prefix: &str) -> Option<OwnerKey> {
        if let Some(key) = self.directory.repo_owner_matching(prefix).await {
            return Some(key);
        }
        if let Some(key) = self.directory.contributor_matching(prefix).await {
            return Some(key);
        }
        self.directory.activity_matching(prefix).await
    }

    /// Resolve a name-service handle, coalescing concurrent calls for the
    /// same handle onto one in-flight lookup.
    ///
    /// `Ok(None)` is a definitive miss; `Err` is a transient lookup failure
    /// the caller must not cache.
    async fn resolve_handle(
        &self,
        handle: &str,
    ) -> std::result::Result<Option<OwnerKey>, NameServiceError> {
        let (name, domain) = match split_handle(handle) {
            Some(parts) => parts,
            None => return Ok(None),
        };

        let cell = {
            let mut in_flight = self.in_flight_handles.lock().unwrap();
            in_flight
                .entry(handle.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                self.name_service
                    .resolve(&name, &domain)
                    .await
                    .map_err(|e| {
                        debug!(handle = %handle, error = %e, "name service lookup failed");
                        e
                    })
            })
            .await;

        match result {
            Ok(resolved) => Ok(resolved.clone()),
            Err(e) => {
                // Drop the cell so a later call can retry the lookup.
                self.in_flight_handles.lock().unwrap().remove(handle);
                Err(e)
            }
        }
    }
}

/// Split a handle into (name, domain). A handle of the form "@domain" uses
/// the well-known default name "_". Empty domains are invalid.
fn split_handle(handle: &str) -> Option<(String, String)> {
    let (name, domain) = handle.split_once('@')?;
    if domain.is_empty() {
        return None;
    }
    let name = if name.is_empty() { "_" } else { name };
    Some((name.to_string(), domain.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
