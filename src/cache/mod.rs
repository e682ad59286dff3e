//! Local state: the persistent key-value cache and the per-repository
//! arbiter that keeps local edits ahead of remote data.

mod key_value;
mod repo_state;

pub use key_value::{KeyValueStore, MemoryStore, PutOutcome, Result, StoreError};
pub use repo_state::{Admission, RepoStateCache, ResolvedTree, TreeKey};
