//! reposcout: repository resolution over decentralized git hosting.
//!
//! Repositories are announced on relays by their owner's key and mirrored
//! across interchangeable hosts. This crate turns a raw route (entity,
//! repo, branch) into the current announcement, a ranked list of fetchable
//! sources, the branch's file tree, and individual file contents, with
//! local unpublished edits always taking precedence over remote state.

pub mod backend;
pub mod cache;
pub mod config;
pub mod content;
pub mod engine;
pub mod events;
pub mod identity;
pub mod sources;
pub mod tree;

pub use cache::{Admission, RepoStateCache, ResolvedTree, TreeKey};
pub use config::EngineConfig;
pub use engine::{Resolution, ResolveContext, ResolveEngine, ResolveError};
pub use events::RepoAnnouncement;
pub use sources::SourceCandidate;
