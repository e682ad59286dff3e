//! Git-hosting backend implementations behind one read interface.

mod git_backend;
mod hosted_api;
mod memory;
mod mirror;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::sources::{SourceCandidate, SourceKind};

pub use git_backend::{
    normalize_tree_path, BackendError, EntryType, FileEntry, GitBackend, Result,
};
pub use hosted_api::HostedApiBackend;
pub use memory::MemoryBackend;
pub use mirror::MirrorBackend;

/// Routes each candidate to the backend implementation matching its kind:
/// external hosting brands go through the hosted-API translation, everything
/// else is treated as a mirror.
pub struct BackendRouter {
    hosted: Arc<dyn GitBackend>,
    mirror: Arc<dyn GitBackend>,
}

impl BackendRouter {
    pub fn new(hosted: Arc<dyn GitBackend>, mirror: Arc<dyn GitBackend>) -> Self {
        Self { hosted, mirror }
    }

    /// Router over the real HTTP implementations.
    pub fn http() -> Self {
        Self::new(
            Arc::new(HostedApiBackend::new()),
            Arc::new(MirrorBackend::new()),
        )
    }

    fn backend_for(&self, candidate: &SourceCandidate) -> &Arc<dyn GitBackend> {
        match candidate.kind {
            SourceKind::External => &self.hosted,
            SourceKind::Mirror | SourceKind::Unknown => &self.mirror,
        }
    }
}

#[async_trait]
impl GitBackend for BackendRouter {
    async fn fetch_tree(
        &self,
        candidate: &SourceCandidate,
        branch: &str,
    ) -> Result<Vec<FileEntry>> {
        self.backend_for(candidate).fetch_tree(candidate, branch).await
    }

    async fn fetch_file(
        &self,
        candidate: &SourceCandidate,
        path: &str,
        branch: &str,
    ) -> Result<Bytes> {
        self.backend_for(candidate)
            .fetch_file(candidate, path, branch)
            .await
    }
}
