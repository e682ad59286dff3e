//! Backend implementation for decentralized mirror servers.
//!
//! Mirrors expose a plain HTTP read surface rooted at the candidate URL:
//! a JSON tree listing per branch and raw blobs per path.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::sources::SourceCandidate;

use super::git_backend::{encode_tree_path, BackendError, FileEntry, GitBackend, Result};

/// Decentralized-mirror HTTP backend.
pub struct MirrorBackend {
    client: Client,
}

impl MirrorBackend {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn tree_url(candidate: &SourceCandidate, branch: &str) -> String {
        format!(
            "{}/tree/{}",
            candidate.url.trim_end_matches('/'),
            encode_tree_path(branch)
        )
    }

    fn blob_url(candidate: &SourceCandidate, branch: &str, path: &str) -> String {
        format!(
            "{}/blob/{}/{}",
            candidate.url.trim_end_matches('/'),
            encode_tree_path(branch),
            encode_tree_path(path)
        )
    }
}

impl Default for MirrorBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct MirrorTreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    size: u64,
}

#[async_trait]
impl GitBackend for MirrorBackend {
    async fn fetch_tree(
        &self,
        candidate: &SourceCandidate,
        branch: &str,
    ) -> Result<Vec<FileEntry>> {
        let response = self
            .client
            .get(Self::tree_url(candidate, branch))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let entries: Vec<MirrorTreeEntry> = response
                    .json()
                    .await
                    .map_err(|e| BackendError::Unavailable(format!("bad tree body: {}", e)))?;
                Ok(entries
                    .into_iter()
                    .filter_map(|e| match e.entry_type.as_str() {
                        "file" | "blob" => Some(FileEntry::file(e.path, e.size)),
                        "dir" | "tree" => Some(FileEntry::dir(e.path)),
                        _ => None,
                    })
                    .collect())
            }
            StatusCode::NOT_FOUND => Err(BackendError::NotFound),
            status => Err(BackendError::Unavailable(format!(
                "unexpected status code: {}",
                status
            ))),
        }
    }

    async fn fetch_file(
        &self,
        candidate: &SourceCandidate,
        path: &str,
        branch: &str,
    ) -> Result<Bytes> {
        let response = self
            .client
            .get(Self::blob_url(candidate, branch, path))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .bytes()
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string())),
            StatusCode::NOT_FOUND => Err(BackendError::NotFound),
            status => Err(BackendError::Unavailable(format!(
                "unexpected status code: {}",
                status
            ))),
        }
    }
}
