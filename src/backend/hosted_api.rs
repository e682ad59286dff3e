//! Backend implementation for conventional hosted services.
//!
//! Translates the uniform tree/file interface onto the web APIs of the known
//! external hosting brands: the GitHub API shape, the GitLab API shape, and
//! the Gitea/Forgejo shape used by Codeberg and self-hosted forges.

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::sources::SourceCandidate;

use super::git_backend::{
    encode_tree_path, owner_repo_of, BackendError, FileEntry, GitBackend, Result,
};

/// Hosted-service API backend.
pub struct HostedApiBackend {
    client: Client,
}

impl HostedApiBackend {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn host_of(candidate: &SourceCandidate) -> Result<String> {
        candidate
            .host()
            .ok_or_else(|| BackendError::Unavailable("candidate url has no host".to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", "reposcout")
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| BackendError::Unavailable(format!("bad response body: {}", e))),
            StatusCode::NOT_FOUND => Err(BackendError::NotFound),
            status => Err(BackendError::Unavailable(format!(
                "unexpected status code: {}",
                status
            ))),
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", "reposcout")
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

impl Default for HostedApiBackend {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// API Response Shapes
// =============================================================================

/// GitHub and Gitea/Forgejo both answer `{ "tree": [ ... ] }`.
#[derive(Deserialize)]
struct GitTreeResponse {
    #[serde(default)]
    tree: Vec<GitTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct GitTreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    size: u64,
}

/// GitLab answers a bare array.
#[derive(Deserialize)]
struct GitLabTreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

fn convert_git_tree(response: GitTreeResponse) -> Vec<FileEntry> {
    if response.truncated {
        tracing::debug!("tree listing truncated by the hosting API");
    }
    response
        .tree
        .into_iter()
        .filter_map(|e| match e.entry_type.as_str() {
            "blob" => Some(FileEntry::file(e.path, e.size)),
            "tree" => Some(FileEntry::dir(e.path)),
            _ => None,
        })
        .collect()
}

// =============================================================================
// GitBackend Implementation
// =============================================================================

#[async_trait]
impl GitBackend for HostedApiBackend {
    async fn fetch_tree(
        &self,
        candidate: &SourceCandidate,
        branch: &str,
    ) -> Result<Vec<FileEntry>> {
        let host = Self::host_of(candidate)?;
        let (owner, repo) = owner_repo_of(candidate)?;

        match host.as_str() {
            "github.com" => {
                let url = format!(
                    "https://api.github.com/repos/{}/{}/git/trees/{}?recursive=1",
                    owner, repo, branch
                );
                Ok(convert_git_tree(self.get_json(&url).await?))
            }
            "gitlab.com" => {
                let project = utf8_percent_encode(
                    &format!("{}/{}", owner, repo),
                    NON_ALPHANUMERIC,
                )
                .to_string();
                let url = format!(
                    "https://gitlab.com/api/v4/projects/{}/repository/tree?ref={}&recursive=true&per_page=100",
                    project, branch
                );
                let entries: Vec<GitLabTreeEntry> = self.get_json(&url).await?;
                Ok(entries
                    .into_iter()
                    .filter_map(|e| match e.entry_type.as_str() {
                        "blob" => Some(FileEntry::file(e.path, 0)),
                        "tree" => Some(FileEntry::dir(e.path)),
                        _ => None,
                    })
                    .collect())
            }
            // Gitea/Forgejo API shape (Codeberg and self-hosted forges).
            _ => {
                let url = format!(
                    "https://{}/api/v1/repos/{}/{}/git/trees/{}?recursive=true",
                    host, owner, repo, branch
                );
                Ok(convert_git_tree(self.get_json(&url).await?))
            }
        }
    }

    async fn fetch_file(
        &self,
        candidate: &SourceCandidate,
        path: &str,
        branch: &str,
    ) -> Result<Bytes> {
        let host = Self::host_of(candidate)?;
        let (owner, repo) = owner_repo_of(candidate)?;
        let encoded_path = encode_tree_path(path);

        let url = match host.as_str() {
            "github.com" => format!(
                "https://raw.githubusercontent.com/{}/{}/{}/{}",
                owner, repo, branch, encoded_path
            ),
            "gitlab.com" => format!(
                "https://gitlab.com/{}/{}/-/raw/{}/{}",
                owner, repo, branch, encoded_path
            ),
            _ => format!(
                "https://{}/{}/{}/raw/branch/{}/{}",
                host, owner, repo, branch, encoded_path
            ),
        };
        self.get_bytes(&url).await
    }
}
