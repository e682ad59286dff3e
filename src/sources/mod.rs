//! Source expansion: turn sparse announced clone locations into a ranked,
//! deduplicated candidate list.
//!
//! Git mirrors commonly replicate identical paths across hosts, so one
//! observed mirror URL implies the same path on every other known mirror
//! host is worth trying even though it was never announced.

use url::Url;

use crate::config::EngineConfig;

// =============================================================================
// Types
// =============================================================================

/// What kind of backend a candidate points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A decentralized mirror server.
    Mirror,
    /// A conventional hosted service (known brand, known API shape).
    External,
    Unknown,
}

/// A fetchable location for repository content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    /// Normalized URL: https form, no trailing slash or `.git`.
    pub url: String,
    pub kind: SourceKind,
    /// Lower sorts first. External hosts sort before generic mirrors, and
    /// explicit clone locations sort before speculative expansions.
    pub priority: i32,
}

impl SourceCandidate {
    /// Hostname of the candidate URL, lowercase.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

fn priority_for(kind: SourceKind, speculative: bool) -> i32 {
    let base = match kind {
        SourceKind::External => 0,
        SourceKind::Mirror => 10,
        SourceKind::Unknown => 20,
    };
    base + if speculative { 5 } else { 0 }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize a raw clone location.
///
/// SSH syntax (`user@host:path` and `ssh://user@host/path`) is converted to
/// an equivalent HTTPS form; a trailing `.git` or `/` is stripped. Returns
/// `None` for locations that cannot be made into a fetchable remote URL,
/// including anything resolving to a loopback/local address.
pub fn normalize_location(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let https_form = if let Some(rest) = raw.strip_prefix("ssh://") {
        let rest = rest.split_once('@').map(|(_, r)| r).unwrap_or(rest);
        format!("https://{}", rest)
    } else if !raw.contains("://") {
        // scp-like syntax: user@host:path
        let rest = raw.split_once('@').map(|(_, r)| r).unwrap_or(raw);
        let (host, path) = rest.split_once(':')?;
        format!("https://{}/{}", host, path.trim_start_matches('/'))
    } else {
        raw.to_string()
    };

    let parsed = Url::parse(&https_form).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    if is_local_host(host) {
        return None;
    }

    let mut normalized = format!(
        "{}://{}{}",
        parsed.scheme(),
        host.to_ascii_lowercase(),
        parsed.path()
    );
    while normalized.ends_with('/') {
        normalized.pop();
    }
    if let Some(stripped) = normalized.strip_suffix(".git") {
        normalized = stripped.to_string();
    }
    Some(normalized)
}

/// Loopback/local addresses are never valid remote git mirrors.
fn is_local_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local") {
        return true;
    }
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<std::net::IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }
    false
}

/// Case-insensitive dedup key, ignoring a trailing `.git`.
fn dedup_key(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    lower
        .strip_suffix(".git")
        .map(|s| s.to_string())
        .unwrap_or(lower)
}

// =============================================================================
// Expansion
// =============================================================================

/// Expand announced clone locations plus an optional source mirror into the
/// ranked candidate list.
///
/// Idempotent: expanding an already-expanded list yields the same set. The
/// result is capped at `sources.max_candidates`.
pub fn expand_sources(
    config: &EngineConfig,
    clone_locations: &[String],
    source_mirror: Option<&str>,
) -> Vec<SourceCandidate> {
    let mut candidates: Vec<SourceCandidate> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    let mut push = |candidates: &mut Vec<SourceCandidate>,
                    seen: &mut Vec<String>,
                    url: String,
                    kind: SourceKind,
                    speculative: bool| {
        let key = dedup_key(&url);
        if seen.contains(&key) {
            return;
        }
        seen.push(key);
        candidates.push(SourceCandidate {
            url,
            kind,
            priority: priority_for(kind, speculative),
        });
    };

    // Explicit clone locations.
    for raw in clone_locations {
        let Some(url) = normalize_location(raw) else {
            continue;
        };
        let kind = kind_of(config, &url);
        push(&mut candidates, &mut seen, url, kind, false);
    }

    // The externally-known source mirror, when not already announced.
    if let Some(raw) = source_mirror {
        if let Some(url) = normalize_location(raw) {
            let kind = kind_of(config, &url);
            if kind == SourceKind::External {
                push(&mut candidates, &mut seen, url, kind, false);
            }
        }
    }

    // Mirror-host synthesis: one observed mirror path implies the same path
    // on every other known mirror host.
    let mirror_paths: Vec<String> = candidates
        .iter()
        .filter(|c| c.kind == SourceKind::Mirror)
        .filter_map(|c| Url::parse(&c.url).ok())
        .map(|u| u.path().to_string())
        .collect();
    for path in mirror_paths {
        for host in &config.sources.mirror_hosts {
            let url = format!("https://{}{}", host, path);
            push(&mut candidates, &mut seen, url, SourceKind::Mirror, true);
        }
    }

    candidates.sort_by_key(|c| c.priority);
    candidates.truncate(config.sources.max_candidates);
    candidates
}

fn kind_of(config: &EngineConfig, url: &str) -> SourceKind {
    let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
        Some(host) => host,
        None => return SourceKind::Unknown,
    };
    if config.is_external_host(&host) {
        SourceKind::External
    } else if config.is_mirror_host(&host) {
        SourceKind::Mirror
    } else {
        SourceKind::Unknown
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.sources.mirror_hosts =
            vec!["mirror.one".to_string(), "mirror.two".to_string()];
        config
    }

    #[test]
    fn normalizes_ssh_and_strips_git_suffix() {
        assert_eq!(
            normalize_location("git@github.com:owner/repo.git"),
            Some("https://github.com/owner/repo".to_string())
        );
        assert_eq!(
            normalize_location("ssh://git@github.com/owner/repo.git"),
            Some("https://github.com/owner/repo".to_string())
        );
        assert_eq!(
            normalize_location("https://github.com/Owner/Repo.git/"),
            Some("https://github.com/Owner/Repo".to_string())
        );
    }

    #[test]
    fn drops_loopback_and_local_hosts() {
        assert_eq!(normalize_location("http://localhost:3000/r"), None);
        assert_eq!(normalize_location("http://127.0.0.1/r"), None);
        assert_eq!(normalize_location("http://[::1]/r"), None);
        assert_eq!(normalize_location("http://0.0.0.0/r"), None);
        assert_eq!(normalize_location("http://box.local/r"), None);
    }

    #[test]
    fn externals_sort_before_mirrors_and_explicit_before_speculative() {
        let candidates = expand_sources(
            &config(),
            &[
                "https://mirror.one/abc/repo.git".to_string(),
                "https://github.com/owner/repo".to_string(),
            ],
            None,
        );
        let urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://github.com/owner/repo",
                "https://mirror.one/abc/repo",
                "https://mirror.two/abc/repo",
            ]
        );
        assert_eq!(candidates[2].kind, SourceKind::Mirror);
        assert!(candidates[1].priority < candidates[2].priority);
    }

    #[test]
    fn source_mirror_appended_when_absent() {
        let candidates = expand_sources(
            &config(),
            &["https://mirror.one/abc/repo".to_string()],
            Some("git@github.com:owner/repo.git"),
        );
        assert!(candidates
            .iter()
            .any(|c| c.url == "https://github.com/owner/repo" && c.kind == SourceKind::External));
    }

    #[test]
    fn source_mirror_not_duplicated_when_announced() {
        let candidates = expand_sources(
            &config(),
            &["https://github.com/owner/repo.git".to_string()],
            Some("https://GitHub.com/owner/repo"),
        );
        let github_count = candidates
            .iter()
            .filter(|c| c.host().as_deref() == Some("github.com"))
            .count();
        assert_eq!(github_count, 1);
    }

    #[test]
    fn expansion_is_idempotent() {
        let first = expand_sources(
            &config(),
            &[
                "https://mirror.one/abc/repo.git".to_string(),
                "https://github.com/owner/repo".to_string(),
            ],
            None,
        );
        let urls: Vec<String> = first.iter().map(|c| c.url.clone()).collect();
        let second = expand_sources(&config(), &urls, None);
        let mut first_set: Vec<String> = first.iter().map(|c| dedup_key(&c.url)).collect();
        let mut second_set: Vec<String> = second.iter().map(|c| dedup_key(&c.url)).collect();
        first_set.sort();
        second_set.sort();
        assert_eq!(first_set, second_set);
    }

    #[test]
    fn candidate_list_is_capped() {
        let mut config = config();
        config.sources.max_candidates = 2;
        config.sources.mirror_hosts = (0..10).map(|i| format!("mirror{}.example", i)).collect();
        let candidates = expand_sources(
            &config,
            &["https://mirror0.example/abc/repo".to_string()],
            None,
        );
        assert_eq!(candidates.len(), 2);
    }
}
