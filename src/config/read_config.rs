//! Configuration file reading and parsing.
//!
//! Locates and parses an INI-format configuration file. Every field has a
//! default, so a missing config file yields the default configuration rather
//! than an error; an explicitly specified file that cannot be read is an
//! error.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use configparser::ini::Ini;
use thiserror::Error;

use super::{CacheConfig, EngineConfig, RelaysConfig, SourcesConfig, TimeoutsConfig};

// =============================================================================
// Constants - Default Values
// =============================================================================

const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.ngit.dev",
    "wss://nos.lol",
    "wss://relay.damus.io",
];

const DEFAULT_MIRROR_HOSTS: &[&str] = &["relay.ngit.dev", "git.shakespeare.dev"];

const DEFAULT_EXTERNAL_HOSTS: &[&str] = &[
    "github.com",
    "gitlab.com",
    "codeberg.org",
    "bitbucket.org",
];

const DEFAULT_MAX_CANDIDATES: usize = 16;
const DEFAULT_GRACE_WINDOW_MS: u64 = 2_000;
const DEFAULT_PER_SOURCE_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_RACE_TIMEOUT_MS: u64 = 15_000;

const ENV_CONFIG_FILE: &str = "REPOSCOUT_CONFIG_FILE";
const DEFAULT_CONFIG_FILENAME: &str = ".reposcout";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid integer '{value}' for key '{key}': {source}")]
    InvalidInteger {
        key: String,
        value: String,
        source: std::num::ParseIntError,
    },
}

/// Result type for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// =============================================================================
// ConfigSource
// =============================================================================

/// Specifies how to locate configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    /// Explicit config file path. If specified and it doesn't exist, error.
    /// If None, fall back to REPOSCOUT_CONFIG_FILE env var, then
    /// ~/.reposcout, then built-in defaults.
    pub config_file: Option<PathBuf>,
}

// =============================================================================
// Defaults
// =============================================================================

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relays: RelaysConfig {
                urls: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            },
            sources: SourcesConfig {
                mirror_hosts: DEFAULT_MIRROR_HOSTS.iter().map(|s| s.to_string()).collect(),
                external_hosts: DEFAULT_EXTERNAL_HOSTS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                max_candidates: DEFAULT_MAX_CANDIDATES,
            },
            timeouts: TimeoutsConfig {
                grace_window: Duration::from_millis(DEFAULT_GRACE_WINDOW_MS),
                per_source: Duration::from_millis(DEFAULT_PER_SOURCE_TIMEOUT_MS),
                race: Duration::from_millis(DEFAULT_RACE_TIMEOUT_MS),
            },
            cache: CacheConfig { quota_bytes: None },
        }
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

/// Parse a comma-separated list value, trimming entries and dropping empties.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_u64(ini: &Ini, section: &str, key: &str, default: u64) -> Result<u64> {
    match ini.get(section, key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidInteger {
                key: format!("{}.{}", section, key),
                value,
                source,
            }),
        None => Ok(default),
    }
}

// =============================================================================
// read_config
// =============================================================================

/// Read the engine configuration from the given source.
pub fn read_config(source: &ConfigSource) -> Result<EngineConfig> {
    let path = match resolve_config_path(source)? {
        Some(path) => path,
        None => return Ok(EngineConfig::default()),
    };

    let mut ini = Ini::new();
    ini.load(&path).map_err(|message| ConfigError::ParseError {
        path: path.clone(),
        message,
    })?;

    let defaults = EngineConfig::default();

    let relays = match ini.get("relays", "urls") {
        Some(value) => RelaysConfig {
            urls: parse_list(&value),
        },
        None => defaults.relays,
    };

    let sources = SourcesConfig {
        mirror_hosts: ini
            .get("sources", "mirror_hosts")
            .map(|v| parse_list(&v))
            .unwrap_or(defaults.sources.mirror_hosts),
        external_hosts: ini
            .get("sources", "external_hosts")
            .map(|v| parse_list(&v))
            .unwrap_or(defaults.sources.external_hosts),
        max_candidates: parse_u64(
            &ini,
            "sources",
            "max_candidates",
            DEFAULT_MAX_CANDIDATES as u64,
        )? as usize,
    };

    let timeouts = TimeoutsConfig {
        grace_window: Duration::from_millis(parse_u64(
            &ini,
            "timeouts",
            "grace_window_ms",
            DEFAULT_GRACE_WINDOW_MS,
        )?),
        per_source: Duration::from_millis(parse_u64(
            &ini,
            "timeouts",
            "per_source_ms",
            DEFAULT_PER_SOURCE_TIMEOUT_MS,
        )?),
        race: Duration::from_millis(parse_u64(
            &ini,
            "timeouts",
            "race_ms",
            DEFAULT_RACE_TIMEOUT_MS,
        )?),
    };

    let cache = CacheConfig {
        quota_bytes: match ini.get("cache", "quota_bytes") {
            Some(_) => Some(parse_u64(&ini, "cache", "quota_bytes", 0)?),
            None => None,
        },
    };

    Ok(EngineConfig {
        relays,
        sources,
        timeouts,
        cache,
    })
}

/// Resolve which config file to read, if any.
fn resolve_config_path(source: &ConfigSource) -> Result<Option<PathBuf>> {
    if let Some(path) = &source.config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.clone()));
        }
        return Ok(Some(path.clone()));
    }

    if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(home) = env::var_os("HOME") {
        let path = Path::new(&home).join(DEFAULT_CONFIG_FILENAME);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_yields_defaults() {
        let config = read_config(&ConfigSource::default()).unwrap();
        assert_eq!(config.sources.max_candidates, DEFAULT_MAX_CANDIDATES);
        assert!(!config.relays.urls.is_empty());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let source = ConfigSource {
            config_file: Some(PathBuf::from("/nonexistent/reposcout.ini")),
        };
        assert!(matches!(
            read_config(&source),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn parses_sections_and_lists() {
        let dir = std::env::temp_dir().join("reposcout-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.ini");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[relays]").unwrap();
        writeln!(f, "urls = wss://a.example, wss://b.example").unwrap();
        writeln!(f, "[sources]").unwrap();
        writeln!(f, "mirror_hosts = mirror.one, mirror.two").unwrap();
        writeln!(f, "max_candidates = 4").unwrap();
        writeln!(f, "[timeouts]").unwrap();
        writeln!(f, "grace_window_ms = 500").unwrap();

        let source = ConfigSource {
            config_file: Some(path),
        };
        let config = read_config(&source).unwrap();
        assert_eq!(config.relays.urls, vec!["wss://a.example", "wss://b.example"]);
        assert_eq!(config.sources.mirror_hosts, vec!["mirror.one", "mirror.two"]);
        assert_eq!(config.sources.max_candidates, 4);
        assert_eq!(config.timeouts.grace_window, Duration::from_millis(500));
        // Unspecified sections keep defaults.
        assert_eq!(
            config.timeouts.race,
            Duration::from_millis(DEFAULT_RACE_TIMEOUT_MS)
        );
    }
}
