//! Configuration file parser for `config.toml`.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`, unknown keys are accepted with a warning, and the
//! result is always passed through [`Config::validate`] before use.
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheme + host (+ port) that relative media paths are resolved against
    /// when the feed is written. Trailing slashes are trimmed by `validate`.
    pub base_url: String,

    pub paths: PathsConfig,

    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub artwork_dir: PathBuf,
    /// The canonical feed file.
    pub rss_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_mb: u64,
    pub max_artwork_size_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            paths: PathsConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            audio_dir: PathBuf::from("./data/audio"),
            artwork_dir: PathBuf::from("./data/artwork"),
            rss_file: PathBuf::from("./data/podcast.xml"),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 500,
            max_artwork_size_mb: 5,
        }
    }
}

impl UploadConfig {
    pub fn max_audio_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_artwork_bytes(&self) -> u64 {
        self.max_artwork_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing file → defaults
    /// - Empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Failed validation → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.validate()?;
        tracing::info!(path = %path.display(), base_url = %config.base_url, "Loaded configuration");
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        // One byte past the cap is enough to tell an oversized file apart.
        let mut content = String::new();
        file.take(Self::MAX_FILE_SIZE + 1)
            .read_to_string(&mut content)?;
        if content.len() as u64 > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "{} exceeds {} bytes",
                path.display(),
                Self::MAX_FILE_SIZE
            )));
        }

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let table: toml::Table = content.parse()?;
        warn_unknown_keys(&table);
        Ok(toml::Value::Table(table).try_into()?)
    }

    /// Checks `base_url` and normalizes it.
    ///
    /// It must be present, use http or https, and include a host. A trailing
    /// slash is removed.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url is required".to_string()));
        }

        let parsed = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url is invalid: {e}")))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::Invalid(format!(
                "base_url must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid(
                "base_url must include a host (e.g., http://example.com)".to_string(),
            ));
        }

        self.base_url = self.base_url.trim_end_matches('/').to_string();
        Ok(())
    }
}

/// Keys understood inside each known section.
fn section_fields(section: &str) -> Option<&'static [&'static str]> {
    match section {
        "paths" => Some(&["data_dir", "audio_dir", "artwork_dir", "rss_file"]),
        "upload" => Some(&["max_file_size_mb", "max_artwork_size_mb"]),
        _ => None,
    }
}

/// Logs keys the config structs do not know; they are otherwise ignored.
fn warn_unknown_keys(table: &toml::Table) {
    for (key, value) in table {
        if key == "base_url" {
            continue;
        }
        let Some(fields) = section_fields(key) else {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            continue;
        };
        if let Some(section) = value.as_table() {
            for field in section.keys().filter(|f| !fields.contains(&f.as_str())) {
                let dotted = format!("{key}.{field}");
                tracing::warn!(key = %dotted, "Unknown key in config file, ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
