//! Configuration for NewsAcquire.
//!
//! Settings load from a JSON or YAML file (detected by extension, with a
//! JSON-then-YAML fallback for unknown extensions) and every key has a
//! default, so a missing file yields a working local setup rooted at the
//! data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{AcquireError, Result};

/// Default data directory name, used when no config file is found.
const DEFAULT_DATA_DIR: &str = "newsacquire-data";

/// OCR configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Tesseract language code, e.g. `eng`.
    pub language: String,
    /// Engine name; `tesseract` is the only built-in.
    pub engine: String,
    pub max_workers: usize,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            engine: "tesseract".to_string(),
            max_workers: 2,
        }
    }
}

/// Archive downloader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderSettings {
    /// Requests per second per host.
    pub rate_limit: f64,
    pub max_workers: usize,
    pub retry_attempts: u32,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            rate_limit: 2.0,
            max_workers: 4,
            retry_attempts: 5,
        }
    }
}

/// Work-queue and pipeline-service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Scheduler poll interval in seconds.
    pub poll_interval: u64,
    /// Worker pool size.
    pub max_concurrent: usize,
    /// Maximum tasks dispatched as one batch; 1 disables batching.
    pub batch_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval: 5,
            max_concurrent: 2,
            batch_size: 1,
        }
    }
}

/// Retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Days to keep terminal tasks and completed bulks before cleanup.
    pub archive_days: u32,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self { archive_days: 30 }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base directory of the on-disk repository.
    pub repository_path: PathBuf,
    /// Repository index database file.
    pub database_path: PathBuf,
    /// Search index database file.
    pub search_index_path: PathBuf,
    /// Main historical-events database file.
    pub main_database_path: PathBuf,
    pub ocr: OcrSettings,
    pub downloader: DownloaderSettings,
    pub queue: QueueSettings,
    pub retention: RetentionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self::rooted_at(Path::new(DEFAULT_DATA_DIR))
    }
}

impl Settings {
    /// Settings with every path derived from one data directory.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            repository_path: dir.join("repository"),
            database_path: dir.join("repository.db"),
            search_index_path: dir.join("search_index.db"),
            main_database_path: dir.join("main.db"),
            ocr: OcrSettings::default(),
            downloader: DownloaderSettings::default(),
            queue: QueueSettings::default(),
            retention: RetentionSettings::default(),
        }
    }

    /// Load settings from a JSON or YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let parsed = match ext.as_str() {
            "json" => serde_json::from_str(content)
                .map_err(|e| AcquireError::Validation(format!("invalid JSON config: {e}"))),
            "yaml" | "yml" => serde_yaml::from_str(content)
                .map_err(|e| AcquireError::Validation(format!("invalid YAML config: {e}"))),
            _ => serde_json::from_str(content).or_else(|json_err| {
                serde_yaml::from_str(content).map_err(|yaml_err| {
                    AcquireError::Validation(format!(
                        "config is neither JSON ({json_err}) nor YAML ({yaml_err})"
                    ))
                })
            }),
        }?;

        Ok(parsed)
    }

    /// Load from the given path, or fall back to discovery and defaults.
    ///
    /// Discovery order: `newsacquire.json`, `newsacquire.yaml` in the
    /// current directory.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        for candidate in ["newsacquire.json", "newsacquire.yaml"] {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load(path);
            }
        }
        Ok(Self::default())
    }

    /// Write current settings as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AcquireError::Internal(format!("serialize config: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.downloader.rate_limit, 2.0);
        assert_eq!(settings.queue.max_concurrent, 2);
        assert_eq!(settings.queue.poll_interval, 5);
        assert_eq!(settings.ocr.language, "eng");
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"ocr": {"language": "deu"}, "queue": {"max_concurrent": 8}}"#;
        let settings = Settings::parse(json, Path::new("c.json")).unwrap();
        assert_eq!(settings.ocr.language, "deu");
        assert_eq!(settings.queue.max_concurrent, 8);
        // untouched sections keep defaults
        assert_eq!(settings.downloader.retry_attempts, 5);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = "downloader:\n  rate_limit: 0.5\nretention:\n  archive_days: 7\n";
        let settings = Settings::parse(yaml, Path::new("c.yaml")).unwrap();
        assert_eq!(settings.downloader.rate_limit, 0.5);
        assert_eq!(settings.retention.archive_days, 7);
    }

    #[test]
    fn test_parse_unknown_extension_falls_back() {
        let yaml = "ocr:\n  engine: tesseract\n";
        let settings = Settings::parse(yaml, Path::new("c.conf")).unwrap();
        assert_eq!(settings.ocr.engine, "tesseract");
    }

    #[test]
    fn test_bad_config_is_validation_error() {
        let err = Settings::parse("{not json", Path::new("c.json")).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Validation);
    }
}
