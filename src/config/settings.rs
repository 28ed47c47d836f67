//! Configuration settings for Tolk.

use super::prompts::CleanupPrompts;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub transcription: TranscriptionSettings,
    pub postprocess: PostprocessSettings,
    pub prompts: CleanupPrompts,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for temporary files (chunk output lives under it).
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            temp_dir: "/tmp/tolk".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Remote transcription adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Default transcription model id.
    pub model: String,
    /// API key for the transcription service. Falls back to OPENAI_API_KEY.
    pub api_key: Option<String>,
    /// Maximum concurrent chunk transcriptions. The service rate-limits, so
    /// values above 4 are clamped.
    pub max_concurrent_chunks: usize,
    /// Allow HTTP/2 protocol upgrades. The service's front-end terminates
    /// HTTP/2 streams mid-upload on long requests, so this stays off unless
    /// the service fixes that.
    pub allow_http2: bool,
    /// Per-request transport timeout in seconds. Uploads of ~20 MB over slow
    /// links can legitimately take minutes.
    pub request_timeout_secs: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            api_key: None,
            max_concurrent_chunks: 1,
            allow_http2: false,
            request_timeout_secs: 600,
        }
    }
}

impl TranscriptionSettings {
    /// The configured API key, or the OPENAI_API_KEY environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    /// Effective worker-pool size, clamped to [1, 4].
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_chunks.clamp(1, 4)
    }
}

/// AI post-processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessSettings {
    /// Enable LLM transcript cleanup. Off by default; also requires an API key.
    pub enabled: bool,
    /// Chat model used for cleanup.
    pub model: String,
    /// API key for the cleanup model. Falls back to OPENAI_API_KEY.
    pub api_key: Option<String>,
    /// Maximum segments sent to the model per request.
    pub max_segments_per_batch: usize,
    /// Separator inserted between texts when merging segments. Empty is
    /// correct for CJK scripts; whitespace-delimited languages want " ".
    pub text_joiner: String,
}

impl Default for PostprocessSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4o".to_string(),
            api_key: None,
            max_segments_per_batch: 50,
            text_joiner: String::new(),
        }
    }
}

impl PostprocessSettings {
    /// The configured API key, or the OPENAI_API_KEY environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TolkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tolk")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }
}
