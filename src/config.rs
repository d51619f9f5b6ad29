//! Runtime configuration
//!
//! Settings come from the environment; the YAML catalogs (`events.yaml`,
//! `glossary.yaml`) load once from the config directory at startup and are
//! treated as read-only for the lifetime of a job.

use crate::error::StageError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Default request timeout for LLM calls.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;
/// Default request timeout for the transcription upload.
pub const DEFAULT_TRANSCRIPTION_TIMEOUT_SECS: u64 = 600;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_path(name: &str, default: impl FnOnce() -> Utf8PathBuf) -> Utf8PathBuf {
    env_var(name).map(Utf8PathBuf::from).unwrap_or_else(default)
}

/// Effective runtime settings, resolved once per process.
#[derive(Debug, Clone)]
pub struct Settings {
    // Service endpoints
    pub anthropic_api_key: Option<String>,
    pub ollama_base_url: String,
    pub whisper_base_url: String,
    pub https_proxy: Option<String>,

    // Paths
    pub data_root: Utf8PathBuf,
    pub inbox_dir: Utf8PathBuf,
    pub archive_dir: Utf8PathBuf,
    pub temp_dir: Utf8PathBuf,
    pub config_dir: Utf8PathBuf,
    /// External prompts root overriding built-in fragments
    pub prompts_dir: Option<Utf8PathBuf>,

    // Model defaults per stage
    pub cleaner_model: String,
    pub longread_model: String,
    pub summary_model: String,
    pub story_model: String,
    pub slides_model: String,
    pub transcription_model: String,

    // Behavior
    pub llm_timeout: Duration,
    pub transcription_timeout: Duration,
    pub include_timestamps: bool,
    pub max_parallel_sections: usize,
    pub slide_batch_size: usize,
}

impl Settings {
    /// Resolve settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns a `configuration` error for values that parse but are invalid
    /// (zero timeout, zero parallelism). Missing optional values fall back to
    /// defaults; a missing API key only fails later, when a cloud model is
    /// actually requested.
    pub fn from_env() -> Result<Self, StageError> {
        let data_root = env_path("DATA_ROOT", || Utf8PathBuf::from("data"));
        let inbox_dir = env_path("INBOX_DIR", || data_root.join("inbox"));
        let archive_dir = env_path("ARCHIVE_DIR", || data_root.join("archive"));
        let temp_dir = env_path("TEMP_DIR", || data_root.join("temp"));
        let config_dir = env_path("CONFIG_DIR", || Utf8PathBuf::from("config"));

        let llm_timeout_secs = match env_var("LLM_TIMEOUT_SEC") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                StageError::configuration(format!("LLM_TIMEOUT_SEC is not a number: '{raw}'"))
            })?,
            None => DEFAULT_LLM_TIMEOUT_SECS,
        };
        if llm_timeout_secs == 0 {
            return Err(StageError::configuration("LLM_TIMEOUT_SEC must be > 0"));
        }

        let max_parallel_sections = match env_var("MAX_PARALLEL_SECTIONS") {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                StageError::configuration(format!(
                    "MAX_PARALLEL_SECTIONS is not a number: '{raw}'"
                ))
            })?,
            None => 2,
        };
        if max_parallel_sections == 0 {
            return Err(StageError::configuration(
                "MAX_PARALLEL_SECTIONS must be > 0",
            ));
        }

        Ok(Self {
            anthropic_api_key: env_var("ANTHROPIC_API_KEY"),
            ollama_base_url: env_var("OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            whisper_base_url: env_var("WHISPER_BASE_URL")
                .unwrap_or_else(|| "http://localhost:9000".to_string()),
            https_proxy: env_var("HTTPS_PROXY").or_else(|| env_var("HTTP_PROXY")),
            data_root,
            inbox_dir,
            archive_dir,
            temp_dir,
            config_dir,
            prompts_dir: env_var("PROMPTS_DIR").map(Utf8PathBuf::from),
            cleaner_model: env_var("CLEANER_MODEL").unwrap_or_else(|| "qwen2.5:32b".to_string()),
            longread_model: env_var("LONGREAD_MODEL")
                .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
            summary_model: env_var("SUMMARY_MODEL")
                .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
            story_model: env_var("STORY_MODEL")
                .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
            slides_model: env_var("SLIDES_MODEL")
                .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
            transcription_model: env_var("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| "whisper-large-v3".to_string()),
            llm_timeout: Duration::from_secs(llm_timeout_secs),
            transcription_timeout: Duration::from_secs(
                env_var("TRANSCRIPTION_TIMEOUT_SEC")
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(DEFAULT_TRANSCRIPTION_TIMEOUT_SECS),
            ),
            include_timestamps: env_var("INCLUDE_TIMESTAMPS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            max_parallel_sections,
            slide_batch_size: 5,
        })
    }

    /// Default model for a stage, `None` for stages that never call an LLM.
    #[must_use]
    pub fn default_model_for(&self, stage: &str) -> Option<&str> {
        match stage {
            "clean" => Some(&self.cleaner_model),
            "longread" => Some(&self.longread_model),
            "summarize" => Some(&self.summary_model),
            "story" => Some(&self.story_model),
            "slides" => Some(&self.slides_model),
            "transcribe" => Some(&self.transcription_model),
            _ => None,
        }
    }
}

/// Known event codes mapped to display names, loaded from `events.yaml`.
///
/// Parse normalizes `event_type` through this catalog; unknown codes pass
/// through unchanged so new events don't require a config change first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsCatalog {
    #[serde(default)]
    pub events: BTreeMap<String, String>,
    #[serde(default)]
    pub streams: BTreeMap<String, String>,
}

impl EventsCatalog {
    /// Load from `<config_dir>/events.yaml`; missing file yields an empty
    /// catalog with a warning.
    pub fn load(config_dir: &Utf8Path) -> anyhow::Result<Self> {
        let path = config_dir.join("events.yaml");
        if !path.exists() {
            warn!(%path, "events.yaml not found, event codes pass through unmapped");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let catalog: Self = serde_yaml::from_str(&raw)?;
        Ok(catalog)
    }

    /// Canonical code for an event: identity unless the catalog remaps it.
    #[must_use]
    pub fn normalize_event(&self, code: &str) -> String {
        self.events
            .get(code)
            .cloned()
            .unwrap_or_else(|| code.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_settings_defaults() {
        // SAFETY: serialized test, variables restored below
        unsafe {
            std::env::remove_var("DATA_ROOT");
            std::env::remove_var("LLM_TIMEOUT_SEC");
            std::env::remove_var("MAX_PARALLEL_SECTIONS");
        }
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.inbox_dir, Utf8PathBuf::from("data/inbox"));
        assert_eq!(settings.llm_timeout, Duration::from_secs(300));
        assert_eq!(settings.transcription_timeout, Duration::from_secs(600));
        assert_eq!(settings.max_parallel_sections, 2);
        assert_eq!(settings.slide_batch_size, 5);
        assert!(!settings.include_timestamps);
    }

    #[test]
    #[serial]
    fn test_invalid_timeout_is_configuration_error() {
        // SAFETY: serialized test
        unsafe {
            std::env::set_var("LLM_TIMEOUT_SEC", "abc");
        }
        let err = Settings::from_env().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
        // SAFETY: cleanup
        unsafe {
            std::env::remove_var("LLM_TIMEOUT_SEC");
        }
    }

    #[test]
    #[serial]
    fn test_default_model_per_stage() {
        // SAFETY: serialized test
        unsafe {
            std::env::remove_var("CLEANER_MODEL");
        }
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.default_model_for("clean"), Some("qwen2.5:32b"));
        assert!(settings.default_model_for("parse").is_none());
        assert!(settings.default_model_for("chunk").is_none());
    }

    #[test]
    fn test_events_catalog_normalize() {
        let catalog: EventsCatalog = serde_yaml::from_str("events:\n  ПШ: ПШ\n  МК: Мастер-класс\n").unwrap();
        assert_eq!(catalog.normalize_event("МК"), "Мастер-класс");
        assert_eq!(catalog.normalize_event("ХХ"), "ХХ");
    }
}
