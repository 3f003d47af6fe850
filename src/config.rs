//! Process configuration and the per-run options record.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable carrying the upstream LLM/TTS API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Optional override for the artifact root directory.
pub const ARTIFACTS_DIR_ENV: &str = "WAYFARER_ARTIFACTS_DIR";

/// Default vision model used when a run does not pick one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
/// TTS model candidates, tried in order until one returns audio.
pub const TTS_MODEL_CANDIDATES: &[&str] =
    &["gemini-2.5-flash-preview-tts", "gemini-2.5-pro-preview-tts"];

/// Process-level configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub artifacts_dir: PathBuf,
    pub api_base: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let artifacts_dir = env::var(ARTIFACTS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("artifacts"));
        Self {
            api_key: env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
            artifacts_dir,
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

/// Per-run options as accepted on `POST /start`. An explicit record; no
/// implicit global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// Target url; the only mandatory field.
    pub url: String,
    pub persona_name: String,
    pub objective: String,
    /// Keep the numbered SoM overlay visible in the operator stream.
    pub debug_mode: bool,
    pub model_name: String,
    pub tts_enabled: bool,
    pub headless_mode: bool,
    pub save_trace: bool,
    pub save_thoughts: bool,
    pub save_screenshots: bool,
    /// Bypass the LLM and pick uniformly from observed marks.
    pub monkey_mode: bool,
    /// Swap persona rules for a neutral evidence-driven instruction.
    pub bare_mode: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            persona_name: "default".to_string(),
            objective: "Explore the site and report what it offers.".to_string(),
            debug_mode: false,
            model_name: DEFAULT_MODEL.to_string(),
            tts_enabled: false,
            headless_mode: true,
            save_trace: true,
            save_thoughts: true,
            save_screenshots: false,
            monkey_mode: false,
            bare_mode: false,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<(), crate::errors::AgentError> {
        if self.url.trim().is_empty() {
            return Err(crate::errors::AgentError::invalid_request("url is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: RunOptions =
            serde_json::from_str(r#"{"url":"https://example.com","ttsEnabled":true}"#).unwrap();
        assert_eq!(opts.url, "https://example.com");
        assert!(opts.tts_enabled);
        assert!(!opts.debug_mode);
        assert_eq!(opts.model_name, DEFAULT_MODEL);
    }

    #[test]
    fn missing_url_is_rejected() {
        let opts = RunOptions::default();
        assert!(opts.validate().is_err());
    }
}
