//! Configuration system (layered: code > env > config file).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::realtime::config::{MaxOutputTokens, SessionConfig};
use crate::audio::realtime::peer::PeerSettings;
use crate::audio::realtime::timer::TimerSettings;
use crate::error::RealtalkError;

/// Environment variables read by [`RealtalkConfig::apply_env`].
pub mod env {
    pub const API_KEY: &str = "REALTALK_API_KEY";
    pub const API_KEY_FALLBACK: &str = "OPENAI_API_KEY";
    pub const SESSION_URL: &str = "REALTALK_SESSION_URL";
    pub const WEBRTC_URL: &str = "REALTALK_WEBRTC_URL";
    pub const MODEL: &str = "REALTALK_MODEL";
    pub const VOICE: &str = "REALTALK_VOICE";
    pub const INSTRUCTIONS: &str = "REALTALK_INSTRUCTIONS";
    pub const TEMPERATURE: &str = "REALTALK_TEMPERATURE";
    pub const MAX_TOKENS: &str = "REALTALK_MAX_TOKENS";
}

/// Everything needed to run sessions.
///
/// TOML layout:
///
/// ```toml
/// [session]
/// model = "gpt-4o-realtime-preview"
/// voice = "alloy"
///
/// [session.turn_detection]
/// type = "semantic_vad"
/// eagerness = "high"
///
/// [timer]
/// duration = 120
///
/// [[peer.ice_servers]]
/// urls = ["stun:stun.l.google.com:19302"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtalkConfig {
    pub session: SessionConfig,
    pub timer: TimerSettings,
    pub peer: PeerSettings,
}

impl RealtalkConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, RealtalkError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RealtalkError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Defaults overlaid with `.env` and process environment variables.
    pub fn from_env() -> Result<Self, RealtalkError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Optional config file, then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, RealtalkError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `REALTALK_*` variables (loading `.env` if present).
    pub fn apply_env(&mut self) -> Result<(), RealtalkError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay variables resolved through `lookup`. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), RealtalkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let session = &mut self.session;

        if let Some(key) = get(env::API_KEY).or_else(|| get(env::API_KEY_FALLBACK)) {
            session.api_key = key;
        }
        if let Some(url) = get(env::SESSION_URL) {
            session.session_url = url;
        }
        if let Some(url) = get(env::WEBRTC_URL) {
            session.webrtc_url = url;
        }
        if let Some(model) = get(env::MODEL) {
            session.model = model;
        }
        if let Some(voice) = get(env::VOICE) {
            session.voice = voice;
        }
        if let Some(instructions) = get(env::INSTRUCTIONS) {
            session.instructions = instructions;
        }
        if let Some(temperature) = get(env::TEMPERATURE) {
            session.temperature = temperature.trim().parse().map_err(|_| {
                RealtalkError::Configuration(format!(
                    "{} must be a number, got '{temperature}'",
                    env::TEMPERATURE
                ))
            })?;
        }
        if let Some(max_tokens) = get(env::MAX_TOKENS) {
            session.max_response_output_tokens = max_tokens.parse::<MaxOutputTokens>()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RealtalkError> {
        self.session.validate()?;
        self.peer.validate()?;
        self.timer.validate()
    }
}
