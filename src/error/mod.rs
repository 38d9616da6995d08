//! Error types for realtalk.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all realtalk operations.
#[derive(Error, Debug)]
pub enum RealtalkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to access microphone: {0}")]
    MediaAcquisition(String),

    #[error("API request failed with status: {status}. {body}")]
    CredentialExchange { status: u16, body: String },

    #[error("SDP request failed with status: {status}")]
    Negotiation { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Control channel not ready: {0}")]
    ChannelNotReady(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),
}

impl RealtalkError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::ConfigFile(_) => ErrorCategory::Configuration,
            Self::MediaAcquisition(_) => ErrorCategory::Media,
            Self::CredentialExchange { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::Negotiation { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Negotiation,
            },
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Transport(_) | Self::ChannelNotReady(_) => ErrorCategory::Transport,
            Self::Network(_) | Self::Io(_) => ErrorCategory::Network,
            Self::Serialization(_) => ErrorCategory::Serialization,
        }
    }

    /// Suggest a recovery action for the presentation layer.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::Media => RecoverySuggestion::GrantMicrophoneAccess,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Network | ErrorCategory::Server | ErrorCategory::Negotiation => {
                RecoverySuggestion::RetryLater
            }
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RealtalkError>;
