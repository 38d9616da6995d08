//! Control-plane credential exchange.
//!
//! One `POST` to the configured session URL turns the long-lived API key
//! into a short-lived, single-use client secret for the media negotiation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::config::{
    InputTranscription, MaxOutputTokens, Modality, NoiseReduction, SessionConfig, TurnDetection,
};
use crate::audio::types::AudioFormat;
use crate::error::RealtalkError;
use crate::provider::http::{bearer_headers, error_body, shared_client};

/// Session-creation body sent to the control plane.
///
/// Optional sections are omitted entirely when disabled, so a disabled
/// turn detector never leaks its tuning into the request.
#[derive(Debug, Serialize)]
pub struct SessionCreateRequest<'a> {
    pub model: &'a str,
    pub voice: &'a str,
    pub instructions: &'a str,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub temperature: f64,
    pub max_response_output_tokens: MaxOutputTokens,
    pub modalities: &'a [Modality],
    #[serde(skip_serializing_if = "turn_detection_disabled")]
    pub turn_detection: &'a TurnDetection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<&'a NoiseReduction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<&'a InputTranscription>,
}

impl<'a> From<&'a SessionConfig> for SessionCreateRequest<'a> {
    fn from(config: &'a SessionConfig) -> Self {
        Self {
            model: &config.model,
            voice: &config.voice,
            instructions: &config.instructions,
            input_audio_format: config.input_audio_format,
            output_audio_format: config.output_audio_format,
            temperature: config.temperature,
            max_response_output_tokens: config.max_response_output_tokens,
            modalities: &config.modalities,
            turn_detection: &config.turn_detection,
            input_audio_noise_reduction: config.input_audio_noise_reduction.as_ref(),
            input_audio_transcription: config.input_audio_transcription.as_ref(),
        }
    }
}

fn turn_detection_disabled(detection: &&TurnDetection) -> bool {
    detection.is_none()
}

/// Build the JSON payload for a session-creation request.
pub fn build_session_payload(config: &SessionConfig) -> Result<serde_json::Value, RealtalkError> {
    serde_json::to_value(SessionCreateRequest::from(config)).map_err(RealtalkError::from)
}

#[derive(Debug, Deserialize)]
struct SessionCreateResponse {
    id: Option<String>,
    client_secret: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: Option<String>,
    expires_at: Option<i64>,
}

/// Result of a successful credential exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub session_id: String,
    pub ephemeral_key: String,
    /// Unix timestamp (seconds) after which the key is rejected, when reported.
    pub expires_at: Option<i64>,
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("session_id", &self.session_id)
            .field("ephemeral_key", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client for the control-plane session endpoint.
#[derive(Debug, Clone)]
pub struct CredentialExchange {
    http: reqwest::Client,
}

impl Default for CredentialExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialExchange {
    pub fn new() -> Self {
        Self {
            http: shared_client().clone(),
        }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Issue the session-creation request. Never retried.
    pub async fn exchange(&self, config: &SessionConfig) -> Result<SessionCredential, RealtalkError> {
        tracing::debug!(url = %config.session_url, model = %config.model, "Fetching ephemeral key");

        let headers = bearer_headers(&config.api_key, "application/json")?;
        let response = self
            .http
            .post(config.session_url.trim())
            .headers(headers)
            .json(&SessionCreateRequest::from(config))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(RealtalkError::CredentialExchange {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let parsed: SessionCreateResponse = serde_json::from_str(&text)?;
        let secret = parsed.client_secret.ok_or_else(|| {
            RealtalkError::Protocol("Session response is missing client_secret".into())
        })?;
        let ephemeral_key = secret
            .value
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                RealtalkError::Protocol("Session response is missing client_secret.value".into())
            })?;
        let session_id = parsed
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RealtalkError::Protocol("Session response is missing id".into()))?;

        tracing::info!(session_id = %session_id, "Ephemeral key received");
        Ok(SessionCredential {
            session_id,
            ephemeral_key,
            expires_at: secret.expires_at,
        })
    }
}
