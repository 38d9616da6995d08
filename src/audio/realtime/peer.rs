//! Peer connection setup and SDP offer/answer negotiation.
//!
//! Setup runs as three awaitable steps so the session controller can check
//! for cancellation between them:
//!
//! 1. [`PeerConnectionManager::acquire_microphone`]
//! 2. [`PeerConnectionManager::open_peer`] creates the peer, attaches the
//!    microphone and opens the control channel
//! 3. [`PeerConnectionManager::negotiate`] posts the offer and applies the
//!    answer

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::channel::{ControlChannel, CONTROL_CHANNEL_LABEL};
use super::config::SessionConfig;
use super::credential::SessionCredential;
use super::transport::{
    IceServer, LocalAudioTrack, MediaDevices, PeerConnector, PeerTransport, TransportEventSender,
};
use crate::audio::types::AudioConstraints;
use crate::error::RealtalkError;
use crate::provider::http::{bearer_headers, error_body, shared_client, with_query_param};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Peer connection tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSettings {
    pub ice_servers: Vec<IceServer>,
    pub channel_label: String,
    pub audio: AudioConstraints,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            channel_label: CONTROL_CHANNEL_LABEL.to_string(),
            audio: AudioConstraints::default(),
        }
    }
}

impl PeerSettings {
    pub fn validate(&self) -> Result<(), RealtalkError> {
        if self.ice_servers.iter().all(|server| server.urls.is_empty()) {
            return Err(RealtalkError::Configuration(
                "At least one ICE server URL is required".into(),
            ));
        }
        if self.channel_label.trim().is_empty() {
            return Err(RealtalkError::Configuration(
                "Control channel label must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Everything a connected session owns on the transport side.
#[derive(Clone)]
pub struct ActiveTransport {
    pub peer: Arc<dyn PeerTransport>,
    pub channel: ControlChannel,
    pub track: Arc<dyn LocalAudioTrack>,
}

impl ActiveTransport {
    /// Close the channel, then the peer, then release the microphone.
    ///
    /// Close failures are logged; teardown always runs to completion.
    pub async fn close(&self) {
        self.channel.close().await;
        if let Err(error) = self.peer.close().await {
            tracing::debug!(%error, "Peer connection close failed");
        }
        self.track.stop();
    }
}

impl std::fmt::Debug for ActiveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveTransport")
            .field("channel", &self.channel)
            .field("track", &self.track.id())
            .finish()
    }
}

/// Builds the media plane for one session.
#[derive(Clone)]
pub struct PeerConnectionManager {
    media: Arc<dyn MediaDevices>,
    connector: Arc<dyn PeerConnector>,
    http: reqwest::Client,
    settings: PeerSettings,
}

impl PeerConnectionManager {
    pub fn new(
        media: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
        settings: PeerSettings,
    ) -> Self {
        Self {
            media,
            connector,
            http: shared_client().clone(),
            settings,
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn settings(&self) -> &PeerSettings {
        &self.settings
    }

    /// Request the microphone with echo cancellation, noise suppression and
    /// gain control.
    pub async fn acquire_microphone(&self) -> Result<Arc<dyn LocalAudioTrack>, RealtalkError> {
        let track = self
            .media
            .acquire_microphone(&self.settings.audio)
            .await
            .map_err(|error| match error {
                RealtalkError::MediaAcquisition(_) => error,
                other => RealtalkError::MediaAcquisition(other.to_string()),
            })?;
        tracing::info!(track_id = %track.id(), "Microphone access granted");
        Ok(track)
    }

    /// Create the peer connection, attach `track` and open the control channel.
    ///
    /// On failure the peer is closed and the track stopped before returning.
    pub async fn open_peer(
        &self,
        track: Arc<dyn LocalAudioTrack>,
        events: TransportEventSender,
    ) -> Result<ActiveTransport, RealtalkError> {
        let peer = match self
            .connector
            .create_peer(&self.settings.ice_servers, events)
            .await
        {
            Ok(peer) => peer,
            Err(error) => {
                track.stop();
                return Err(error);
            }
        };

        let attached = async {
            peer.add_local_track(track.clone()).await?;
            peer.create_data_channel(&self.settings.channel_label).await
        }
        .await;

        match attached {
            Ok(channel) => {
                tracing::debug!(label = %channel.label(), "Control channel created");
                Ok(ActiveTransport {
                    peer,
                    channel: ControlChannel::new(channel),
                    track,
                })
            }
            Err(error) => {
                if let Err(close_error) = peer.close().await {
                    tracing::debug!(error = %close_error, "Peer connection close failed");
                }
                track.stop();
                Err(error)
            }
        }
    }

    /// Create the offer, exchange it for an answer and apply the answer.
    ///
    /// The caller owns `transport` and closes it if this fails.
    pub async fn negotiate(
        &self,
        transport: &ActiveTransport,
        config: &SessionConfig,
        credential: &SessionCredential,
    ) -> Result<(), RealtalkError> {
        let offer = transport.peer.create_offer().await?;
        tracing::debug!(bytes = offer.len(), "Local description set");

        let answer = self.exchange_sdp(config, credential, offer).await?;
        transport.peer.apply_answer(answer).await?;
        tracing::info!("Remote description set");
        Ok(())
    }

    /// POST the offer SDP to the media endpoint and return the answer SDP.
    pub async fn exchange_sdp(
        &self,
        config: &SessionConfig,
        credential: &SessionCredential,
        offer: String,
    ) -> Result<String, RealtalkError> {
        let url = with_query_param(&config.webrtc_url, "model", &config.model)?;
        let headers = bearer_headers(&credential.ephemeral_key, "application/sdp")?;
        tracing::debug!(%url, "Sending SDP offer");

        let response = self.http.post(url).headers(headers).body(offer).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(RealtalkError::Negotiation {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.text().await?)
    }
}

impl std::fmt::Debug for PeerConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionManager")
            .field("settings", &self.settings)
            .finish()
    }
}
