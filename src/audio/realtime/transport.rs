//! Transport seams for the realtime session.
//!
//! The session core never talks to a WebRTC stack directly. Backends
//! implement these traits and report everything that happens on the wire
//! as [`TransportEvent`]s on the per-session channel handed to
//! [`PeerConnector::create_peer`].

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::mpsc;

use crate::audio::types::AudioConstraints;
use crate::error::RealtalkError;

/// Peer connection state as reported by the transport.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the session is torn down.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Ready state of the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Inbound remote audio, bound to the playback sink.
#[derive(Debug)]
pub struct RemoteAudioStream {
    pub track_id: String,
    /// Encoded audio payloads in arrival order.
    pub packets: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Everything a transport reports asynchronously.
#[derive(Debug)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    ChannelOpen,
    ChannelMessage(String),
    ChannelClosed,
    ChannelError(String),
    RemoteTrack(RemoteAudioStream),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// STUN/TURN server entry for the peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// A captured local audio track.
pub trait LocalAudioTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Release the capture device.
    fn stop(&self);

    /// Lets a backend recover its concrete track type.
    fn as_any(&self) -> &dyn Any;
}

/// Microphone access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire_microphone(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn LocalAudioTrack>, RealtalkError>;
}

/// The named control channel carried by the peer connection.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ChannelState;

    async fn send_text(&self, text: String) -> Result<(), RealtalkError>;

    async fn close(&self) -> Result<(), RealtalkError>;
}

/// One peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_local_track(&self, track: Arc<dyn LocalAudioTrack>) -> Result<(), RealtalkError>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, RealtalkError>;

    /// Create an offer, apply it as the local description and return its SDP.
    async fn create_offer(&self) -> Result<String, RealtalkError>;

    async fn apply_answer(&self, sdp: String) -> Result<(), RealtalkError>;

    async fn close(&self) -> Result<(), RealtalkError>;
}

/// Factory for peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a peer connection that reports on `events`.
    async fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, RealtalkError>;
}

/// Playback target for the remote audio stream.
pub trait AudioSink: Send + Sync {
    fn attach(&self, stream: RemoteAudioStream);

    fn detach(&self);
}

/// Sink that drops remote audio.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl AudioSink for DiscardSink {
    fn attach(&self, stream: RemoteAudioStream) {
        tracing::debug!(track_id = %stream.track_id, "Discarding remote audio");
    }

    fn detach(&self) {}
}
