//! WebRTC backend for the transport seams, built on `webrtc-rs`.
//!
//! The local track is a [`TrackLocalStaticSample`] fed with Opus frames
//! through [`WebRtcAudioTrack::write_opus_frame`]. [`SampleTrackSource`]
//! leaves the writing to the application; the `device` feature adds a
//! sound-card capture that does it. Remote audio arrives as RTP payloads
//! on a [`RemoteAudioStream`].

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::transport::{
    ChannelState, ConnectionState, DataChannel, IceServer, LocalAudioTrack, MediaDevices,
    PeerConnector, PeerTransport, RemoteAudioStream, TransportEvent, TransportEventSender,
};
use crate::audio::types::AudioConstraints;
use crate::error::RealtalkError;

/// Duration of one Opus frame written to the local track.
pub const OPUS_FRAME_DURATION: Duration = Duration::from_millis(20);

fn transport_error(context: &'static str) -> impl FnOnce(webrtc::Error) -> RealtalkError {
    move |error| RealtalkError::Transport(format!("{context}: {error}"))
}

/// Local audio track fed with Opus frames.
pub struct WebRtcAudioTrack {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
}

impl WebRtcAudioTrack {
    fn new(id: String) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            id.clone(),
            "realtalk-microphone".to_string(),
        ));
        Self {
            id,
            track,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Send one encoded Opus frame. Frames written after `stop` are dropped.
    pub async fn write_opus_frame(&self, frame: Bytes) -> Result<(), RealtalkError> {
        if self.is_stopped() {
            return Ok(());
        }
        self.track
            .write_sample(&Sample {
                data: frame,
                duration: OPUS_FRAME_DURATION,
                ..Default::default()
            })
            .await
            .map_err(transport_error("Failed to write audio sample"))
    }
}

impl LocalAudioTrack for WebRtcAudioTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::Relaxed) {
            tracing::debug!(track_id = %self.id, "Microphone track stopped");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hands out one sample-fed track per session and remembers the latest.
///
/// Nothing is captured here: whoever holds [`SampleTrackSource::current_track`]
/// writes the encoded frames.
#[derive(Default)]
pub struct SampleTrackSource {
    current: Mutex<Option<Arc<WebRtcAudioTrack>>>,
    sequence: Mutex<u64>,
}

impl SampleTrackSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the next track and make it current.
    pub fn create_track(&self) -> Arc<WebRtcAudioTrack> {
        let id = {
            let mut sequence = self.sequence.lock();
            *sequence += 1;
            format!("microphone-{}", *sequence)
        };
        let track = Arc::new(WebRtcAudioTrack::new(id));
        *self.current.lock() = Some(track.clone());
        track
    }

    /// Track of the current session, if it has not been stopped.
    pub fn current_track(&self) -> Option<Arc<WebRtcAudioTrack>> {
        self.current
            .lock()
            .as_ref()
            .filter(|track| !track.is_stopped())
            .cloned()
    }
}

#[async_trait]
impl MediaDevices for SampleTrackSource {
    async fn acquire_microphone(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn LocalAudioTrack>, RealtalkError> {
        let track = self.create_track();
        tracing::debug!(track_id = %track.id, ?constraints, "Created sample-fed track");
        Ok(track)
    }
}

/// Creates `webrtc-rs` peer connections.
#[derive(Debug, Default, Clone)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, RealtalkError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(transport_error("Failed to register codecs"))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(transport_error("Failed to register interceptors"))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(transport_error("Failed to create peer connection"))?,
        );

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if let Some(state) = connection_state(state) {
                let _ = state_events.send(TransportEvent::StateChanged(state));
            }
            Box::pin(async {})
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        return;
                    }
                    forward_remote_audio(track, events);
                })
            },
        ));

        tracing::debug!(servers = ice_servers.len(), "Peer connection created");
        Ok(Arc::new(WebRtcPeer { pc, events }))
    }
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn forward_remote_audio(track: Arc<TrackRemote>, events: TransportEventSender) {
    let (packets_tx, packets_rx) = mpsc::unbounded_channel();
    let stream = RemoteAudioStream {
        track_id: track.id(),
        packets: packets_rx,
    };
    if events.send(TransportEvent::RemoteTrack(stream)).is_err() {
        return;
    }
    tokio::spawn(async move {
        while let Ok((packet, _)) = track.read_rtp().await {
            if packets_tx.send(packet.payload.to_vec()).is_err() {
                break;
            }
        }
        tracing::debug!(track_id = %track.id(), "Remote audio track ended");
    });
}

/// One `webrtc-rs` peer connection.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: TransportEventSender,
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn add_local_track(&self, track: Arc<dyn LocalAudioTrack>) -> Result<(), RealtalkError> {
        let local = track
            .as_any()
            .downcast_ref::<WebRtcAudioTrack>()
            .ok_or_else(|| {
                RealtalkError::Transport(format!(
                    "Track '{}' is not a WebRTC sample track",
                    track.id()
                ))
            })?;
        let sample_track: Arc<dyn TrackLocal + Send + Sync> = local.track.clone();
        let sender = self
            .pc
            .add_track(sample_track)
            .await
            .map_err(transport_error("Failed to add audio track"))?;

        // RTCP must be drained for interceptors to run.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        tracing::debug!(track_id = %track.id(), "Microphone audio track added");
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, RealtalkError> {
        let channel = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(transport_error("Failed to create data channel"))?;

        let events = self.events.clone();
        channel.on_open(Box::new(move || {
            let _ = events.send(TransportEvent::ChannelOpen);
            Box::pin(async {})
        }));

        let events = self.events.clone();
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            let text = String::from_utf8_lossy(&message.data).into_owned();
            let _ = events.send(TransportEvent::ChannelMessage(text));
            Box::pin(async {})
        }));

        let events = self.events.clone();
        channel.on_close(Box::new(move || {
            let _ = events.send(TransportEvent::ChannelClosed);
            Box::pin(async {})
        }));

        let events = self.events.clone();
        channel.on_error(Box::new(move |error: webrtc::Error| {
            let _ = events.send(TransportEvent::ChannelError(error.to_string()));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcDataChannel {
            label: label.to_string(),
            inner: channel,
        }))
    }

    async fn create_offer(&self) -> Result<String, RealtalkError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(transport_error("Failed to create offer"))?;

        // The media endpoint does not accept trickled candidates.
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(transport_error("Failed to set local description"))?;
        let _ = gathered.recv().await;

        self.pc
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| RealtalkError::Transport("Missing local description".into()))
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), RealtalkError> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(transport_error("Invalid answer SDP"))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(transport_error("Failed to set remote description"))
    }

    async fn close(&self) -> Result<(), RealtalkError> {
        self.pc
            .close()
            .await
            .map_err(transport_error("Failed to close peer connection"))
    }
}

/// Control channel backed by an `RTCDataChannel`.
pub struct WebRtcDataChannel {
    label: String,
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        match self.inner.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing => ChannelState::Closing,
            RTCDataChannelState::Closed => ChannelState::Closed,
            RTCDataChannelState::Connecting | RTCDataChannelState::Unspecified => {
                ChannelState::Connecting
            }
        }
    }

    async fn send_text(&self, text: String) -> Result<(), RealtalkError> {
        self.inner
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(transport_error("Failed to send on data channel"))
    }

    async fn close(&self) -> Result<(), RealtalkError> {
        self.inner
            .close()
            .await
            .map_err(transport_error("Failed to close data channel"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_peer_state_is_not_reported() {
        assert_eq!(connection_state(RTCPeerConnectionState::Unspecified), None);
        assert_eq!(
            connection_state(RTCPeerConnectionState::Failed),
            Some(ConnectionState::Failed)
        );
    }

    #[tokio::test]
    async fn source_hands_out_fresh_tracks() {
        let microphone = SampleTrackSource::new();
        let first = microphone
            .acquire_microphone(&AudioConstraints::default())
            .await
            .expect("track");
        first.stop();
        assert!(microphone.current_track().is_none());

        let second = microphone
            .acquire_microphone(&AudioConstraints::default())
            .await
            .expect("track");
        assert_ne!(first.id(), second.id());
        let current = microphone.current_track().expect("current track");
        assert_eq!(current.id(), second.id());
    }
}
