//! Shared test helpers: in-memory transport and a recording presentation.
#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use realtalk::audio::realtime::{
    AudioSink, ChannelState, DataChannel, IceServer, LocalAudioTrack, MediaDevices,
    PeerConnector, PeerTransport, Presentation, RemoteAudioStream, TransportEvent,
    TransportEventSender,
};
use realtalk::audio::AudioConstraints;
use realtalk::error::RealtalkError;

pub const FAKE_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=fake-offer\r\n";

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// --- presentation ---

#[derive(Default)]
pub struct RecordingPresentation {
    calls: Mutex<Vec<String>>,
}

impl RecordingPresentation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| c.strip_prefix("error:").map(str::to_string))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl Presentation for RecordingPresentation {
    fn on_session_connected(&self) {
        self.record("connected".into());
    }

    fn on_session_disconnected(&self) {
        self.record("disconnected".into());
    }

    fn on_session_error(&self, message: &str) {
        self.record(format!("error:{message}"));
    }

    fn show_typing_indicator(&self) {
        self.record("typing".into());
    }

    fn remove_typing_indicator(&self) {
        self.record("typing-off".into());
    }

    fn add_user_transcription(&self, text: &str) {
        self.record(format!("user:{text}"));
    }

    fn add_assistant_transcription(&self, text: &str) {
        self.record(format!("assistant:{text}"));
    }

    fn add_system_message(&self, text: &str) {
        self.record(format!("system:{text}"));
    }

    fn update_assistant_transcription(&self, partial: &str) {
        self.record(format!("partial:{partial}"));
    }
}

// --- media ---

pub struct FakeTrack {
    id: String,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalAudioTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Microphone that can be denied or held until released.
#[derive(Default)]
pub struct FakeMedia {
    deny: Option<String>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
    constraints: Mutex<Vec<AudioConstraints>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denied(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            deny: Some(reason.to_string()),
            ..Self::default()
        })
    }

    /// Microphone that signals `entered` and then waits for `release`.
    pub fn gated() -> (Arc<Self>, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let media = Arc::new(Self {
            gate: Some((entered.clone(), release.clone())),
            ..Self::default()
        });
        (media, entered, release)
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().clone()
    }

    pub fn constraints(&self) -> Vec<AudioConstraints> {
        self.constraints.lock().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire_microphone(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn LocalAudioTrack>, RealtalkError> {
        self.constraints.lock().push(*constraints);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(reason) = &self.deny {
            return Err(RealtalkError::MediaAcquisition(reason.clone()));
        }
        let track = Arc::new(FakeTrack {
            id: format!("mic-{}", self.tracks.lock().len() + 1),
            stopped: AtomicBool::new(false),
        });
        self.tracks.lock().push(track.clone());
        Ok(track)
    }
}

// --- peer ---

pub struct FakeChannel {
    label: String,
    state: Mutex<ChannelState>,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DataChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        *self.state.lock()
    }

    async fn send_text(&self, text: String) -> Result<(), RealtalkError> {
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) -> Result<(), RealtalkError> {
        *self.state.lock() = ChannelState::Closed;
        Ok(())
    }
}

pub struct FakePeer {
    events: TransportEventSender,
    ice_servers: Vec<IceServer>,
    tracks: Mutex<Vec<String>>,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    answer: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl FakePeer {
    /// Report a transport event as the backend would.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Open the control channel and report it.
    pub fn open_channel(&self) {
        if let Some(channel) = self.channel() {
            *channel.state.lock() = ChannelState::Open;
        }
        self.emit(TransportEvent::ChannelOpen);
    }

    pub fn server_message(&self, payload: serde_json::Value) {
        self.emit(TransportEvent::ChannelMessage(payload.to_string()));
    }

    /// Deliver a remote audio track; returns the sender side of its packets.
    pub fn remote_track(&self, track_id: &str) -> mpsc::UnboundedSender<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.emit(TransportEvent::RemoteTrack(RemoteAudioStream {
            track_id: track_id.to_string(),
            packets: rx,
        }));
        tx
    }

    pub fn channel(&self) -> Option<Arc<FakeChannel>> {
        self.channel.lock().clone()
    }

    pub fn tracks(&self) -> Vec<String> {
        self.tracks.lock().clone()
    }

    pub fn answer(&self) -> Option<String> {
        self.answer.lock().clone()
    }

    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.ice_servers.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for FakePeer {
    async fn add_local_track(&self, track: Arc<dyn LocalAudioTrack>) -> Result<(), RealtalkError> {
        self.tracks.lock().push(track.id().to_string());
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, RealtalkError> {
        let channel = Arc::new(FakeChannel {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
        });
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<String, RealtalkError> {
        Ok(FAKE_OFFER.to_string())
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), RealtalkError> {
        *self.answer.lock() = Some(sdp);
        Ok(())
    }

    async fn close(&self) -> Result<(), RealtalkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        self.peers
            .lock()
            .last()
            .cloned()
            .expect("a peer should have been created")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, RealtalkError> {
        let peer = Arc::new(FakePeer {
            events,
            ice_servers: ice_servers.to_vec(),
            tracks: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            answer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

// --- audio sink ---

#[derive(Default)]
pub struct FakeSink {
    attached: Mutex<Vec<String>>,
    detached: AtomicUsize,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().clone()
    }

    pub fn detach_count(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }
}

impl AudioSink for FakeSink {
    fn attach(&self, stream: RemoteAudioStream) {
        self.attached.lock().push(stream.track_id);
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}
