//! Session lifecycle controller.
//!
//! Owns at most one session at a time and sequences setup:
//! credential exchange, microphone, peer connection, control channel and
//! offer/answer. Transport callbacks arrive as [`TransportEvent`]s on a
//! per-session channel and are consumed by a pump task.
//!
//! Every stop and every start bumps an epoch counter. Each continuation in
//! [`SessionController::start_session`] re-checks the epoch after its await
//! and, if the session was stopped meanwhile, releases what it opened and
//! returns [`StartOutcome::Cancelled`].

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::channel::{ClientEvent, ControlChannel};
use super::config::SessionConfig;
use super::credential::CredentialExchange;
use super::dispatch::{DispatchOutcome, DispatcherOptions, EventDispatcher, Handler};
use super::peer::{ActiveTransport, PeerConnectionManager, PeerSettings};
use super::presentation::{Presentation, Role, Transcript};
use super::timer::{SessionTimer, TimerSettings, TimerSnapshot};
use super::transport::{
    AudioSink, ConnectionState, DiscardSink, MediaDevices, PeerConnector, TransportEvent,
    TransportEventReceiver,
};
use crate::error::RealtalkError;

/// System message added to the transcript once the peer is connected.
pub const SESSION_STARTED_MESSAGE: &str =
    "Session started. You can now speak and see the conversation here.";

/// Result of [`SessionController::start_session`].
#[derive(Debug)]
pub enum StartOutcome {
    Started { session_id: String },
    /// A session was already starting or active.
    Rejected,
    /// The session was stopped before setup finished.
    Cancelled,
    /// Setup failed; `on_session_error` has been called.
    Failed(RealtalkError),
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Starting,
    Active,
}

/// Observable description of the current session. Never carries credentials.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub phase: SessionPhase,
    pub connection_state: ConnectionState,
    pub config: Arc<SessionConfig>,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionSlot {
    epoch: u64,
    phase: Option<SessionPhase>,
    session_id: Option<String>,
    config: Option<Arc<SessionConfig>>,
    connection_state: Option<ConnectionState>,
    started_at: Option<DateTime<Utc>>,
    transport: Option<ActiveTransport>,
    pump: Option<CancellationToken>,
    audio_bound: bool,
}

/// Resources detached from the slot, released outside the lock.
struct Released {
    transport: Option<ActiveTransport>,
    pump: Option<CancellationToken>,
}

impl SessionSlot {
    fn phase(&self) -> SessionPhase {
        self.phase.unwrap_or(SessionPhase::Idle)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.phase() != SessionPhase::Idle
    }

    /// Bump the epoch and clear every session field.
    fn reset(&mut self) -> Released {
        self.epoch += 1;
        self.phase = None;
        self.session_id = None;
        self.config = None;
        self.connection_state = None;
        self.started_at = None;
        self.audio_bound = false;
        Released {
            transport: self.transport.take(),
            pump: self.pump.take(),
        }
    }
}

struct ControllerInner {
    presentation: Arc<dyn Presentation>,
    credentials: CredentialExchange,
    peers: PeerConnectionManager,
    sink: Arc<dyn AudioSink>,
    dispatcher: EventDispatcher,
    transcript: Transcript,
    timer: SessionTimer,
    slot: Mutex<SessionSlot>,
}

/// Drives one realtime voice session at a time.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn builder(
        presentation: Arc<dyn Presentation>,
        media: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
    ) -> SessionControllerBuilder {
        SessionControllerBuilder {
            presentation,
            media,
            connector,
            sink: Arc::new(DiscardSink),
            http: None,
            peer_settings: PeerSettings::default(),
            timer_settings: TimerSettings::default(),
            dispatcher_options: DispatcherOptions::default(),
            handlers: Vec::new(),
        }
    }

    fn from_inner(inner: Arc<ControllerInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<ControllerInner> {
        Arc::downgrade(&self.inner)
    }

    /// Start a session with `config`.
    ///
    /// Never returns an error: failures are reported through
    /// `on_session_error` and [`StartOutcome::Failed`].
    pub async fn start_session(&self, config: SessionConfig) -> StartOutcome {
        let config = Arc::new(config);
        let epoch = {
            let mut slot = self.inner.slot.lock();
            if slot.phase() != SessionPhase::Idle {
                tracing::warn!(phase = %slot.phase(), "Session already in progress; start ignored");
                return StartOutcome::Rejected;
            }
            slot.epoch += 1;
            slot.phase = Some(SessionPhase::Starting);
            slot.config = Some(config.clone());
            slot.connection_state = Some(ConnectionState::New);
            slot.started_at = Some(Utc::now());
            slot.epoch
        };
        tracing::info!(epoch, model = %config.model, voice = %config.voice, "Starting session");

        let validated = config
            .validate()
            .and_then(|()| self.inner.peers.settings().validate())
            .and_then(|()| self.inner.timer.settings().validate());
        if let Err(error) = validated {
            return self.fail(epoch, error).await;
        }

        let weak = self.downgrade();
        self.inner.timer.start(move || async move {
            if let Some(inner) = weak.upgrade() {
                SessionController::from_inner(inner).stop_epoch(epoch).await;
            }
        });

        match self.run_setup(epoch, &config).await {
            Ok(Some(session_id)) => {
                tracing::info!(epoch, %session_id, "Session setup complete");
                StartOutcome::Started { session_id }
            }
            Ok(None) => {
                tracing::info!(epoch, "Session stopped during setup");
                StartOutcome::Cancelled
            }
            Err(error) => self.fail(epoch, error).await,
        }
    }

    /// Run setup; `Ok(None)` means the epoch moved on and the caller should
    /// report cancellation.
    async fn run_setup(
        &self,
        epoch: u64,
        config: &SessionConfig,
    ) -> Result<Option<String>, RealtalkError> {
        let credential = self.inner.credentials.exchange(config).await?;
        {
            let mut slot = self.inner.slot.lock();
            if !slot.is_current(epoch) {
                return Ok(None);
            }
            slot.session_id = Some(credential.session_id.clone());
        }

        let track = self.inner.peers.acquire_microphone().await?;
        if !self.inner.slot.lock().is_current(epoch) {
            track.stop();
            return Ok(None);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.inner.peers.open_peer(track, events_tx).await?;
        let pump = CancellationToken::new();
        let installed = {
            let mut slot = self.inner.slot.lock();
            let current = slot.is_current(epoch);
            if current {
                slot.transport = Some(transport.clone());
                slot.pump = Some(pump.clone());
            }
            current
        };
        if !installed {
            transport.close().await;
            return Ok(None);
        }
        self.spawn_pump(epoch, events_rx, pump);

        self.inner
            .peers
            .negotiate(&transport, config, &credential)
            .await?;

        let mut slot = self.inner.slot.lock();
        if !slot.is_current(epoch) {
            return Ok(None);
        }
        slot.phase = Some(SessionPhase::Active);
        drop(slot);
        Ok(Some(credential.session_id))
    }

    /// Abort a start attempt, or return `Cancelled` if it was already stopped.
    async fn fail(&self, epoch: u64, error: RealtalkError) -> StartOutcome {
        let released = {
            let mut slot = self.inner.slot.lock();
            if !slot.is_current(epoch) {
                tracing::debug!(epoch, %error, "Setup error after stop ignored");
                return StartOutcome::Cancelled;
            }
            slot.reset()
        };
        self.release(released).await;

        tracing::error!(
            epoch,
            %error,
            category = ?error.category(),
            suggestion = ?error.recovery_suggestion(),
            "Error starting session"
        );
        self.inner.presentation.on_session_error(&error.to_string());
        StartOutcome::Failed(error)
    }

    /// Stop the current session. A no-op when idle.
    pub async fn stop_session(&self) {
        let released = {
            let mut slot = self.inner.slot.lock();
            if slot.phase() == SessionPhase::Idle {
                return;
            }
            slot.reset()
        };
        self.finish_stop(released).await;
    }

    /// Stop only if `epoch` is still the current session.
    async fn stop_epoch(&self, epoch: u64) {
        let released = {
            let mut slot = self.inner.slot.lock();
            if !slot.is_current(epoch) {
                return;
            }
            slot.reset()
        };
        self.finish_stop(released).await;
    }

    async fn finish_stop(&self, released: Released) {
        tracing::info!("Stopping session...");
        self.release(released).await;
        self.inner.transcript.clear();
        tracing::info!("Session stopped");
        self.inner.presentation.on_session_disconnected();
    }

    async fn release(&self, released: Released) {
        if let Some(pump) = released.pump {
            pump.cancel();
        }
        if let Some(transport) = released.transport {
            transport.close().await;
        }
        self.inner.sink.detach();
        self.inner.dispatcher.reset();
        self.inner.timer.stop();
    }

    /// Add the configured extension to the running countdown.
    pub fn extend_session(&self) -> Option<TimerSnapshot> {
        if self.inner.slot.lock().phase() == SessionPhase::Idle {
            return None;
        }
        self.inner.timer.extend()
    }

    /// Best-effort send over the control channel.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), RealtalkError> {
        let channel = self.control_channel().ok_or_else(|| {
            RealtalkError::ChannelNotReady("no active session".into())
        })?;
        channel.send_event(event).await
    }

    fn control_channel(&self) -> Option<ControlChannel> {
        self.inner
            .slot
            .lock()
            .transport
            .as_ref()
            .map(|transport| transport.channel.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.slot.lock().phase() != SessionPhase::Idle
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.slot.lock().phase()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        let slot = self.inner.slot.lock();
        Some(SessionInfo {
            session_id: slot.session_id.clone(),
            phase: slot.phase?,
            connection_state: slot.connection_state.unwrap_or(ConnectionState::New),
            config: slot.config.clone()?,
            started_at: slot.started_at?,
        })
    }

    pub fn transcript(&self) -> &Transcript {
        &self.inner.transcript
    }

    /// Subscribe to countdown snapshots.
    pub fn timer(&self) -> watch::Receiver<TimerSnapshot> {
        self.inner.timer.subscribe()
    }

    pub fn timer_snapshot(&self) -> TimerSnapshot {
        self.inner.timer.snapshot()
    }

    fn spawn_pump(&self, epoch: u64, mut events: TransportEventReceiver, cancel: CancellationToken) {
        let weak = self.downgrade();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let Some(inner) = weak.upgrade() else { break };
                SessionController::from_inner(inner)
                    .handle_transport_event(epoch, event)
                    .await;
            }
            tracing::debug!(epoch, "Transport event pump finished");
        });
    }

    async fn handle_transport_event(&self, epoch: u64, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => self.on_connection_state(epoch, state).await,
            TransportEvent::ChannelOpen => {
                tracing::info!(epoch, "Data channel opened");
            }
            TransportEvent::ChannelMessage(text) => {
                if !self.inner.slot.lock().is_current(epoch) {
                    return;
                }
                if let DispatchOutcome::Discarded(reason) = self.inner.dispatcher.dispatch(&text) {
                    tracing::debug!(epoch, ?reason, "Server event discarded");
                }
            }
            TransportEvent::ChannelClosed => {
                tracing::info!(epoch, "Data channel closed");
            }
            TransportEvent::ChannelError(error) => {
                tracing::warn!(epoch, %error, "Data channel error");
            }
            TransportEvent::RemoteTrack(stream) => {
                let bind = {
                    let mut slot = self.inner.slot.lock();
                    let bind = slot.is_current(epoch) && !slot.audio_bound;
                    if bind {
                        slot.audio_bound = true;
                    }
                    bind
                };
                if bind {
                    tracing::info!(epoch, track_id = %stream.track_id, "Remote audio track received");
                    self.inner.sink.attach(stream);
                } else {
                    tracing::debug!(epoch, track_id = %stream.track_id, "Extra remote track ignored");
                }
            }
        }
    }

    async fn on_connection_state(&self, epoch: u64, state: ConnectionState) {
        {
            let mut slot = self.inner.slot.lock();
            if !slot.is_current(epoch) {
                return;
            }
            slot.connection_state = Some(state);
        }
        tracing::info!(epoch, %state, "Connection state");

        if state == ConnectionState::Connected {
            self.inner.presentation.on_session_connected();
            self.inner.presentation.add_system_message(SESSION_STARTED_MESSAGE);
            self.inner.transcript.push(Role::System, SESSION_STARTED_MESSAGE);
        } else if state.is_terminal() {
            self.stop_epoch(epoch).await;
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("phase", &self.phase())
            .field("timer", &self.inner.timer)
            .finish()
    }
}

/// Builder for [`SessionController`].
pub struct SessionControllerBuilder {
    presentation: Arc<dyn Presentation>,
    media: Arc<dyn MediaDevices>,
    connector: Arc<dyn PeerConnector>,
    sink: Arc<dyn AudioSink>,
    http: Option<reqwest::Client>,
    peer_settings: PeerSettings,
    timer_settings: TimerSettings,
    dispatcher_options: DispatcherOptions,
    handlers: Vec<(String, Handler)>,
}

impl SessionControllerBuilder {
    /// Playback target for remote audio. Defaults to [`DiscardSink`].
    pub fn audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = sink;
        self
    }

    /// HTTP client for both the credential and SDP requests.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn peer_settings(mut self, settings: PeerSettings) -> Self {
        self.peer_settings = settings;
        self
    }

    pub fn timer_settings(mut self, settings: TimerSettings) -> Self {
        self.timer_settings = settings;
        self
    }

    pub fn dispatcher_options(mut self, options: DispatcherOptions) -> Self {
        self.dispatcher_options = options;
        self
    }

    /// Handle an additional server event type.
    pub fn handler(mut self, tag: impl Into<String>, handler: Handler) -> Self {
        self.handlers.push((tag.into(), handler));
        self
    }

    pub fn build(self) -> SessionController {
        let transcript = Transcript::new();
        let mut dispatcher = EventDispatcher::new(
            self.presentation.clone(),
            transcript.clone(),
            self.dispatcher_options,
        );
        for (tag, handler) in self.handlers {
            dispatcher.register(tag, handler);
        }

        let mut peers = PeerConnectionManager::new(self.media, self.connector, self.peer_settings);
        let credentials = match self.http {
            Some(http) => {
                peers = peers.with_client(http.clone());
                CredentialExchange::with_client(http)
            }
            None => CredentialExchange::new(),
        };

        SessionController {
            inner: Arc::new(ControllerInner {
                presentation: self.presentation,
                credentials,
                peers,
                sink: self.sink,
                dispatcher,
                transcript,
                timer: SessionTimer::new(self.timer_settings),
                slot: Mutex::new(SessionSlot::default()),
            }),
        }
    }
}
