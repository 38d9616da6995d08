//! Realtime voice session over WebRTC.
//!
//! Credentials come from the control plane ([`credential`]), audio and the
//! control channel ride one peer connection ([`peer`], [`channel`]) and
//! server events are routed by [`dispatch`]. [`session::SessionController`]
//! ties it together under a [`timer::SessionTimer`].

pub mod channel;
pub mod config;
pub mod credential;
pub mod dispatch;
pub mod events;
pub mod peer;
pub mod presentation;
pub mod session;
pub mod timer;
pub mod transport;

#[cfg(feature = "device")]
pub mod device;
#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use channel::{ClientEvent, ControlChannel, CONTROL_CHANNEL_LABEL};
pub use config::{
    Eagerness, InputTranscription, MaxOutputTokens, Modality, NoiseReduction, SessionConfig,
    TurnDetection,
};
pub use credential::{build_session_payload, CredentialExchange, SessionCredential};
pub use dispatch::{
    handler_fn, DiscardReason, DispatchContext, DispatchOutcome, DispatcherOptions,
    EventDispatcher, Handler, MalformedEvent,
};
pub use events::ServerEventKind;
pub use peer::{ActiveTransport, PeerConnectionManager, PeerSettings};
pub use presentation::{LogPresentation, Presentation, Role, Transcript, TranscriptEntry};
pub use session::{SessionController, SessionInfo, SessionPhase, StartOutcome};
pub use timer::{SessionTimer, TimerSettings, TimerSnapshot};
pub use transport::{
    AudioSink, ChannelState, ConnectionState, DataChannel, DiscardSink, IceServer,
    LocalAudioTrack, MediaDevices, PeerConnector, PeerTransport, RemoteAudioStream,
    TransportEvent, TransportEventSender,
};
