//! Convenience re-exports for common use.

pub use crate::audio::realtime::{
    ClientEvent, DispatcherOptions, LogPresentation, MediaDevices, PeerConnector, PeerSettings,
    Presentation, SessionConfig, SessionController, StartOutcome, TimerSettings, TimerSnapshot,
    Transcript, TurnDetection,
};
pub use crate::config::RealtalkConfig;
pub use crate::error::{RealtalkError, Result};
