//! realtalk: realtime voice-assistant client core
//!
//! Exchanges a long-lived API key for a short-lived session credential,
//! negotiates a WebRTC peer connection carrying microphone audio and a JSON
//! control channel, routes server events to a presentation layer and bounds
//! every session with an extensible countdown.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use realtalk::prelude::*;
//!
//! # async fn example(
//! #     media: Arc<dyn MediaDevices>,
//! #     connector: Arc<dyn PeerConnector>,
//! # ) -> realtalk::error::Result<()> {
//! let config = RealtalkConfig::from_env()?;
//! let controller = SessionController::builder(Arc::new(LogPresentation), media, connector)
//!     .timer_settings(config.timer)
//!     .peer_settings(config.peer)
//!     .build();
//!
//! match controller.start_session(config.session).await {
//!     StartOutcome::Started { session_id } => println!("started {session_id}"),
//!     other => println!("not started: {other:?}"),
//! }
//! controller.stop_session().await;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod prelude;
pub mod provider;

#[cfg(feature = "cli")]
pub mod cli;
