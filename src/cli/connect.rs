//! Terminal voice session.
//!
//! Runs one session over the WebRTC backend with the default microphone and
//! speakers, and prints the conversation. Typed lines are sent as user text;
//! `/extend` extends the countdown and `/quit` ends the session.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

use super::ConnectArgs;
use crate::audio::realtime::device::{CpalMicrophone, CpalSpeaker};
use crate::audio::realtime::webrtc::WebRtcConnector;
use crate::audio::realtime::{
    ClientEvent, DispatcherOptions, Presentation, SessionController, StartOutcome,
};
use crate::config::RealtalkConfig;
use crate::error::RealtalkError;

/// Prints conversation updates to stdout.
#[derive(Default)]
pub struct TerminalPresentation {
    ended: Notify,
}

impl TerminalPresentation {
    fn line(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
    }
}

impl Presentation for TerminalPresentation {
    fn on_session_connected(&self) {
        self.line("* connected");
    }

    fn on_session_disconnected(&self) {
        self.line("* disconnected");
        self.ended.notify_one();
    }

    fn on_session_error(&self, message: &str) {
        self.line(&format!("! {message}"));
    }

    fn show_typing_indicator(&self) {}

    fn remove_typing_indicator(&self) {}

    fn add_user_transcription(&self, text: &str) {
        self.line(&format!("you: {text}"));
    }

    fn add_assistant_transcription(&self, text: &str) {
        self.line(&format!("assistant: {text}"));
    }

    fn add_system_message(&self, text: &str) {
        self.line(&format!("* {text}"));
    }

    fn update_assistant_transcription(&self, partial: &str) {
        tracing::debug!(%partial, "assistant (partial)");
    }
}

/// How a terminal session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Finished,
    /// Start failed. The error has already been shown to the user.
    StartFailed,
}

impl From<SessionEnd> for ExitCode {
    fn from(end: SessionEnd) -> Self {
        match end {
            SessionEnd::Finished => ExitCode::SUCCESS,
            SessionEnd::StartFailed => ExitCode::FAILURE,
        }
    }
}

fn unstarted_end(outcome: &StartOutcome) -> SessionEnd {
    match outcome {
        StartOutcome::Failed(_) => SessionEnd::StartFailed,
        _ => SessionEnd::Finished,
    }
}

pub async fn run(args: ConnectArgs) -> Result<SessionEnd, RealtalkError> {
    let config = RealtalkConfig::load(args.config.config.as_deref())?;
    let presentation = Arc::new(TerminalPresentation::default());
    let controller = SessionController::builder(
        presentation.clone(),
        Arc::new(CpalMicrophone::new()),
        Arc::new(WebRtcConnector::new()),
    )
    .audio_sink(Arc::new(CpalSpeaker::new()))
    .peer_settings(config.peer)
    .timer_settings(config.timer)
    .dispatcher_options(DispatcherOptions {
        accumulate_deltas: args.stream_transcript,
    })
    .build();

    match controller.start_session(config.session).await {
        StartOutcome::Started { session_id } => {
            tracing::info!(%session_id, "Session started");
        }
        outcome => return Ok(unstarted_end(&outcome)),
    }

    let mut timer = controller.timer();
    let mut warned = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = presentation.ended.notified() => break,
            _ = tokio::signal::ctrl_c() => break,
            changed = timer.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *timer.borrow_and_update();
                if snapshot.extend_available && !warned {
                    warned = true;
                    presentation.line(&format!("* {} left, type /extend to continue", snapshot.display()));
                } else if !snapshot.critical {
                    warned = false;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_input(&controller, &presentation, line.trim()).await,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "Failed to read stdin");
                    break;
                }
            },
        }
    }
    controller.stop_session().await;
    Ok(SessionEnd::Finished)
}

async fn handle_input(
    controller: &SessionController,
    presentation: &TerminalPresentation,
    line: &str,
) {
    match line {
        "" => {}
        "/quit" => controller.stop_session().await,
        "/extend" => match controller.extend_session() {
            Some(snapshot) => presentation.line(&format!("* extended, {} left", snapshot.display())),
            None => presentation.line("* no active session"),
        },
        text => {
            let sent = async {
                controller.send_event(&ClientEvent::user_text(text)).await?;
                controller
                    .send_event(&ClientEvent::ResponseCreate { response: None })
                    .await
            }
            .await;
            if let Err(error) = sent {
                presentation.line(&format!("! {error}"));
            }
        }
    }
}
