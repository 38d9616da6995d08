//! Session countdown.
//!
//! The timer, not the transport, bounds how long a session may run. It
//! ticks once per second, publishes a [`TimerSnapshot`] for display and
//! calls its expiry callback exactly once when the remaining time hits zero.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::RealtalkError;

const DEFAULT_DURATION: Duration = Duration::from_secs(120);
const DEFAULT_EXTENSION: Duration = Duration::from_secs(120);
const WARNING_THRESHOLD: Duration = Duration::from_secs(60);
const CRITICAL_THRESHOLD: Duration = Duration::from_secs(30);
const MIN_TICK: Duration = Duration::from_millis(1);

/// Countdown tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    #[serde(with = "secs")]
    pub duration: Duration,
    #[serde(with = "secs")]
    pub extension: Duration,
    #[serde(with = "secs")]
    pub tick: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION,
            extension: DEFAULT_EXTENSION,
            tick: Duration::from_secs(1),
        }
    }
}

impl TimerSettings {
    /// Reject a countdown that would expire immediately or never tick.
    pub fn validate(&self) -> Result<(), RealtalkError> {
        if self.duration.is_zero() || self.tick.is_zero() {
            return Err(RealtalkError::Configuration(
                "Timer duration and tick must be positive".into(),
            ));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Read-only view of the countdown for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub active: bool,
    pub total: Duration,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub warning: bool,
    pub critical: bool,
    pub extend_available: bool,
    pub expired: bool,
}

impl TimerSnapshot {
    fn idle(total: Duration) -> Self {
        Self {
            active: false,
            total,
            elapsed: Duration::ZERO,
            remaining: total,
            warning: false,
            critical: false,
            extend_available: false,
            expired: false,
        }
    }

    fn running(total: Duration, elapsed: Duration) -> Self {
        let remaining = total.saturating_sub(elapsed);
        let critical = remaining <= CRITICAL_THRESHOLD;
        Self {
            active: !remaining.is_zero(),
            total,
            elapsed: elapsed.min(total),
            remaining,
            warning: remaining <= WARNING_THRESHOLD,
            critical,
            extend_available: critical && !remaining.is_zero(),
            expired: remaining.is_zero(),
        }
    }

    /// Whole seconds left, rounded up.
    pub fn remaining_secs(&self) -> u64 {
        let millis = self.remaining.as_millis() as u64;
        millis.div_ceil(1000)
    }

    /// `MM:SS` countdown text.
    pub fn display(&self) -> String {
        let secs = self.remaining_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }

    /// Fraction of the allotted time already used, 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        if self.total.is_zero() {
            return 1.0;
        }
        (self.total - self.remaining).as_secs_f64() / self.total.as_secs_f64()
    }
}

struct TimerState {
    started_at: Option<Instant>,
    total: Duration,
    expired: bool,
    cancel: Option<CancellationToken>,
}

/// Extensible session countdown.
#[derive(Clone)]
pub struct SessionTimer {
    settings: TimerSettings,
    state: Arc<Mutex<TimerState>>,
    snapshots: Arc<watch::Sender<TimerSnapshot>>,
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new(TimerSettings::default())
    }
}

impl SessionTimer {
    pub fn new(settings: TimerSettings) -> Self {
        let (snapshots, _) = watch::channel(TimerSnapshot::idle(settings.duration));
        Self {
            settings,
            state: Arc::new(Mutex::new(TimerState {
                started_at: None,
                total: settings.duration,
                expired: false,
                cancel: None,
            })),
            snapshots: Arc::new(snapshots),
        }
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    /// Subscribe to per-tick snapshots.
    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.subscribe()
    }

    /// Current countdown state, computed from the clock.
    pub fn snapshot(&self) -> TimerSnapshot {
        Self::snapshot_of(&self.state.lock())
    }

    fn snapshot_of(state: &TimerState) -> TimerSnapshot {
        match state.started_at {
            Some(started_at) => TimerSnapshot::running(state.total, started_at.elapsed()),
            None if state.expired => TimerSnapshot::running(state.total, state.total),
            None => TimerSnapshot::idle(state.total),
        }
    }

    /// Start (or restart) the countdown. `on_expire` runs once at zero.
    pub fn start<F, Fut>(&self, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let started_at = Instant::now();
        {
            let mut state = self.state.lock();
            if let Some(previous) = state.cancel.replace(cancel.clone()) {
                previous.cancel();
            }
            state.started_at = Some(started_at);
            state.total = self.settings.duration;
            state.expired = false;
        }
        self.publish();
        tracing::info!(duration_secs = self.settings.duration.as_secs(), "Session timer started");

        let timer = self.clone();
        tokio::spawn(async move {
            // interval_at panics on a zero period.
            let tick = timer.settings.tick.max(MIN_TICK);
            let mut ticker = time::interval_at(started_at + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if timer.on_tick(&cancel) {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Session time expired - automatically terminating session");
            on_expire().await;
        });
    }

    /// Recompute and publish; returns true exactly once, when time runs out.
    fn on_tick(&self, cancel: &CancellationToken) -> bool {
        let snapshot = {
            let mut state = self.state.lock();
            if cancel.is_cancelled() {
                return false;
            }
            let snapshot = Self::snapshot_of(&state);
            if snapshot.expired {
                state.started_at = None;
                state.expired = true;
                state.cancel = None;
            }
            snapshot
        };
        self.snapshots.send_replace(snapshot);
        snapshot.expired
    }

    /// Add the extension to the allotted time without resetting the start.
    ///
    /// Returns the updated snapshot, or `None` when the timer is not running.
    pub fn extend(&self) -> Option<TimerSnapshot> {
        let snapshot = {
            let mut state = self.state.lock();
            state.started_at?;
            state.total += self.settings.extension;
            Self::snapshot_of(&state)
        };
        self.snapshots.send_replace(snapshot);
        tracing::info!(
            extension_secs = self.settings.extension.as_secs(),
            remaining_secs = snapshot.remaining_secs(),
            "Session extended"
        );
        Some(snapshot)
    }

    /// Cancel the countdown and reset to the initial duration.
    pub fn stop(&self) {
        let was_running = {
            let mut state = self.state.lock();
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            let was_running = state.started_at.take().is_some();
            state.total = self.settings.duration;
            state.expired = false;
            was_running
        };
        self.publish();
        if was_running {
            tracing::info!("Session timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().started_at.is_some()
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshots.send_replace(snapshot);
    }
}

impl std::fmt::Debug for SessionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTimer")
            .field("settings", &self.settings)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_rounds_partial_seconds_up() {
        let snapshot = TimerSnapshot::running(
            Duration::from_secs(120),
            Duration::from_millis(118_500),
        );
        assert_eq!(snapshot.display(), "00:02");
        assert!(snapshot.critical);
        assert!(snapshot.extend_available);
    }

    #[test]
    fn idle_snapshot_shows_full_duration() {
        let timer = SessionTimer::default();
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.display(), "02:00");
        assert!(!snapshot.active);
        assert_eq!(snapshot.progress(), 0.0);
    }

    #[test]
    fn thresholds_follow_remaining_time() {
        let total = Duration::from_secs(120);
        let calm = TimerSnapshot::running(total, Duration::from_secs(59));
        assert!(!calm.warning && !calm.critical);

        let warning = TimerSnapshot::running(total, Duration::from_secs(60));
        assert!(warning.warning && !warning.critical && !warning.extend_available);

        let done = TimerSnapshot::running(total, Duration::from_secs(130));
        assert!(done.expired && !done.extend_available && !done.active);
        assert_eq!(done.display(), "00:00");
        assert_eq!(done.progress(), 1.0);
    }

    #[test]
    fn extend_is_ignored_when_idle() {
        let timer = SessionTimer::default();
        assert!(timer.extend().is_none());
        assert_eq!(timer.snapshot().total, Duration::from_secs(120));
    }

    #[test]
    fn settings_read_seconds_from_toml() {
        let settings: TimerSettings = toml::from_str("duration = 300").expect("parse");
        assert_eq!(settings.duration, Duration::from_secs(300));
        assert_eq!(settings.extension, DEFAULT_EXTENSION);
    }

    #[test]
    fn zero_duration_or_tick_is_invalid() {
        TimerSettings::default().validate().expect("defaults are valid");

        let no_tick = TimerSettings {
            tick: Duration::ZERO,
            ..TimerSettings::default()
        };
        assert!(matches!(no_tick.validate(), Err(RealtalkError::Configuration(_))));

        let no_time = TimerSettings {
            duration: Duration::ZERO,
            ..TimerSettings::default()
        };
        assert!(no_time.validate().is_err());
    }
}
