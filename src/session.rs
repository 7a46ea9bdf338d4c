//! Milling session: run/pause/stop states and the session timer.
//!
//! Time is passed in by the caller; nothing here samples the clock.

use std::fmt;
use std::time::{Duration, Instant};

use crate::data::Rotation;
use crate::error::ControlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Paused,
    /// Timer ran out; final progress is kept for display until the next run.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionProgress {
    pub elapsed: Duration,
    pub remaining: Duration,
    /// `elapsed / total`, within `[0, 1]`.
    pub ratio: f64,
}

impl SessionProgress {
    fn new(elapsed: Duration, total: Duration) -> Self {
        let elapsed = elapsed.min(total);
        let ratio = if total.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
        };
        Self {
            elapsed,
            remaining: total - elapsed,
            ratio,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    /// Start of the current running stretch.
    resumed_at: Instant,
    /// Time milled before `resumed_at`.
    offset: Duration,
}

#[derive(Debug, Clone)]
pub struct MillingSession {
    state: SessionState,
    duration: Duration,
    direction: Rotation,
    timer: Option<Timer>,
    frozen: Option<SessionProgress>,
}

impl MillingSession {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            duration,
            direction: Rotation::Forward,
            timer: None,
            frozen: None,
        }
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn duration(&self) -> Duration {
        self.duration
    }

    pub const fn direction(&self) -> Rotation {
        self.direction
    }

    /// Duration, direction and geometry stay fixed from Run until Stop.
    pub const fn edit_locked(&self) -> bool {
        matches!(self.state, SessionState::Running | SessionState::Paused)
    }

    pub fn set_duration(&mut self, duration: Duration) -> Result<(), ControlError> {
        if self.edit_locked() {
            return Err(ControlError::EditLocked("milling duration"));
        }
        if duration.is_zero() {
            return Err(ControlError::InvalidArgument(String::from(
                "milling duration must be longer than zero",
            )));
        }
        self.duration = duration;
        Ok(())
    }

    pub fn set_direction(&mut self, direction: Rotation) -> Result<(), ControlError> {
        if self.edit_locked() {
            return Err(ControlError::EditLocked("rotation direction"));
        }
        self.direction = direction;
        Ok(())
    }

    pub fn ensure(&self, action: &'static str, allowed: &[SessionState]) -> Result<(), ControlError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ControlError::InvalidTransition {
                action,
                state: self.state,
            })
        }
    }

    pub fn start(&mut self, direction: Rotation, now: Instant) {
        self.direction = direction;
        self.timer = Some(Timer {
            resumed_at: now,
            offset: Duration::ZERO,
        });
        self.frozen = None;
        self.state = SessionState::Running;
    }

    /// Freezes elapsed/remaining at `now`.
    pub fn pause(&mut self, now: Instant) {
        self.frozen = self.progress(now);
        self.timer = None;
        self.state = SessionState::Paused;
    }

    /// Continues from the frozen values, so the total stays as configured.
    pub fn resume(&mut self, now: Instant) {
        let offset = self.frozen.map_or(Duration::ZERO, |progress| progress.elapsed);
        self.timer = Some(Timer {
            resumed_at: now,
            offset,
        });
        self.frozen = None;
        self.state = SessionState::Running;
    }

    pub fn stop(&mut self) {
        self.timer = None;
        self.frozen = None;
        self.state = SessionState::Idle;
    }

    /// Timer ran out: keep a full progress bar for display.
    pub fn complete(&mut self) {
        self.timer = None;
        self.frozen = Some(SessionProgress::new(self.duration, self.duration));
        self.state = SessionState::Stopped;
    }

    pub fn progress(&self, now: Instant) -> Option<SessionProgress> {
        match (self.state, self.timer) {
            (SessionState::Running, Some(timer)) => {
                let elapsed = timer.offset + now.saturating_duration_since(timer.resumed_at);
                Some(SessionProgress::new(elapsed, self.duration))
            }
            (SessionState::Paused | SessionState::Stopped, _) => self.frozen,
            _ => None,
        }
    }

    /// When the running session is due to end.
    pub fn stop_time(&self) -> Option<Instant> {
        match (self.state, self.timer) {
            (SessionState::Running, Some(timer)) => {
                Some(timer.resumed_at + self.duration.saturating_sub(timer.offset))
            }
            _ => None,
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.stop_time().is_some_and(|stop| now >= stop)
    }
}

/// `HH:MM:SS`, hours not wrapped at 24.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
