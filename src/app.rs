use std::collections::VecDeque;
use std::time::Duration;

use crate::conversion::{ControlMode, DerivedQuantities, MillGeometry};
use crate::data::{Identity, InverterSnapshot, MotorNameplate, Rotation};
use crate::input::InputTarget;
use crate::interface::InterfaceMode;
use crate::session::{SessionProgress, SessionState};
use crate::transport::WorkerEvent;

const HISTORY_LEN: usize = 240;

#[derive(Debug)]
pub struct AppState {
    pub interface: InterfaceMode,
    pub connected: bool,
    pub port: Option<String>,
    pub identity: Option<Identity>,
    pub nameplate: Option<MotorNameplate>,
    pub limits: Option<DerivedQuantities>,
    pub snapshot: Option<InverterSnapshot>,
    /// Speeds derived from the last reported output frequency.
    pub live: Option<DerivedQuantities>,
    /// Last accepted operator setpoint.
    pub setpoint: Option<DerivedQuantities>,
    pub control: Option<ControlMode>,
    pub geometry: Option<MillGeometry>,
    pub state: SessionState,
    pub direction: Rotation,
    pub duration: Duration,
    pub progress: Option<SessionProgress>,
    pub message: String,
    pub message_is_error: bool,
    pub frequency_history: VecDeque<(f64, f64)>,
    pub tick: u32,
    pub should_quit: bool,
    pub input: Option<InputTarget>,
    pub input_buffer: String,
}

impl AppState {
    pub fn new(interface: InterfaceMode, port: Option<String>, duration: Duration) -> Self {
        Self {
            interface,
            connected: false,
            port,
            identity: None,
            nameplate: None,
            limits: None,
            snapshot: None,
            live: None,
            setpoint: None,
            control: None,
            geometry: None,
            state: SessionState::Idle,
            direction: Rotation::Forward,
            duration,
            progress: None,
            message: String::from("Connecting..."),
            message_is_error: false,
            frequency_history: VecDeque::with_capacity(HISTORY_LEN),
            tick: 0,
            should_quit: false,
            input: None,
            input_buffer: String::new(),
        }
    }

    /// Running or paused: duration, direction and geometry are fixed.
    pub const fn edit_locked(&self) -> bool {
        matches!(self.state, SessionState::Running | SessionState::Paused)
    }

    pub fn notify(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.message_is_error = false;
    }

    pub fn notify_error(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.message_is_error = true;
    }

    pub fn apply_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Connected {
                port,
                identity,
                nameplate,
                limits,
            } => {
                self.connected = true;
                self.port = Some(port);
                self.identity = Some(identity);
                self.nameplate = Some(nameplate);
                self.limits = limits;
            }
            WorkerEvent::Disconnected => {
                self.connected = false;
                self.snapshot = None;
                self.live = None;
                self.progress = None;
            }
            WorkerEvent::Poll(report) => {
                self.state = report.state;
                self.progress = report.progress;
                self.live = Some(report.speeds);
                self.snapshot = Some(report.snapshot);
                self.push_history();
            }
            WorkerEvent::PollFailed(message) => {
                self.notify_error(format!("Communication error: {message}"));
            }
            WorkerEvent::Setpoint(derived) => self.setpoint = Some(derived),
            WorkerEvent::Session {
                state,
                direction,
                duration,
                control,
                geometry,
                limits,
            } => {
                if state == SessionState::Idle {
                    self.progress = None;
                }
                self.state = state;
                self.direction = direction;
                self.duration = duration;
                self.control = control;
                self.geometry = Some(geometry);
                self.limits = limits;
            }
            WorkerEvent::Notice(message) => {
                if !message.is_empty() {
                    self.notify(message);
                }
            }
            WorkerEvent::Failed(message) => self.notify_error(message),
        }
    }

    fn push_history(&mut self) {
        let tick = f64::from(self.tick);
        if let Some(snapshot) = &self.snapshot {
            self.frequency_history
                .push_back((tick, snapshot.output_frequency));
        }
        self.tick = self.tick.wrapping_add(1);
        while self.frequency_history.len() > HISTORY_LEN {
            self.frequency_history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::AppState;
    use crate::controller::PollReport;
    use crate::conversion::{DerivedQuantities, MillGeometry};
    use crate::data::{InverterSnapshot, Rotation, StatusFlags};
    use crate::interface::InterfaceMode;
    use crate::session::SessionState;
    use crate::transport::WorkerEvent;

    fn report(output_frequency: f64) -> PollReport {
        PollReport {
            snapshot: InverterSnapshot {
                command_frequency: 25.0,
                output_frequency,
                output_voltage: 110.0,
                dc_bus_voltage: 311,
                output_current: 1.8,
                temperature: 31.2,
                output_torque: 40,
                flags: StatusFlags::from_word(0b101),
            },
            speeds: DerivedQuantities {
                vessel_rpm: 77,
                shaft_rpm: 375,
                frequency: output_frequency,
            },
            state: SessionState::Running,
            progress: None,
            completed: false,
        }
    }

    #[test]
    fn poll_reports_fill_history() {
        let mut app = AppState::new(InterfaceMode::Simulation, None, Duration::from_secs(60));
        for _ in 0..300 {
            app.apply_event(WorkerEvent::Poll(report(25.0)));
        }
        assert_eq!(app.frequency_history.len(), 240);
        assert_eq!(app.state, SessionState::Running);
        assert_eq!(app.live.map(|live| live.shaft_rpm), Some(375));
    }

    #[test]
    fn poll_failure_keeps_last_values() {
        let mut app = AppState::new(InterfaceMode::Simulation, None, Duration::from_secs(60));
        app.apply_event(WorkerEvent::Poll(report(25.0)));
        app.apply_event(WorkerEvent::PollFailed(String::from("timed out")));
        assert!(app.message_is_error);
        assert!(app.snapshot.is_some());
        assert_eq!(app.state, SessionState::Running);
    }

    #[test]
    fn session_event_updates_lock_state() {
        let mut app = AppState::new(InterfaceMode::Native, None, Duration::from_secs(60));
        app.apply_event(WorkerEvent::Session {
            state: SessionState::Paused,
            direction: Rotation::Reverse,
            duration: Duration::from_secs(7200),
            control: None,
            geometry: MillGeometry::new(220.0, 45.4).expect("geometry"),
            limits: None,
        });
        assert!(app.edit_locked());
        assert_eq!(app.direction, Rotation::Reverse);
        assert_eq!(app.duration, Duration::from_secs(7200));
    }
}
