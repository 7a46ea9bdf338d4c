use std::sync::mpsc::Sender;

use color_eyre::eyre::{self, WrapErr};
use crossterm::event::KeyCode;

use crate::app::AppState;
use crate::conversion::ControlMode;
use crate::transport::WorkerCommand;

/// What a typed entry in the popup sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputTarget {
    VesselRpm,
    ShaftRpm,
    Frequency,
    /// `H:MM`
    Duration,
    /// `vessel,shaft` in millimetres
    Geometry,
}

impl InputTarget {
    pub const fn title(self) -> &'static str {
        match self {
            Self::VesselRpm => "Vessel RPM",
            Self::ShaftRpm => "Shaft RPM",
            Self::Frequency => "Frequency",
            Self::Duration => "Milling Time",
            Self::Geometry => "Mill Geometry",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::VesselRpm | Self::ShaftRpm => " rpm",
            Self::Frequency => " Hz",
            Self::Duration => " (H:MM)",
            Self::Geometry => " mm (vessel,shaft)",
        }
    }

    const fn max_len(self) -> usize {
        match self {
            Self::VesselRpm | Self::ShaftRpm => 5,
            Self::Frequency | Self::Duration => 6,
            Self::Geometry => 16,
        }
    }

    fn accepts(self, ch: char) -> bool {
        match self {
            Self::VesselRpm | Self::ShaftRpm => ch.is_ascii_digit(),
            Self::Frequency => ch.is_ascii_digit() || ch == '.',
            Self::Duration => ch.is_ascii_digit() || ch == ':',
            Self::Geometry => ch.is_ascii_digit() || ch == '.' || ch == ',',
        }
    }

    /// Turns the typed text into the command it stands for.
    pub fn parse(self, text: &str) -> Result<WorkerCommand, String> {
        let text = text.trim();
        let invalid = || format!("Invalid {}: '{text}'", self.title().to_lowercase());
        match self {
            Self::VesselRpm => text
                .parse()
                .map(|rpm| WorkerCommand::SetControl(ControlMode::Vessel(rpm)))
                .map_err(|_| invalid()),
            Self::ShaftRpm => text
                .parse()
                .map(|rpm| WorkerCommand::SetControl(ControlMode::Shaft(rpm)))
                .map_err(|_| invalid()),
            Self::Frequency => text
                .parse()
                .map(|hz| WorkerCommand::SetControl(ControlMode::Frequency(hz)))
                .map_err(|_| invalid()),
            Self::Duration => {
                let (hours, minutes) = text.split_once(':').unwrap_or((text, "0"));
                let hours = hours.parse().map_err(|_| invalid())?;
                let minutes = minutes.parse().map_err(|_| invalid())?;
                Ok(WorkerCommand::SetDuration { hours, minutes })
            }
            Self::Geometry => {
                let (vessel, shaft) = text.split_once(',').ok_or_else(invalid)?;
                Ok(WorkerCommand::SetGeometry {
                    vessel_mm: vessel.parse().map_err(|_| invalid())?,
                    shaft_mm: shaft.parse().map_err(|_| invalid())?,
                })
            }
        }
    }
}

pub fn handle_key_event(
    code: KeyCode,
    app: &mut AppState,
    command_tx: &Sender<WorkerCommand>,
) -> eyre::Result<bool> {
    if let Some(target) = app.input {
        handle_input_event(code, target, app, command_tx)?;
        return Ok(false);
    }

    match code {
        KeyCode::Char('q') => {
            app.should_quit = true;
            return Ok(true);
        }
        KeyCode::Char('c') => {
            let command = if app.connected {
                WorkerCommand::Disconnect
            } else {
                WorkerCommand::Connect(app.port.clone())
            };
            send(command_tx, command)?;
        }
        KeyCode::Char('r') if require_connection(app) => send(command_tx, WorkerCommand::Run)?,
        KeyCode::Char('p') if require_connection(app) => {
            send(command_tx, WorkerCommand::TogglePause)?;
        }
        KeyCode::Char('s') if require_connection(app) => send(command_tx, WorkerCommand::Stop)?,
        KeyCode::Char('d') => {
            if app.edit_locked() {
                app.notify_error("Stop the mill before changing direction");
            } else {
                send(
                    command_tx,
                    WorkerCommand::SetDirection(app.direction.toggled()),
                )?;
            }
        }
        KeyCode::Char('v') if require_connection(app) => open_input(app, InputTarget::VesselRpm),
        KeyCode::Char('h') if require_connection(app) => open_input(app, InputTarget::ShaftRpm),
        KeyCode::Char('f') if require_connection(app) => open_input(app, InputTarget::Frequency),
        KeyCode::Char('t') => {
            if app.edit_locked() {
                app.notify_error("Stop the mill before changing the milling time");
            } else {
                open_input(app, InputTarget::Duration);
            }
        }
        KeyCode::Char('g') => {
            if app.edit_locked() {
                app.notify_error("Stop the mill before changing the geometry");
            } else {
                open_input(app, InputTarget::Geometry);
            }
        }
        _ => {}
    }

    Ok(false)
}

fn handle_input_event(
    code: KeyCode,
    target: InputTarget,
    app: &mut AppState,
    command_tx: &Sender<WorkerCommand>,
) -> eyre::Result<()> {
    match code {
        KeyCode::Esc => close_input(app),
        KeyCode::Enter => {
            match target.parse(&app.input_buffer) {
                Ok(command) => send(command_tx, command)?,
                Err(message) => app.notify_error(message),
            }
            close_input(app);
        }
        KeyCode::Backspace => {
            app.input_buffer.pop();
        }
        KeyCode::Char(ch) if target.accepts(ch) => {
            if app.input_buffer.len() < target.max_len() {
                app.input_buffer.push(ch);
            }
        }
        _ => {}
    }
    Ok(())
}

fn require_connection(app: &mut AppState) -> bool {
    if !app.connected {
        app.notify_error("Not connected. Press c to connect.");
    }
    app.connected
}

fn open_input(app: &mut AppState, target: InputTarget) {
    app.input = Some(target);
    app.input_buffer.clear();
}

fn close_input(app: &mut AppState) {
    app.input = None;
    app.input_buffer.clear();
}

fn send(command_tx: &Sender<WorkerCommand>, command: WorkerCommand) -> eyre::Result<()> {
    command_tx.send(command).wrap_err("send worker command")
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use crossterm::event::KeyCode;

    use super::{InputTarget, handle_key_event};
    use crate::app::AppState;
    use crate::conversion::ControlMode;
    use crate::data::Rotation;
    use crate::interface::InterfaceMode;
    use crate::session::SessionState;
    use crate::transport::WorkerCommand;

    fn connected_app() -> AppState {
        let mut app = AppState::new(
            InterfaceMode::Simulation,
            Some(String::from("sim")),
            Duration::from_secs(7200),
        );
        app.connected = true;
        app
    }

    #[test]
    fn disconnected_app_does_not_emit_motor_commands() {
        let (tx, rx) = mpsc::channel();
        let mut app = connected_app();
        app.connected = false;

        for key in ['r', 'p', 's', 'v'] {
            handle_key_event(KeyCode::Char(key), &mut app, &tx).expect("key should be handled");
        }

        assert!(rx.try_recv().is_err());
        assert!(app.message_is_error);
        assert!(app.input.is_none());
    }

    #[test]
    fn run_key_sends_run() {
        let (tx, rx) = mpsc::channel();
        let mut app = connected_app();

        handle_key_event(KeyCode::Char('r'), &mut app, &tx).expect("r key should work");

        assert_eq!(rx.recv().expect("command expected"), WorkerCommand::Run);
    }

    #[test]
    fn direction_toggle_is_refused_while_running() {
        let (tx, rx) = mpsc::channel();
        let mut app = connected_app();

        handle_key_event(KeyCode::Char('d'), &mut app, &tx).expect("d key should work");
        assert_eq!(
            rx.recv().expect("command expected"),
            WorkerCommand::SetDirection(Rotation::Reverse)
        );

        app.state = SessionState::Running;
        handle_key_event(KeyCode::Char('d'), &mut app, &tx).expect("d key should work");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn typed_vessel_rpm_becomes_control_mode() {
        let (tx, rx) = mpsc::channel();
        let mut app = connected_app();

        handle_key_event(KeyCode::Char('v'), &mut app, &tx).expect("v key should work");
        for key in ['7', 'x', '4'] {
            handle_key_event(KeyCode::Char(key), &mut app, &tx).expect("digit should work");
        }
        assert_eq!(app.input_buffer, "74");
        handle_key_event(KeyCode::Enter, &mut app, &tx).expect("enter key should work");

        assert_eq!(
            rx.recv().expect("command expected"),
            WorkerCommand::SetControl(ControlMode::Vessel(74))
        );
        assert!(app.input.is_none());
    }

    #[test]
    fn escape_discards_the_entry() {
        let (tx, rx) = mpsc::channel();
        let mut app = connected_app();

        handle_key_event(KeyCode::Char('f'), &mut app, &tx).expect("f key should work");
        handle_key_event(KeyCode::Char('3'), &mut app, &tx).expect("digit should work");
        handle_key_event(KeyCode::Esc, &mut app, &tx).expect("esc key should work");

        assert!(rx.try_recv().is_err());
        assert!(app.input_buffer.is_empty());
    }

    #[test]
    fn duration_and_geometry_entries_parse() {
        assert_eq!(
            InputTarget::Duration.parse("1:30"),
            Ok(WorkerCommand::SetDuration {
                hours: 1,
                minutes: 30
            })
        );
        assert_eq!(
            InputTarget::Duration.parse("3"),
            Ok(WorkerCommand::SetDuration {
                hours: 3,
                minutes: 0
            })
        );
        assert_eq!(
            InputTarget::Geometry.parse("220,45.4"),
            Ok(WorkerCommand::SetGeometry {
                vessel_mm: 220.0,
                shaft_mm: 45.4
            })
        );
        assert!(InputTarget::Geometry.parse("220").is_err());
        assert!(InputTarget::Frequency.parse("").is_err());
    }
}
