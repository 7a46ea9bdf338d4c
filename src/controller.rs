//! Operator-facing control of one milling station.
//!
//! Every command checks the session state and the connection before any
//! device I/O, and only records a transition once the drive accepted the
//! write. A failed stop therefore leaves the session running.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::backend::{Connector, RegisterTransport};
use crate::conversion::{ControlMode, DerivedQuantities, DriveRating, MillGeometry};
use crate::data::{Identity, InverterSnapshot, MotorNameplate, Operation, Rotation};
use crate::error::{ConnectError, ControlError};
use crate::inverter::Inverter;
use crate::session::{MillingSession, SessionProgress, SessionState};

/// A live link to the drive, with what was learned during the handshake.
struct Connection {
    port: String,
    inverter: Inverter<Box<dyn RegisterTransport>>,
    identity: Identity,
    nameplate: MotorNameplate,
    rating: DriveRating,
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub snapshot: InverterSnapshot,
    /// Speeds derived from the reported output frequency.
    pub speeds: DerivedQuantities,
    pub state: SessionState,
    pub progress: Option<SessionProgress>,
    /// The timer ran out during this cycle and the drive was stopped.
    pub completed: bool,
}

pub struct Controller {
    connector: Box<dyn Connector>,
    slave: u8,
    connection: Option<Connection>,
    session: MillingSession,
    geometry: MillGeometry,
    control: Option<ControlMode>,
}

impl Controller {
    pub fn new(
        connector: Box<dyn Connector>,
        slave: u8,
        geometry: MillGeometry,
        duration: Duration,
    ) -> Self {
        Self {
            connector,
            slave,
            connection: None,
            session: MillingSession::new(duration),
            geometry,
            control: None,
        }
    }

    /// Opens `port`, reads identity and nameplate, and brings the drive to
    /// a stop so the session starts from a known state.
    pub fn connect(&mut self, port: &str) -> Result<MotorNameplate, ConnectError> {
        self.disconnect().map_err(ConnectError::StillRunning)?;

        let transport = self.connector.open(port).map_err(|source| ConnectError::Open {
            port: port.to_string(),
            source,
        })?;
        let mut inverter = Inverter::new(transport, self.slave);
        let handshake = |source| ConnectError::Handshake {
            port: port.to_string(),
            source,
        };
        let identity = inverter.read_identity().map_err(handshake)?;
        let nameplate = inverter.read_motor_nameplate().map_err(handshake)?;
        inverter
            .write_operation(Operation::Stop(self.session.direction()).code())
            .map_err(handshake)?;

        let rating = DriveRating::from_nameplate(&nameplate);
        info!(
            port,
            model = %identity.model,
            firmware = %identity.firmware,
            rated_hz = nameplate.frequency,
            poles = nameplate.poles,
            motor_max_rpm = rating.motor_max_rpm(),
            "inverter connected"
        );
        self.connection = Some(Connection {
            port: port.to_string(),
            inverter,
            identity,
            nameplate: nameplate.clone(),
            rating,
        });
        Ok(nameplate)
    }

    /// Tries each port in order and keeps the first that completes the
    /// handshake.
    pub fn discover(&mut self, ports: &[String]) -> Result<String, ConnectError> {
        for port in ports {
            info!(port = %port, "probing for inverter");
            match self.connect(port) {
                Ok(_) => return Ok(port.clone()),
                Err(err) => warn!(port = %port, error = %err, "no inverter on port"),
            }
        }
        Err(ConnectError::NoInverterFound {
            attempted: ports.to_vec(),
        })
    }

    /// Drops the link. Nameplate data and any session go with it.
    ///
    /// A running or paused mill is stopped first. If that stop is not
    /// acknowledged the link and the session are kept.
    pub fn disconnect(&mut self) -> Result<(), ControlError> {
        if let Some(connection) = self.connection.as_mut()
            && matches!(
                self.session.state(),
                SessionState::Running | SessionState::Paused
            )
        {
            connection
                .inverter
                .write_operation(Operation::Stop(self.session.direction()).code())?;
            info!("motor stopped before disconnect");
        }
        if let Some(connection) = self.connection.take() {
            info!(port = %connection.port, "inverter disconnected");
        }
        self.session.stop();
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.port.as_str())
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.connection.as_ref().map(|c| &c.identity)
    }

    pub fn nameplate(&self) -> Option<&MotorNameplate> {
        self.connection.as_ref().map(|c| &c.nameplate)
    }

    pub fn rating(&self) -> Option<&DriveRating> {
        self.connection.as_ref().map(|c| &c.rating)
    }

    pub fn session(&self) -> &MillingSession {
        &self.session
    }

    pub fn geometry(&self) -> &MillGeometry {
        &self.geometry
    }

    pub fn control_mode(&self) -> Option<ControlMode> {
        self.control
    }

    /// Full-scale speeds for the current geometry and motor.
    pub fn limits(&self) -> Option<DerivedQuantities> {
        self.rating()
            .map(|rating| DerivedQuantities::maximum(&self.geometry, rating))
    }

    /// Makes `mode` the authoritative speed input and commands the derived
    /// frequency. Nothing is written when the result is out of range.
    pub fn set_control_mode(&mut self, mode: ControlMode) -> Result<DerivedQuantities, ControlError> {
        let connection = connected(&mut self.connection)?;
        let derived = DerivedQuantities::from_mode(mode, &self.geometry, &connection.rating)?;
        connection.inverter.write_frequency(derived.frequency)?;
        info!(mode = mode.label(), hz = derived.frequency, "frequency command set");
        self.control = Some(mode);
        Ok(derived)
    }

    pub fn run(&mut self, direction: Rotation, now: Instant) -> Result<(), ControlError> {
        let connection = connected(&mut self.connection)?;
        self.session
            .ensure("run", &[SessionState::Idle, SessionState::Stopped])?;
        connection
            .inverter
            .write_operation(Operation::Run(direction).code())?;
        self.session.start(direction, now);
        info!(%direction, duration = ?self.session.duration(), "milling started");
        Ok(())
    }

    pub fn pause(&mut self, now: Instant) -> Result<(), ControlError> {
        let connection = connected(&mut self.connection)?;
        self.session.ensure("pause", &[SessionState::Running])?;
        connection
            .inverter
            .write_operation(Operation::Stop(self.session.direction()).code())?;
        self.session.pause(now);
        info!("milling paused");
        Ok(())
    }

    pub fn restart(&mut self, now: Instant) -> Result<(), ControlError> {
        let connection = connected(&mut self.connection)?;
        self.session.ensure("restart", &[SessionState::Paused])?;
        connection
            .inverter
            .write_operation(Operation::Run(self.session.direction()).code())?;
        self.session.resume(now);
        info!("milling restarted after pause");
        Ok(())
    }

    /// Stops the drive in the session's direction. Accepted in any state so
    /// the operator can always command a stop.
    pub fn stop(&mut self) -> Result<(), ControlError> {
        let connection = connected(&mut self.connection)?;
        connection
            .inverter
            .write_operation(Operation::Stop(self.session.direction()).code())?;
        self.session.stop();
        info!("motor stopped");
        Ok(())
    }

    pub fn set_direction(&mut self, direction: Rotation) -> Result<(), ControlError> {
        self.session.set_direction(direction)
    }

    pub fn set_duration(&mut self, hours: u32, minutes: u32) -> Result<(), ControlError> {
        if minutes >= 60 {
            return Err(ControlError::InvalidArgument(format!(
                "minutes {minutes} must be below 60"
            )));
        }
        let secs = u64::from(hours) * 3600 + u64::from(minutes) * 60;
        self.session.set_duration(Duration::from_secs(secs))
    }

    pub fn set_geometry(&mut self, vessel_mm: f64, shaft_mm: f64) -> Result<(), ControlError> {
        if self.session.edit_locked() {
            return Err(ControlError::EditLocked("mill geometry"));
        }
        self.geometry = MillGeometry::new(vessel_mm, shaft_mm)?;
        Ok(())
    }

    /// One poll cycle at `now`: read status, advance the timer, and stop the
    /// drive once the configured duration has run out.
    ///
    /// A failed read changes nothing; the session keeps its last state.
    pub fn poll_once(&mut self, now: Instant) -> Result<PollReport, ControlError> {
        let connection = connected(&mut self.connection)?;
        let snapshot = connection.inverter.read_status()?;
        let speeds = DerivedQuantities::from_frequency(
            snapshot.output_frequency,
            &self.geometry,
            &connection.rating,
        );

        let completed = if self.session.expired(now) {
            connection
                .inverter
                .write_operation(Operation::Stop(self.session.direction()).code())?;
            self.session.complete();
            info!("milling completed, motor stopped");
            true
        } else {
            false
        };

        Ok(PollReport {
            snapshot,
            speeds,
            state: self.session.state(),
            progress: self.session.progress(now),
            completed,
        })
    }
}

fn connected(connection: &mut Option<Connection>) -> Result<&mut Connection, ControlError> {
    connection.as_mut().ok_or(ControlError::NotConnected)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::Controller;
    use crate::backend::{RegisterTransport, SimInverter};
    use crate::conversion::{ControlMode, MillGeometry};
    use crate::data::Rotation;
    use crate::error::{ConnectError, ControlError, ConversionError, DriverError, TransportError};
    use crate::registers::{REG_FREQUENCY_COMMAND, REG_OPERATION};
    use crate::session::SessionState;

    const TWO_HOURS: Duration = Duration::from_secs(2 * 3600);

    fn controller(sim: &SimInverter) -> Controller {
        let handle = sim.clone();
        let connector = move |port: &str| -> Result<Box<dyn RegisterTransport>, TransportError> {
            if port == "sim" {
                Ok(Box::new(handle.clone()))
            } else {
                Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no such port",
                )))
            }
        };
        Controller::new(
            Box::new(connector),
            1,
            MillGeometry::new(220.0, 45.4).expect("geometry"),
            TWO_HOURS,
        )
    }

    fn connected(sim: &SimInverter) -> Controller {
        let mut controller = controller(sim);
        controller.connect("sim").expect("sim should connect");
        controller
    }

    fn operations(sim: &SimInverter) -> Vec<u16> {
        sim.writes()
            .into_iter()
            .filter(|(address, _)| *address == REG_OPERATION)
            .map(|(_, value)| value)
            .collect()
    }

    #[test]
    fn commands_without_connection_do_no_io() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let connector = move |_: &str| -> Result<Box<dyn RegisterTransport>, TransportError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SimInverter::new()))
        };
        let mut controller = Controller::new(
            Box::new(connector),
            1,
            MillGeometry::new(220.0, 45.4).expect("geometry"),
            TWO_HOURS,
        );
        let now = Instant::now();

        assert!(matches!(
            controller.run(Rotation::Forward, now),
            Err(ControlError::NotConnected)
        ));
        assert!(matches!(controller.pause(now), Err(ControlError::NotConnected)));
        assert!(matches!(controller.stop(), Err(ControlError::NotConnected)));
        assert!(matches!(
            controller.set_control_mode(ControlMode::Frequency(10.0)),
            Err(ControlError::NotConnected)
        ));
        assert!(matches!(
            controller.poll_once(now),
            Err(ControlError::NotConnected)
        ));
        assert_eq!(opened.load(Ordering::SeqCst), 0);
        assert_eq!(controller.session().state(), SessionState::Idle);
    }

    #[test]
    fn connect_reads_nameplate_and_stops_drive() {
        let sim = SimInverter::new();
        let mut controller = controller(&sim);
        let nameplate = controller.connect("sim").expect("sim should connect");
        assert_eq!(nameplate.poles, 8);
        assert_eq!(controller.identity().map(|i| i.model.as_str()), Some("510"));
        assert_eq!(controller.rating().map(|r| r.motor_max_rpm()), Some(750));
        assert_eq!(operations(&sim), vec![0]);

        let limits = controller.limits().expect("limits once connected");
        assert_eq!(limits.shaft_rpm, 750);
        assert_eq!(limits.vessel_rpm, 155);
    }

    #[test]
    fn zero_pole_nameplate_fails_handshake() {
        let sim = SimInverter::new();
        sim.set_register(0x0207, 0);
        let mut controller = controller(&sim);
        let err = controller
            .connect("sim")
            .expect_err("a motor without poles is not usable");
        assert!(matches!(
            err,
            ConnectError::Handshake {
                source: DriverError::InvalidNameplate(_),
                ..
            }
        ));
        assert!(!controller.is_connected());
        assert!(operations(&sim).is_empty());
    }

    #[test]
    fn vessel_speed_commands_derived_frequency() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let derived = controller
            .set_control_mode(ControlMode::Vessel(74))
            .expect("74 rpm should be accepted");
        assert_eq!(derived.shaft_rpm, 359);
        assert!((derived.frequency - 23.9).abs() < 1e-9);
        assert_eq!(sim.register(REG_FREQUENCY_COMMAND), 2390);
        assert_eq!(controller.control_mode(), Some(ControlMode::Vessel(74)));
    }

    #[test]
    fn frequency_outside_rating_is_never_written() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let before = sim.exchanges();
        for hz in [-1.0, 50.01, 60.0] {
            let err = controller
                .set_control_mode(ControlMode::Frequency(hz))
                .expect_err("out of range frequency should fail");
            assert!(matches!(
                err,
                ControlError::Conversion(ConversionError::OutOfRange { .. })
            ));
        }
        assert_eq!(sim.exchanges(), before);

        for hz in [0.0, 50.0] {
            let writes = sim.writes().len();
            controller
                .set_control_mode(ControlMode::Frequency(hz))
                .expect("boundary should be accepted");
            assert_eq!(sim.writes().len(), writes + 1);
        }
    }

    #[test]
    fn run_pause_restart_stop_issue_direction_codes() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let t0 = Instant::now();

        controller.run(Rotation::Reverse, t0).expect("run");
        controller.pause(t0 + Duration::from_secs(10)).expect("pause");
        controller.restart(t0 + Duration::from_secs(20)).expect("restart");
        controller.stop().expect("stop");
        assert_eq!(operations(&sim), vec![0, 3, 2, 3, 2]);
        assert_eq!(controller.session().state(), SessionState::Idle);
    }

    #[test]
    fn pause_restart_preserves_total_duration() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let t0 = Instant::now();

        controller.run(Rotation::Forward, t0).expect("run");
        controller.pause(t0 + Duration::from_secs(1800)).expect("pause");
        let restart = t0 + Duration::from_secs(4000);
        controller.restart(restart).expect("restart");

        let report = controller
            .poll_once(restart + Duration::from_secs(5))
            .expect("poll");
        let progress = report.progress.expect("running session has progress");
        assert_eq!(progress.elapsed, Duration::from_secs(1805));
        let total = progress.elapsed + progress.remaining;
        assert!(total.abs_diff(TWO_HOURS) <= Duration::from_secs(1));
    }

    #[test]
    fn invalid_transitions_do_no_io() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let before = sim.exchanges();
        let now = Instant::now();
        assert!(matches!(
            controller.pause(now),
            Err(ControlError::InvalidTransition { .. })
        ));
        assert!(matches!(
            controller.restart(now),
            Err(ControlError::InvalidTransition { .. })
        ));
        controller.run(Rotation::Forward, now).expect("run");
        assert!(matches!(
            controller.run(Rotation::Forward, now),
            Err(ControlError::InvalidTransition { .. })
        ));
        assert_eq!(sim.exchanges(), before + 1);
    }

    #[test]
    fn timer_expiry_stops_once() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        controller.set_duration(0, 1).expect("one minute");
        let t0 = Instant::now();
        controller.run(Rotation::Forward, t0).expect("run");

        let report = controller
            .poll_once(t0 + Duration::from_secs(30))
            .expect("poll");
        assert!(!report.completed);
        assert_eq!(report.state, SessionState::Running);

        let report = controller
            .poll_once(t0 + Duration::from_secs(60))
            .expect("poll");
        assert!(report.completed);
        assert_eq!(report.state, SessionState::Stopped);
        let progress = report.progress.expect("final progress");
        assert!((progress.ratio - 1.0).abs() < f64::EPSILON);

        let report = controller
            .poll_once(t0 + Duration::from_secs(61))
            .expect("poll");
        assert!(!report.completed);
        assert_eq!(operations(&sim), vec![0, 1, 0]);

        controller
            .run(Rotation::Forward, t0 + Duration::from_secs(70))
            .expect("a finished session can run again");
    }

    #[test]
    fn quarter_progress_after_thirty_minutes() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let t0 = Instant::now();
        controller.run(Rotation::Forward, t0).expect("run");
        let report = controller
            .poll_once(t0 + Duration::from_secs(1800))
            .expect("poll");
        let progress = report.progress.expect("progress");
        assert!((progress.ratio - 0.25).abs() < 1e-9);
        assert_eq!(progress.remaining, Duration::from_secs(5400));
        assert!(!report.completed);
    }

    #[test]
    fn poll_timeout_keeps_session_state() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let t0 = Instant::now();
        controller.run(Rotation::Forward, t0).expect("run");

        sim.fail_next(TransportError::Timeout(Duration::from_millis(300)));
        let err = controller
            .poll_once(t0 + Duration::from_secs(1))
            .expect_err("poll should fail");
        assert!(matches!(
            err,
            ControlError::Driver(DriverError::Transport(TransportError::Timeout(_)))
        ));
        assert_eq!(controller.session().state(), SessionState::Running);
        assert!(controller.is_connected());
        controller
            .poll_once(t0 + Duration::from_secs(2))
            .expect("next poll succeeds");
    }

    #[test]
    fn failed_stop_leaves_session_running() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        controller.run(Rotation::Forward, Instant::now()).expect("run");
        sim.fail_next(TransportError::Timeout(Duration::from_millis(300)));
        controller.stop().expect_err("stop should fail");
        assert_eq!(controller.session().state(), SessionState::Running);
        controller.stop().expect("stop retried");
        assert_eq!(controller.session().state(), SessionState::Idle);
    }

    #[test]
    fn geometry_is_locked_while_running() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        controller
            .set_geometry(250.0, 50.0)
            .expect("idle geometry edit");
        controller.run(Rotation::Forward, Instant::now()).expect("run");
        assert!(matches!(
            controller.set_geometry(300.0, 50.0),
            Err(ControlError::EditLocked(_))
        ));
        assert!((controller.geometry().vessel_diameter_mm() - 250.0).abs() < f64::EPSILON);
        controller.stop().expect("stop");
        assert!(matches!(
            controller.set_geometry(0.0, 50.0),
            Err(ControlError::Conversion(ConversionError::InvalidGeometry { .. }))
        ));
    }

    #[test]
    fn duration_validation() {
        let sim = SimInverter::new();
        let mut controller = controller(&sim);
        assert!(controller.set_duration(1, 60).is_err());
        assert!(controller.set_duration(0, 0).is_err());
        controller.set_duration(3, 15).expect("valid duration");
        assert_eq!(
            controller.session().duration(),
            Duration::from_secs(3 * 3600 + 15 * 60)
        );
    }

    #[test]
    fn discovery_takes_first_answering_port() {
        let sim = SimInverter::new();
        let mut controller = controller(&sim);
        let ports = vec![String::from("/dev/ttyS0"), String::from("sim")];
        let port = controller.discover(&ports).expect("sim should be found");
        assert_eq!(port, "sim");
        assert_eq!(controller.port(), Some("sim"));

        let err = controller
            .discover(&[String::from("/dev/ttyS0")])
            .expect_err("nothing answers");
        assert!(matches!(err, ConnectError::NoInverterFound { .. }));
        assert!(!controller.is_connected());
    }

    #[test]
    fn disconnect_stops_a_running_mill() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        controller.run(Rotation::Reverse, Instant::now()).expect("run");
        controller.disconnect().expect("disconnect");
        assert_eq!(operations(&sim), vec![0, 3, 2]);
        assert_eq!(sim.operation(), 2);
        assert!(controller.nameplate().is_none());
        assert_eq!(controller.session().state(), SessionState::Idle);
        assert!(matches!(
            controller.run(Rotation::Forward, Instant::now()),
            Err(ControlError::NotConnected)
        ));
    }

    #[test]
    fn disconnect_keeps_link_when_stop_is_not_acknowledged() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let t0 = Instant::now();
        controller.run(Rotation::Forward, t0).expect("run");
        controller.pause(t0 + Duration::from_secs(5)).expect("pause");

        sim.fail_next(TransportError::Timeout(Duration::from_millis(300)));
        controller
            .disconnect()
            .expect_err("an unconfirmed stop keeps the link");
        assert!(controller.is_connected());
        assert_eq!(controller.session().state(), SessionState::Paused);

        sim.fail_next(TransportError::Timeout(Duration::from_millis(300)));
        let err = controller
            .connect("sim")
            .expect_err("reconnecting must not abandon a paused mill");
        assert!(matches!(err, ConnectError::StillRunning(_)));
        assert!(controller.is_connected());

        controller.disconnect().expect("stop acknowledged");
        assert!(!controller.is_connected());
        assert_eq!(controller.session().state(), SessionState::Idle);
    }

    #[test]
    fn idle_disconnect_writes_nothing() {
        let sim = SimInverter::new();
        let mut controller = connected(&sim);
        let before = sim.exchanges();
        controller.disconnect().expect("disconnect");
        assert_eq!(sim.exchanges(), before);
        assert!(!controller.is_connected());
    }
}
