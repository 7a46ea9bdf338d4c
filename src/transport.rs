use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::eyre;
use tracing::{debug, warn};

use crate::backend::candidate_ports;
use crate::controller::{Controller, PollReport};
use crate::conversion::{ControlMode, DerivedQuantities, MillGeometry};
use crate::data::{Identity, MotorNameplate, Rotation};
use crate::error::TransportError;
use crate::interface::InterfaceMode;
use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// Connect to the given port, or discover one when `None`.
    Connect(Option<String>),
    Disconnect,
    SetControl(ControlMode),
    SetDirection(Rotation),
    SetDuration { hours: u32, minutes: u32 },
    SetGeometry { vessel_mm: f64, shaft_mm: f64 },
    Run,
    /// Pause a running session, or restart a paused one.
    TogglePause,
    Stop,
    Terminate,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Connected {
        port: String,
        identity: Identity,
        nameplate: MotorNameplate,
        limits: Option<DerivedQuantities>,
    },
    Disconnected,
    Poll(PollReport),
    /// The poll failed; the session was left as it was.
    PollFailed(String),
    Setpoint(DerivedQuantities),
    Session {
        state: SessionState,
        direction: Rotation,
        duration: Duration,
        control: Option<ControlMode>,
        geometry: MillGeometry,
        limits: Option<DerivedQuantities>,
    },
    Notice(String),
    Failed(String),
}

/// Lists the ports discovery should try, in order.
pub type PortLister = fn(InterfaceMode) -> Result<Vec<String>, TransportError>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub port: Option<String>,
    pub interface: InterfaceMode,
    /// Called on every discovery, so adapters plugged in later are seen.
    pub list_ports: PortLister,
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn new(port: Option<String>, interface: InterfaceMode, poll_interval: Duration) -> Self {
        Self {
            port,
            interface,
            list_ports: candidate_ports,
            poll_interval,
        }
    }
}

pub fn spawn_worker(
    config: WorkerConfig,
    controller: Controller,
    command_rx: Receiver<WorkerCommand>,
    event_tx: Sender<WorkerEvent>,
) -> thread::JoinHandle<eyre::Result<()>> {
    thread::spawn(move || run_worker_loop(&config, controller, &command_rx, &event_tx))
}

/// Owns the controller, so a command and a poll can never share the bus.
/// Commands are served between ticks; the tick deadline is kept regardless.
fn run_worker_loop(
    config: &WorkerConfig,
    mut controller: Controller,
    command_rx: &Receiver<WorkerCommand>,
    event_tx: &Sender<WorkerEvent>,
) -> eyre::Result<()> {
    let initial = WorkerCommand::Connect(config.port.clone());
    apply_command(config, &mut controller, initial, event_tx);

    let mut next_poll = Instant::now() + config.poll_interval;
    loop {
        let wait = next_poll.saturating_duration_since(Instant::now());
        match command_rx.recv_timeout(wait) {
            Ok(WorkerCommand::Terminate) => break,
            Ok(command) => apply_command(config, &mut controller, command, event_tx),
            Err(RecvTimeoutError::Timeout) => {
                next_poll += config.poll_interval;
                if Instant::now() > next_poll {
                    // a slow exchange overran the cadence; skip missed ticks
                    next_poll = Instant::now() + config.poll_interval;
                }
                poll(&mut controller, event_tx);
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(eyre::eyre!("command channel closed"));
            }
        }
    }

    if let Err(err) = controller.disconnect() {
        warn!(error = %err, "mill may still be running at exit");
    }
    Ok(())
}

fn poll(controller: &mut Controller, event_tx: &Sender<WorkerEvent>) {
    if !controller.is_connected() {
        return;
    }
    match controller.poll_once(Instant::now()) {
        Ok(report) => {
            let completed = report.completed;
            event_tx.send(WorkerEvent::Poll(report)).ok();
            if completed {
                event_tx
                    .send(WorkerEvent::Notice(String::from(
                        "STOPPED. Milling process completed.",
                    )))
                    .ok();
                send_session(controller, event_tx);
            }
        }
        Err(err) => {
            warn!(error = %err, "status poll failed");
            event_tx.send(WorkerEvent::PollFailed(err.to_string())).ok();
        }
    }
}

fn apply_command(
    config: &WorkerConfig,
    controller: &mut Controller,
    command: WorkerCommand,
    event_tx: &Sender<WorkerEvent>,
) {
    debug!(?command, "worker command");
    let now = Instant::now();
    let result = match command {
        WorkerCommand::Connect(port) => {
            let connected = match port {
                Some(port) => controller
                    .connect(&port)
                    .map(|_| port)
                    .map_err(|err| err.to_string()),
                None => (config.list_ports)(config.interface)
                    .map_err(|err| format!("enumerate serial ports: {err}"))
                    .and_then(|ports| {
                        controller
                            .discover(&ports)
                            .map_err(|err| err.to_string())
                    }),
            };
            match connected {
                Ok(_) => {
                    send_connected(controller, event_tx);
                    Ok(String::from("Connected. Motor stopped."))
                }
                Err(message) => {
                    if !controller.is_connected() {
                        event_tx.send(WorkerEvent::Disconnected).ok();
                    }
                    Err(message)
                }
            }
        }
        WorkerCommand::Disconnect => match controller.disconnect() {
            Ok(()) => {
                event_tx.send(WorkerEvent::Disconnected).ok();
                Ok(String::from("Disconnected. No active communication."))
            }
            Err(err) => Err(format!("Still connected, stop not confirmed: {err}")),
        },
        WorkerCommand::SetControl(mode) => match controller.set_control_mode(mode) {
            Ok(derived) => {
                event_tx.send(WorkerEvent::Setpoint(derived)).ok();
                Ok(format!("Drive frequency set to {:.1} Hz", derived.frequency))
            }
            Err(err) => Err(err.to_string()),
        },
        WorkerCommand::SetDirection(direction) => controller
            .set_direction(direction)
            .map(|()| format!("Rotation: {direction}"))
            .map_err(|err| err.to_string()),
        WorkerCommand::SetDuration { hours, minutes } => controller
            .set_duration(hours, minutes)
            .map(|()| format!("Milling time set to {hours:02}:{minutes:02}"))
            .map_err(|err| err.to_string()),
        WorkerCommand::SetGeometry {
            vessel_mm,
            shaft_mm,
        } => controller
            .set_geometry(vessel_mm, shaft_mm)
            .map(|()| format!("Geometry: vessel {vessel_mm} mm, shaft {shaft_mm} mm"))
            .map_err(|err| err.to_string()),
        WorkerCommand::Run => {
            let direction = controller.session().direction();
            controller
                .run(direction, now)
                .map(|()| format!("RUNNING. Rotation: {direction}"))
                .map_err(|err| err.to_string())
        }
        WorkerCommand::TogglePause => {
            if controller.session().state() == SessionState::Paused {
                controller
                    .restart(now)
                    .map(|()| String::from("RUNNING. Motor restarted after pause."))
            } else {
                controller
                    .pause(now)
                    .map(|()| String::from("PAUSED. Motor stopped, press p to restart."))
            }
            .map_err(|err| err.to_string())
        }
        WorkerCommand::Stop => controller
            .stop()
            .map(|()| String::from("STOPPED. Motor stopped."))
            .map_err(|err| err.to_string()),
        WorkerCommand::Terminate => Ok(String::new()),
    };

    match result {
        Ok(message) => {
            event_tx.send(WorkerEvent::Notice(message)).ok();
        }
        Err(message) => {
            warn!(%message, "command failed");
            event_tx.send(WorkerEvent::Failed(message)).ok();
        }
    }
    send_session(controller, event_tx);
}

fn send_connected(controller: &Controller, event_tx: &Sender<WorkerEvent>) {
    if let (Some(port), Some(identity), Some(nameplate)) =
        (controller.port(), controller.identity(), controller.nameplate())
    {
        event_tx
            .send(WorkerEvent::Connected {
                port: port.to_string(),
                identity: identity.clone(),
                nameplate: nameplate.clone(),
                limits: controller.limits(),
            })
            .ok();
    }
}

fn send_session(controller: &Controller, event_tx: &Sender<WorkerEvent>) {
    let session = controller.session();
    event_tx
        .send(WorkerEvent::Session {
            state: session.state(),
            direction: session.direction(),
            duration: session.duration(),
            control: controller.control_mode(),
            geometry: *controller.geometry(),
            limits: controller.limits(),
        })
        .ok();
}
