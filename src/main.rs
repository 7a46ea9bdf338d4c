mod app;
mod backend;
mod controller;
mod conversion;
mod data;
mod error;
mod input;
mod interface;
mod inverter;
mod registers;
mod rtu;
mod session;
mod transport;
mod ui;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, mpsc};
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use crossterm::event::{self, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::AppState;
use backend::LinkConnector;
use controller::Controller;
use conversion::MillGeometry;
use input::handle_key_event;
use interface::InterfaceMode;
use transport::{WorkerCommand, WorkerConfig, spawn_worker};
use ui::render_ui;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "TECO E510 ball mill controller")]
struct Args {
    /// Serial port path (e.g. /dev/ttyUSB0); discovered when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Register transport
    #[arg(short = 'I', long, value_enum, default_value_t = InterfaceMode::Rs485)]
    interface: InterfaceMode,

    /// Modbus slave address of the inverter
    #[arg(short, long, default_value_t = registers::DEFAULT_SLAVE_ADDRESS)]
    address: u8,

    /// Poll interval in milliseconds
    #[arg(short = 'i', long, default_value_t = 200)]
    poll_interval: u64,

    /// Per-exchange timeout in milliseconds
    #[arg(short, long, default_value_t = 300)]
    timeout: u64,

    /// Vessel diameter in millimetres
    #[arg(long, default_value_t = 220.0)]
    vessel_diameter: f64,

    /// Drive shaft diameter in millimetres
    #[arg(long, default_value_t = 45.4)]
    shaft_diameter: f64,

    /// Milling time, hours part
    #[arg(long, default_value_t = 2)]
    hours: u32,

    /// Milling time, minutes part
    #[arg(long, default_value_t = 0)]
    minutes: u32,

    /// Write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct RuntimeArgs {
    interface: InterfaceMode,
    address: u8,
    timeout: Duration,
    geometry: MillGeometry,
    duration: Duration,
    worker: WorkerConfig,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    if let Some(path) = &args.log_file {
        init_logging(path)?;
    }
    let runtime = resolve_runtime_args(&args)?;
    info!(interface = ?runtime.interface, port = ?runtime.worker.port, "starting");

    let connector = LinkConnector::new(runtime.interface, runtime.timeout);
    let controller = Controller::new(
        Box::new(connector),
        runtime.address,
        runtime.geometry,
        runtime.duration,
    );

    enable_raw_mode().wrap_err("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).wrap_err("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (command_tx, command_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();

    let port = runtime.worker.port.clone();
    let worker_handle = spawn_worker(runtime.worker, controller, command_rx, event_tx);

    let tick_rate = Duration::from_millis(100);
    let mut app = AppState::new(runtime.interface, port, runtime.duration);
    let mut exit_error: Option<eyre::Report> = None;

    loop {
        terminal.draw(|frame| render_ui(frame, &app))?;

        if event::poll(tick_rate)?
            && let Event::Key(key) = event::read()?
            && handle_key_event(key.code, &mut app, &command_tx)?
        {
            break;
        }

        loop {
            match event_rx.try_recv() {
                Ok(event) => app.apply_event(event),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    exit_error = Some(eyre::eyre!("worker thread disconnected"));
                    app.should_quit = true;
                    break;
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    command_tx.send(WorkerCommand::Terminate).ok();
    if let Ok(Err(err)) = worker_handle.join()
        && exit_error.is_none()
    {
        exit_error = Some(err.wrap_err("worker failed"));
    }

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    if let Some(err) = exit_error {
        return Err(err);
    }

    Ok(())
}

/// The terminal owns stdout, so logs only go to a file.
fn init_logging(path: &Path) -> eyre::Result<()> {
    let file = File::create(path).wrap_err_with(|| format!("create log file {}", path.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|err| eyre::eyre!("install log subscriber: {err}"))
}

fn resolve_runtime_args(args: &Args) -> eyre::Result<RuntimeArgs> {
    let geometry = MillGeometry::new(args.vessel_diameter, args.shaft_diameter)
        .wrap_err("invalid mill geometry")?;
    if args.minutes >= 60 {
        return Err(eyre::eyre!("minutes must be below 60, got {}", args.minutes));
    }
    let duration = Duration::from_secs(u64::from(args.hours) * 3600 + u64::from(args.minutes) * 60);
    if duration.is_zero() {
        return Err(eyre::eyre!("milling time must be longer than zero"));
    }
    if args.poll_interval == 0 {
        return Err(eyre::eyre!("poll interval must be longer than zero"));
    }

    let port = match args.interface {
        InterfaceMode::Simulation => Some(args.port.clone().unwrap_or_else(|| String::from("sim"))),
        _ => args.port.clone(),
    };

    Ok(RuntimeArgs {
        interface: args.interface,
        address: args.address,
        timeout: Duration::from_millis(args.timeout),
        geometry,
        duration,
        worker: WorkerConfig::new(
            port,
            args.interface,
            Duration::from_millis(args.poll_interval),
        ),
    })
}
