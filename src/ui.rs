use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Axis, Block, Borders, Chart, Clear, Dataset, Gauge, GraphType, Paragraph, Wrap,
};
use ratatui::{Frame, symbols};

use crate::app::AppState;
use crate::input::InputTarget;
use crate::interface::InterfaceMode;
use crate::session::{SessionState, format_hms};

pub fn render_ui(frame: &mut Frame, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0]);
    render_status(frame, chunks[1], app);
    render_speeds(frame, chunks[2], app);
    render_progress(frame, chunks[3], app);
    render_frequency_chart(frame, chunks[4], app);
    render_details(frame, chunks[5], app);
    render_message(frame, chunks[6], app);
    render_help(frame, chunks[7]);

    if let Some(target) = app.input {
        render_input_popup(frame, target, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![Span::styled(
        "TECO E510 Ball Mill",
        Style::default()
            .fg(Color::LightMagenta)
            .add_modifier(Modifier::BOLD),
    )]);

    let paragraph = Paragraph::new(title).alignment(Alignment::Center);
    frame.render_widget(paragraph, area);
}

fn state_style(state: SessionState) -> (&'static str, Style) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    match state {
        SessionState::Running => ("RUNNING", bold.fg(Color::Green)),
        SessionState::Paused => ("PAUSED", bold.fg(Color::Yellow)),
        SessionState::Stopped => ("COMPLETED", bold.fg(Color::LightCyan)),
        SessionState::Idle => ("STOPPED", bold.fg(Color::Red)),
    }
}

fn render_status(frame: &mut Frame, area: Rect, app: &AppState) {
    let (state_text, state_style) = state_style(app.state);
    let (link_text, link_style) = if app.connected {
        (
            app.port.clone().unwrap_or_default(),
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        (
            String::from("Disconnected"),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    };
    let mode_color = if app.interface == InterfaceMode::Simulation {
        Color::Yellow
    } else {
        Color::Blue
    };
    let label = Style::default().fg(Color::Gray);

    let line = Line::from(vec![
        Span::styled("State: ", label),
        Span::styled(state_text, state_style),
        Span::raw("  "),
        Span::styled("Link: ", label),
        Span::styled(link_text, link_style),
        Span::raw("  "),
        Span::styled("Mode: ", label),
        Span::styled(
            app.interface.label(),
            Style::default().fg(mode_color).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled("Rotation: ", label),
        Span::raw(app.direction.to_string()),
        Span::raw("  "),
        Span::styled("Milling time: ", label),
        Span::raw(format_hms(app.duration)),
        Span::raw("  "),
        Span::styled("Control: ", label),
        Span::raw(app.control.map_or("--", |mode| mode.label())),
    ]);

    let paragraph = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Status")
            .border_style(Style::default().fg(Color::LightMagenta)),
    );
    frame.render_widget(paragraph, area);
}

fn render_speeds(frame: &mut Frame, area: Rect, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(33),
            Constraint::Percentage(34),
        ])
        .split(area);

    let live = app.live;
    let limits = app.limits;
    render_speed_gauge(
        frame,
        chunks[0],
        "Vessel RPM",
        live.map(|q| f64::from(q.vessel_rpm)),
        limits.map(|q| f64::from(q.vessel_rpm)),
        0,
    );
    render_speed_gauge(
        frame,
        chunks[1],
        "Shaft RPM",
        live.map(|q| f64::from(q.shaft_rpm)),
        limits.map(|q| f64::from(q.shaft_rpm)),
        0,
    );
    render_speed_gauge(
        frame,
        chunks[2],
        "Frequency (Hz)",
        live.map(|q| q.frequency),
        limits.map(|q| q.frequency),
        1,
    );
}

fn render_speed_gauge(
    frame: &mut Frame,
    area: Rect,
    label: &str,
    value: Option<f64>,
    max: Option<f64>,
    decimals: usize,
) {
    let current = value.unwrap_or(0.0);
    let max = max.unwrap_or(0.0);
    let ratio = if max > 0.0 {
        (current / max).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let text = match value {
        Some(_) => format!("{current:.decimals$} / {max:.decimals$}"),
        None => String::from("--"),
    };
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(label)
                .border_style(Style::default().fg(Color::LightGreen)),
        )
        .gauge_style(Style::default().fg(Color::LightGreen))
        .ratio(ratio)
        .label(text);
    frame.render_widget(gauge, area);
}

fn render_progress(frame: &mut Frame, area: Rect, app: &AppState) {
    let (ratio, text) = app.progress.map_or_else(
        || (0.0, format!("00:00:00 / {}", format_hms(app.duration))),
        |progress| {
            (
                progress.ratio,
                format!(
                    "Elapsed {}  Remaining {}  {:.1}%",
                    format_hms(progress.elapsed),
                    format_hms(progress.remaining),
                    progress.ratio * 100.0
                ),
            )
        },
    );
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Milling Progress")
                .border_style(Style::default().fg(Color::LightYellow)),
        )
        .gauge_style(Style::default().fg(Color::LightYellow))
        .ratio(ratio)
        .label(text);
    frame.render_widget(gauge, area);
}

fn render_frequency_chart(frame: &mut Frame, area: Rect, app: &AppState) {
    let data: Vec<(f64, f64)> = app.frequency_history.iter().copied().collect();
    let (min_tick, max_tick) = chart_bounds(&data, area);
    let max_hz = app
        .nameplate
        .as_ref()
        .map_or(60.0, |nameplate| nameplate.frequency)
        .max(1.0);

    let datasets = vec![
        Dataset::default()
            .name("Hz")
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::LightCyan))
            .graph_type(GraphType::Line)
            .data(&data),
    ];

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Output Frequency (Hz)")
                .border_style(Style::default().fg(Color::LightCyan)),
        )
        .x_axis(
            Axis::default()
                .bounds([min_tick, max_tick])
                .labels(vec![Span::from("-"), Span::from("+")]),
        )
        .y_axis(
            Axis::default()
                .bounds([0.0, max_hz])
                .labels(vec![Span::from("0"), Span::from(format!("{max_hz:.0}"))]),
        );

    frame.render_widget(chart, area);
}

fn render_details(frame: &mut Frame, area: Rect, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let label = Style::default().fg(Color::Gray);
    let field = |name: &str, value: String| {
        Line::from(vec![Span::styled(format!("{name:<14}"), label), Span::raw(value)])
    };

    let mut drive = Vec::new();
    if let Some(identity) = &app.identity {
        drive.push(field("Model", identity.model.clone()));
        drive.push(field("Firmware", identity.firmware.clone()));
    }
    if let Some(plate) = &app.nameplate {
        drive.push(field(
            "Motor",
            format!(
                "{:.1} V  {:.1} A  {:.1} kW",
                plate.voltage, plate.current, plate.power
            ),
        ));
        drive.push(field(
            "Rating",
            format!(
                "{:.1} Hz  {} poles  {} rpm",
                plate.frequency, plate.poles, plate.speed_rpm
            ),
        ));
    }
    if let Some(geometry) = &app.geometry {
        drive.push(field(
            "Geometry",
            format!(
                "vessel {:.1} mm  shaft {:.1} mm",
                geometry.vessel_diameter_mm(),
                geometry.shaft_diameter_mm()
            ),
        ));
    }
    if let Some(setpoint) = &app.setpoint {
        drive.push(field(
            "Setpoint",
            format!(
                "{} / {} rpm  {:.1} Hz",
                setpoint.vessel_rpm, setpoint.shaft_rpm, setpoint.frequency
            ),
        ));
    }
    if drive.is_empty() {
        drive.push(Line::from("No drive connected"));
    }

    let mut live = Vec::new();
    if let Some(snapshot) = &app.snapshot {
        let flags = snapshot.flags;
        live.push(field(
            "Frequency",
            format!(
                "cmd {:.2} Hz  out {:.2} Hz",
                snapshot.command_frequency, snapshot.output_frequency
            ),
        ));
        live.push(field(
            "Voltage",
            format!(
                "{:.1} V  DC bus {} V",
                snapshot.output_voltage, snapshot.dc_bus_voltage
            ),
        ));
        live.push(field("Current", format!("{:.1} A", snapshot.output_current)));
        live.push(field(
            "Temp/Torque",
            format!("{:.1} C  {} %", snapshot.temperature, snapshot.output_torque),
        ));
        live.push(field(
            "Flags",
            format!(
                "{}{}{}{}",
                if flags.ready { "READY " } else { "" },
                if flags.running { "RUN " } else { "" },
                if flags.fault { "FAULT " } else { "" },
                flags.direction(),
            ),
        ));
    } else {
        live.push(Line::from("No status data yet"));
    }

    frame.render_widget(
        Paragraph::new(drive).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Drive")
                .border_style(Style::default().fg(Color::LightMagenta)),
        ),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(live).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Inverter Status")
                .border_style(Style::default().fg(Color::LightGreen)),
        ),
        chunks[1],
    );
}

fn render_message(frame: &mut Frame, area: Rect, app: &AppState) {
    let style = if app.message_is_error {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };
    let paragraph = Paragraph::new(Line::from(Span::styled(app.message.as_str(), style)))
        .block(Block::default().borders(Borders::ALL).title("Message"));
    frame.render_widget(paragraph, area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let keys = [
        ("r", " run  "),
        ("p", " pause/restart  "),
        ("s", " stop  "),
        ("d", " direction  "),
        ("v/h/f", " vessel/shaft/Hz  "),
        ("t", " time  "),
        ("g", " geometry  "),
        ("c", " connect  "),
        ("q", " quit"),
    ];
    let spans: Vec<Span> = keys
        .iter()
        .flat_map(|(key, text)| {
            [
                Span::styled(*key, Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(*text),
            ]
        })
        .collect();
    let paragraph = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Controls")
                .border_style(Style::default().fg(Color::LightMagenta)),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}

fn render_input_popup(frame: &mut Frame, target: InputTarget, app: &AppState) {
    let area = centered_rect(60, 20, frame.area());
    let buffer = if app.input_buffer.is_empty() {
        "_".to_string()
    } else {
        app.input_buffer.clone()
    };

    let content = vec![
        Line::from(Span::styled(
            format!("Type {}", target.title().to_lowercase()),
            Style::default()
                .fg(Color::LightCyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("Value: ", Style::default().fg(Color::Gray)),
            Span::styled(
                buffer,
                Style::default()
                    .fg(Color::LightYellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(target.unit()),
        ]),
        Line::from(""),
        Line::from("Enter to apply, Esc to cancel"),
    ];

    frame.render_widget(Clear, area);
    let paragraph = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .title(target.title())
            .border_style(Style::default().fg(Color::LightMagenta)),
    );
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn chart_bounds(data: &[(f64, f64)], area: Rect) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 1.0);
    }
    let max_tick = data.last().map_or(0.0, |(x, _)| *x).max(1.0);
    let window = area.width.saturating_sub(2).max(1) as usize;
    let window_ticks = u32::try_from(window.min(data.len()))
        .ok()
        .map_or(f64::from(u32::MAX), f64::from);
    let min_tick = (max_tick - window_ticks).max(0.0);
    (min_tick, max_tick)
}
