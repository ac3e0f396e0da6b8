use chrono::Local;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{Axis, Block, BorderType, Borders, Chart, Dataset, Gauge, GraphType, Paragraph},
    Frame,
};

use crate::app::App;
use crate::events::MonitorEvent;
use crate::models::{SampleWindow, Windows};
use crate::theme::*;

/// Renders the header, both charts and the footer
pub fn render(frame: &mut Frame, app: &App) {
    // Main container with dark background
    let main_block = Block::default().style(Style::default().bg(DARK_BG));
    frame.render_widget(main_block, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Charts
            Constraint::Length(8), // Gauges and events
        ])
        .split(frame.area());

    render_header(frame, chunks[0], app);

    match app.monitor.windows() {
        Some(windows) => render_charts(frame, chunks[1], windows),
        None => render_idle(frame, chunks[1], app),
    }

    let footer = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[2]);

    render_gauges(frame, footer[0], app.monitor.windows());
    render_events(frame, footer[1], &app.events.snapshot());
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let glitch_char = if app.frame_count % 10 < 2 { "█" } else { " " };

    let (state, state_color) = if app.monitor.is_monitoring() {
        ("● MONITORING", NEON_GREEN)
    } else {
        ("○ IDLE", NEON_RED)
    };
    let counts = app
        .monitor
        .windows()
        .map(|w| format!("GPU {} │ MEM {}", w.gpu.len(), w.memory.len()))
        .unwrap_or_else(|| "no samples".to_string());

    let line = Line::from(vec![
        Span::styled(glitch_char, Style::default().fg(NEON_MAGENTA)),
        Span::styled(
            " GPU LOG MONITOR ",
            Style::default().fg(NEON_GREEN).add_modifier(Modifier::BOLD),
        ),
        Span::styled("│ ", Style::default().fg(NEON_GREEN)),
        Span::styled(
            format!("{}", Local::now().format("%H:%M:%S")),
            Style::default().fg(NEON_YELLOW),
        ),
        Span::styled(" │ ", Style::default().fg(NEON_GREEN)),
        Span::styled(
            state,
            Style::default().fg(state_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" every {}ms", app.monitor.settings().update_interval),
            Style::default().fg(NEON_CYAN),
        ),
        Span::styled(" │ ", Style::default().fg(NEON_GREEN)),
        Span::styled(counts, Style::default().fg(NEON_MAGENTA)),
        Span::styled(" │ ", Style::default().fg(NEON_GREEN)),
        Span::styled(
            "[s] start/stop  [c] clear  [q] quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(line)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Double)
                .border_style(Style::default().fg(NEON_GREEN)),
        )
        .style(Style::default().bg(DARK_BG))
        .alignment(Alignment::Left);
    frame.render_widget(header, area);
}

fn render_idle(frame: &mut Frame, area: Rect, app: &App) {
    let blink = if app.frame_count % 20 < 10 { "█" } else { " " };

    let detail = match &app.last_error {
        Some(err) => Span::styled(format!("      {err}"), Style::default().fg(NEON_RED)),
        None => Span::styled(
            "      Press s to start monitoring",
            Style::default().fg(Color::DarkGray),
        ),
    };

    let text = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("  [", Style::default().fg(NEON_RED)),
            Span::styled(
                "!",
                Style::default()
                    .fg(NEON_YELLOW)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled("] ", Style::default().fg(NEON_RED)),
            Span::styled(
                "MONITORING STOPPED",
                Style::default().fg(NEON_RED).add_modifier(Modifier::BOLD),
            ),
            Span::styled(blink, Style::default().fg(NEON_GREEN)),
        ]),
        Line::from(""),
        Line::from(vec![Span::styled(
            format!(
                "      gpu: {}   memory: {}",
                app.gpu_path.display(),
                app.memory_path.display()
            ),
            Style::default().fg(CYBER_BLUE),
        )]),
        Line::from(vec![detail]),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .border_style(Style::default().fg(NEON_RED))
        .style(Style::default().bg(DARK_BG));

    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn render_charts(frame: &mut Frame, area: Rect, windows: &Windows) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    // GPU chart, both lines in percent
    let util = points(&windows.gpu, |s| s.utilization);
    let gpu_mem = points(&windows.gpu, |s| s.memory);
    let gpu_chart = Chart::new(vec![
        line_dataset("util %", UTIL_LINE, &util),
        line_dataset("mem %", GPU_MEM_LINE, &gpu_mem),
    ])
    .block(chart_block(" ◇ GPU ", MATRIX_GREEN))
    .x_axis(time_axis(&windows.gpu, |s| s.timestamp.as_str()))
    .y_axis(
        Axis::default()
            .style(Style::default().fg(Color::DarkGray))
            .bounds([0.0, 100.0])
            .labels(vec![Span::raw("0"), Span::raw("50"), Span::raw("100")]),
    );
    frame.render_widget(gpu_chart, rows[0]);

    // Memory chart in MB
    let rss = points(&windows.memory, |s| s.usage);
    let vsz = points(&windows.memory, |s| s.virtual_usage);
    let top = rss
        .iter()
        .chain(vsz.iter())
        .map(|&(_, y)| y)
        .fold(1.0_f64, f64::max)
        * 1.1;
    let memory_chart = Chart::new(vec![
        line_dataset("rss MB", RSS_LINE, &rss),
        line_dataset("vsz MB", VSZ_LINE, &vsz),
    ])
    .block(chart_block(" ◇ MEMORY ", CYBER_BLUE))
    .x_axis(time_axis(&windows.memory, |s| s.timestamp.as_str()))
    .y_axis(
        Axis::default()
            .style(Style::default().fg(Color::DarkGray))
            .bounds([0.0, top])
            .labels(vec![
                Span::raw("0"),
                Span::raw(format!("{:.0}", top / 2.0)),
                Span::raw(format!("{:.0}", top)),
            ]),
    );
    frame.render_widget(memory_chart, rows[1]);
}

fn points<T>(window: &SampleWindow<T>, value: impl Fn(&T) -> f64) -> Vec<(f64, f64)> {
    window
        .iter()
        .enumerate()
        .map(|(i, sample)| (i as f64, value(sample)))
        .collect()
}

fn line_dataset<'a>(name: &'static str, color: Color, data: &'a [(f64, f64)]) -> Dataset<'a> {
    Dataset::default()
        .name(name)
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data)
}

fn chart_block(title: &'static str, border: Color) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border))
        .title(Span::styled(
            title,
            Style::default().fg(NEON_GREEN).add_modifier(Modifier::BOLD),
        ))
        .style(Style::default().bg(DARK_BG))
}

/// X axis spanning the whole window, labelled with the oldest and newest times.
fn time_axis<'a, T>(window: &'a SampleWindow<T>, timestamp: impl Fn(&'a T) -> &'a str) -> Axis<'a> {
    let first = window.iter().next().map(&timestamp).unwrap_or("");
    let last = window.latest().map(&timestamp).unwrap_or("");

    Axis::default()
        .style(Style::default().fg(Color::DarkGray))
        .bounds([0.0, window.capacity().saturating_sub(1).max(1) as f64])
        .labels(vec![Span::raw(first), Span::raw(last)])
}

fn render_gauges(frame: &mut Frame, area: Rect, windows: Option<&Windows>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(MATRIX_GREEN))
        .title(Span::styled(" ◆ LATEST ", Style::default().fg(NEON_GREEN)))
        .style(Style::default().bg(DARK_BG));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // GPU util bar
            Constraint::Length(1), // spacer
            Constraint::Length(1), // GPU memory bar
            Constraint::Length(1), // spacer
            Constraint::Length(2), // process memory
        ])
        .split(inner);

    let gpu = windows.and_then(|w| w.gpu.latest());
    let util = gpu.map_or(0.0, |s| s.utilization);
    let gpu_mem = gpu.map_or(0.0, |s| s.memory);

    frame.render_widget(percent_gauge("▓ GPU", util, load_color(util)), rows[0]);
    frame.render_widget(percent_gauge("▓ MEM", gpu_mem, NEON_MAGENTA), rows[2]);

    let process = match windows.and_then(|w| w.memory.latest()) {
        Some(s) => format!(
            "RSS {:.1} MB │ VSZ {:.1} MB │ {}",
            s.usage, s.virtual_usage, s.timestamp
        ),
        None => "RSS -- │ VSZ --".to_string(),
    };
    frame.render_widget(
        Paragraph::new(Span::styled(process, Style::default().fg(CYBER_BLUE))),
        rows[4],
    );
}

fn percent_gauge(label: &str, percent: f64, color: Color) -> Gauge<'static> {
    Gauge::default()
        .gauge_style(Style::default().fg(color).bg(GAUGE_BG))
        .ratio((percent / 100.0).clamp(0.0, 1.0))
        .label(Span::styled(
            format!("{label} {percent:5.1}%"),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_events(frame: &mut Frame, area: Rect, events: &[MonitorEvent]) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = events
        .iter()
        .skip(events.len().saturating_sub(visible))
        .map(|event| {
            let color = match event {
                MonitorEvent::TickFailed { .. } => NEON_RED,
                MonitorEvent::RowSkipped { .. } => NEON_YELLOW,
                _ => Color::Gray,
            };
            Line::from(Span::styled(event.to_string(), Style::default().fg(color)))
        })
        .collect();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(40, 80, 40)))
        .title(Span::styled(
            format!(" ◇ EVENTS ({}) ", events.len()),
            Style::default().fg(NEON_GREEN),
        ))
        .style(Style::default().bg(DARK_BG));

    frame.render_widget(Paragraph::new(lines).block(block), area);
}
