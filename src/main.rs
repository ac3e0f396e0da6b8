use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gpu_log_monitor::app::App;
use gpu_log_monitor::config::{Overrides, Settings};
use gpu_log_monitor::{serve, ui};

#[derive(Parser, Debug)]
#[command(
    name = "gpu-log-monitor",
    version,
    about = "Live charts for GPU and process memory CSV logs"
)]
struct Cli {
    /// JSON settings file (updateInterval, maxDataPoints, backfillBytes)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Polling interval in milliseconds
    #[arg(long, global = true)]
    update_interval: Option<u64>,

    /// Samples kept per chart
    #[arg(long, global = true)]
    max_data_points: Option<usize>,

    /// Bytes replayed from the end of each log on start
    #[arg(long, global = true)]
    backfill_bytes: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chart two logs in the terminal
    Watch {
        /// CSV with Timestamp, GPU_Utilization, Memory_Used, Memory_Total
        gpu: PathBuf,
        /// CSV with Timestamp, RSS_KB, VSZ_KB
        memory: PathBuf,
        /// Write logs here; the terminal is busy with the charts
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Answer panel requests as JSON lines on stdin/stdout
    Serve,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gpu_log_monitor=info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = Overrides {
        update_interval: cli.update_interval,
        max_data_points: cli.max_data_points,
        backfill_bytes: cli.backfill_bytes,
    };
    let settings =
        Settings::load(cli.config.as_deref(), &overrides).context("invalid configuration")?;

    match cli.command {
        Command::Serve => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter())
                .init();
            serve::run(settings).await
        }
        Command::Watch {
            gpu,
            memory,
            log_file,
        } => {
            if let Some(path) = log_file {
                let file = File::create(&path)
                    .with_context(|| format!("failed to create log file {}", path.display()))?;
                tracing_subscriber::registry()
                    .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
                    .with(filter())
                    .init();
            }
            watch(App::new(settings, gpu, memory)).await
        }
    }
}

async fn watch(mut app: App) -> Result<()> {
    // a bad path is reported on screen, not fatal.
    let _ = app.start();

    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(
        io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;

    let result = run_loop(&mut terminal, &mut app).await;

    crossterm::execute!(
        io::stdout(),
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::event::DisableMouseCapture
    )?;
    crossterm::terminal::disable_raw_mode()?;

    info!(in_flight = app.reads_in_flight(), "dashboard closed");
    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        app.schedule_reads();
        app.collect_reads().await;

        app.tick();
        terminal.draw(|f| ui::render(f, app))?;

        if crossterm::event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char('s') => app.toggle(),
                        KeyCode::Char('c') => app.events.clear(),
                        _ => {}
                    }
                }
            }
        }
    }

    Ok(())
}
