use std::io;
use std::path::PathBuf;

use tokio::task::JoinHandle;
use tracing::error;

use crate::clock::SystemClock;
use crate::config::Settings;
use crate::events::{RecentEvents, TracingSink};
use crate::monitor::{Monitor, MonitorError, TailJob, TailResult};
use crate::tail::LocalFs;

/// Events kept for the dashboard's log pane.
const EVENT_HISTORY: usize = 200;

pub type LiveMonitor = Monitor<LocalFs, SystemClock, (TracingSink, RecentEvents)>;

/// Main application state
pub struct App {
    pub monitor: LiveMonitor,
    pub events: RecentEvents,
    pub gpu_path: PathBuf,
    pub memory_path: PathBuf,
    /// Why the last start attempt failed, shown until the next one.
    pub last_error: Option<String>,
    pub frame_count: u64,
    reads: Vec<(TailJob, JoinHandle<TailResult>)>,
}

impl App {
    pub fn new(settings: Settings, gpu_path: PathBuf, memory_path: PathBuf) -> Self {
        let events = RecentEvents::new(EVENT_HISTORY);
        let monitor = Monitor::new(
            LocalFs,
            SystemClock,
            (TracingSink, events.clone()),
            settings,
        );
        App {
            monitor,
            events,
            gpu_path,
            memory_path,
            last_error: None,
            frame_count: 0,
            reads: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<(), MonitorError> {
        let result = self
            .monitor
            .start(self.gpu_path.clone(), self.memory_path.clone());
        self.last_error = result.as_ref().err().map(ToString::to_string);
        result.map(drop)
    }

    pub fn stop(&mut self) {
        self.monitor.stop();
    }

    /// Starts monitoring if idle, stops it otherwise.
    pub fn toggle(&mut self) {
        if self.monitor.is_monitoring() {
            self.stop();
        } else if let Err(err) = self.start() {
            error!(%err, "failed to start monitoring");
        }
    }

    /// Hands due reads to the blocking pool.
    pub fn schedule_reads(&mut self) {
        if !self.monitor.due() {
            return;
        }
        for job in self.monitor.plan_tick() {
            let fs = *self.monitor.fs();
            let task = job.clone();
            let handle = tokio::task::spawn_blocking(move || task.run(&fs));
            self.reads.push((job, handle));
        }
    }

    /// Feeds finished reads back into the monitor.
    pub async fn collect_reads(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.reads)
            .into_iter()
            .partition(|(_, handle)| handle.is_finished());
        self.reads = running;

        for (job, handle) in finished {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => job.fail(io::Error::other(err)),
            };
            self.monitor.complete(result);
        }
    }

    pub fn reads_in_flight(&self) -> usize {
        self.reads.len()
    }

    /// Increment frame counter
    pub fn tick(&mut self) {
        self.frame_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MonitorEvent;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;

    fn app(dir: &Path) -> App {
        let gpu = dir.join("gpu_stats.csv");
        let memory = dir.join("memory_stats.csv");
        fs::write(&gpu, "Timestamp,GPU_Utilization,Memory_Used,Memory_Total\n").unwrap();
        fs::write(&memory, "Timestamp,RSS_KB,VSZ_KB\n").unwrap();
        let settings = Settings {
            update_interval: 1,
            ..Settings::default()
        };
        App::new(settings, gpu, memory)
    }

    fn append(path: &Path, contents: &str) {
        OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(contents.as_bytes()))
            .unwrap();
    }

    /// Collects until every scheduled read has been fed back.
    async fn drain(app: &mut App) {
        for _ in 0..400 {
            app.collect_reads().await;
            if app.reads_in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("reads never finished");
    }

    #[tokio::test]
    async fn one_tick_through_the_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        app.start().unwrap();
        assert!(app.last_error.is_none());

        append(&app.gpu_path, "2024-01-15 10:00:01,40,2,8\n");
        append(&app.memory_path, "2024-01-15 10:00:01,1024,2048\n");
        tokio::time::sleep(Duration::from_millis(10)).await;

        app.schedule_reads();
        assert_eq!(app.reads_in_flight(), 2);
        drain(&mut app).await;

        let windows = app.monitor.windows().unwrap();
        assert_eq!(windows.gpu.latest().unwrap().utilization, 40.0);
        assert_eq!(windows.gpu.latest().unwrap().memory, 25.0);
        assert_eq!(windows.memory.latest().unwrap().usage, 1.0);
    }

    #[tokio::test]
    async fn reads_finishing_after_stop_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        app.start().unwrap();

        append(&app.gpu_path, "2024-01-15 10:00:01,40,2,8\n");
        tokio::time::sleep(Duration::from_millis(10)).await;
        app.schedule_reads();
        app.toggle();
        drain(&mut app).await;

        assert!(!app.monitor.is_monitoring());
        assert!(app.monitor.windows().is_none());
        let discarded = app
            .events
            .snapshot()
            .iter()
            .filter(|e| matches!(e, MonitorEvent::StaleResultDiscarded { .. }))
            .count();
        assert_eq!(discarded, 2);
    }

    #[tokio::test]
    async fn start_failure_is_kept_for_the_screen() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        fs::remove_file(&app.memory_path).unwrap();

        assert!(app.start().is_err());
        assert!(app.last_error.as_deref().unwrap().contains("memory_stats.csv"));

        app.schedule_reads();
        assert_eq!(app.reads_in_flight(), 0);
    }
}
