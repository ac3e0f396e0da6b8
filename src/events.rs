//! Where the monitor reports what happened.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::models::SeriesKind;

#[derive(Clone, Debug, PartialEq)]
pub enum MonitorEvent {
    Started { gpu: PathBuf, memory: PathBuf },
    Reused,
    Stopped,
    /// A session began part-way into a large log.
    Backfilled { kind: SeriesKind, from: u64 },
    RowSkipped {
        kind: SeriesKind,
        row: usize,
        line: String,
        reason: String,
    },
    TickFailed { kind: SeriesKind, error: String },
    StaleResultDiscarded { kind: SeriesKind },
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorEvent::Started { gpu, memory } => write!(
                f,
                "monitoring started ({}, {})",
                gpu.display(),
                memory.display()
            ),
            MonitorEvent::Reused => f.write_str("already monitoring, reusing session"),
            MonitorEvent::Stopped => f.write_str("monitoring stopped"),
            MonitorEvent::Backfilled { kind, from } => {
                write!(f, "{kind}: replaying log from byte {from}")
            }
            MonitorEvent::RowSkipped {
                kind, row, reason, ..
            } => write!(f, "{kind}: skipped row {row}: {reason}"),
            MonitorEvent::TickFailed { kind, error } => write!(f, "{kind}: read failed: {error}"),
            MonitorEvent::StaleResultDiscarded { kind } => {
                write!(f, "{kind}: discarded read from an ended session")
            }
        }
    }
}

pub trait EventSink {
    fn record(&self, event: &MonitorEvent);
}

/// Drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _: &MonitorEvent) {}
}

/// Forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::Started { .. } | MonitorEvent::Stopped | MonitorEvent::Reused => {
                info!("{event}")
            }
            MonitorEvent::Backfilled { .. } | MonitorEvent::StaleResultDiscarded { .. } => {
                debug!("{event}")
            }
            MonitorEvent::RowSkipped { line, .. } => warn!(line = %line, "{event}"),
            MonitorEvent::TickFailed { .. } => warn!("{event}"),
        }
    }
}

/// Keeps the last few events around for display.
#[derive(Clone, Debug)]
pub struct RecentEvents {
    capacity: usize,
    events: Arc<Mutex<VecDeque<MonitorEvent>>>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub fn snapshot(&self) -> Vec<MonitorEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<MonitorEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for RecentEvents {
    fn record(&self, event: &MonitorEvent) {
        let mut events = self.lock();
        events.push_back(event.clone());
        while events.len() > self.capacity {
            events.pop_front();
        }
    }
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn record(&self, event: &MonitorEvent) {
        self.0.record(event);
        self.1.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_events_are_bounded() {
        let recent = RecentEvents::new(2);
        recent.record(&MonitorEvent::Reused);
        recent.record(&MonitorEvent::Stopped);
        recent.record(&MonitorEvent::Reused);
        assert_eq!(
            recent.snapshot(),
            vec![MonitorEvent::Stopped, MonitorEvent::Reused]
        );
    }

    #[test]
    fn pairs_fan_out() {
        let (a, b) = (RecentEvents::new(4), RecentEvents::new(4));
        (a.clone(), b.clone()).record(&MonitorEvent::Stopped);
        assert_eq!(a.snapshot().len(), 1);
        assert_eq!(b.snapshot().len(), 1);
    }

    #[test]
    fn skipped_rows_name_the_row() {
        let event = MonitorEvent::RowSkipped {
            kind: SeriesKind::Gpu,
            row: 5,
            line: "x".into(),
            reason: "missing required field Timestamp".into(),
        };
        assert_eq!(
            event.to_string(),
            "gpu: skipped row 5: missing required field Timestamp"
        );
    }
}
