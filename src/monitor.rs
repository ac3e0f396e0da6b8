//! The polling loop's state machine.
//!
//! A [`Monitor`] is either idle or running one session over a pair of logs.
//! Reads are split into a plan step and a completion step so the read
//! itself can run elsewhere; completions from an ended session are dropped.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::debug;

use crate::clock::Clock;
use crate::config::Settings;
use crate::events::{EventSink, MonitorEvent};
use crate::models::{Sample, SeriesKind, Windows};
use crate::tail::{self, FileSystem, HeaderLine, TailChunk, TailError};
use crate::transform::{self, Batch, Header, Schema};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{kind} stats file not found: {}", path.display())]
    FileNotFound { kind: SeriesKind, path: PathBuf },

    #[error("failed to read {kind} stats file: {source}")]
    Read {
        kind: SeriesKind,
        #[source]
        source: TailError,
    },
}

impl MonitorError {
    fn from_tail(kind: SeriesKind, source: TailError) -> Self {
        match source {
            TailError::NotFound(path) => MonitorError::FileNotFound { kind, path },
            source => MonitorError::Read { kind, source },
        }
    }
}

/// New samples for one series.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub kind: SeriesKind,
    pub samples: Vec<Sample>,
    pub last_position: u64,
}

#[derive(Debug, PartialEq)]
pub enum StartOutcome {
    /// A new session, with whatever the first read produced.
    Started(Vec<Update>),
    Reused,
}

/// A pending read for one path.
#[derive(Clone, Debug)]
pub struct TailJob {
    session: u64,
    pub kind: SeriesKind,
    pub path: PathBuf,
    pub position: u64,
}

impl TailJob {
    pub fn run<F: FileSystem + ?Sized>(self, fs: &F) -> TailResult {
        let outcome = tail::read(fs, &self.path, self.position);
        TailResult {
            session: self.session,
            kind: self.kind,
            outcome,
        }
    }

    /// The result for a read that never got to run.
    pub fn fail(self, source: io::Error) -> TailResult {
        TailResult {
            session: self.session,
            kind: self.kind,
            outcome: Err(TailError::Io {
                path: self.path,
                source,
            }),
        }
    }
}

#[derive(Debug)]
pub struct TailResult {
    session: u64,
    pub kind: SeriesKind,
    pub outcome: Result<TailChunk, TailError>,
}

/// The first read of a log in a session.
#[derive(Clone, Debug, Default)]
pub struct InitialRead {
    pub header: Option<HeaderLine>,
    /// Data bytes only, starting at a line boundary.
    pub chunk: TailChunk,
    /// Set when older data was skipped.
    pub backfilled_from: Option<u64>,
    /// The line cut by the backfill boundary is still being written.
    pub open_line: bool,
}

/// Reads the header and at most `backfill` trailing bytes of a log.
///
/// A line cut by the backfill boundary is dropped.
pub fn read_initial<F: FileSystem + ?Sized>(
    fs: &F,
    path: &Path,
    backfill: u64,
) -> Result<InitialRead, TailError> {
    let Some(header) = tail::read_header(fs, path)? else {
        // not even a full header yet: the next read starts from scratch.
        return Ok(InitialRead::default());
    };

    let seed = tail::seed(fs, path, backfill)?.max(header.end);
    let aligned = tail::read_aligned(fs, path, seed, header.end)?;

    let backfilled_from = (seed > header.end).then_some(seed);
    Ok(InitialRead {
        header: Some(header),
        chunk: aligned.chunk,
        backfilled_from,
        open_line: aligned.open_line,
    })
}

#[derive(Debug)]
struct Tail {
    kind: SeriesKind,
    path: PathBuf,
    position: u64,
    header: Option<Header>,
    /// Trailing bytes of the last read that did not end a line yet.
    pending: Vec<u8>,
    /// Drop bytes up to the next newline before parsing.
    skip_line: bool,
    in_flight: bool,
}

impl Tail {
    fn new(kind: SeriesKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            position: 0,
            header: None,
            pending: Vec::new(),
            skip_line: false,
            in_flight: false,
        }
    }

    /// Takes in bytes that end at `end` and parses every completed line.
    fn absorb(&mut self, mut bytes: &[u8], end: u64) -> Batch {
        debug_assert!(end >= self.position, "tail position moved backwards");
        self.position = self.position.max(end);

        if self.skip_line {
            let Some(newline) = bytes.iter().position(|&b| b == b'\n') else {
                return Batch::default();
            };
            bytes = &bytes[newline + 1..];
            self.skip_line = false;
        }
        self.pending.extend_from_slice(bytes);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Batch::default();
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        let text = String::from_utf8_lossy(&complete);
        let schema = Schema::from(self.kind);

        match &self.header {
            Some(header) => transform::parse_rows(&text, header, schema),
            None => match transform::parse_document(&text, schema) {
                Some((header, batch)) => {
                    self.header = Some(header);
                    batch
                }
                None => Batch::default(),
            },
        }
    }
}

#[derive(Debug)]
struct Session {
    id: u64,
    last_tick: Instant,
    gpu: Tail,
    memory: Tail,
    windows: Windows,
}

impl Session {
    fn tail_mut(&mut self, kind: SeriesKind) -> &mut Tail {
        match kind {
            SeriesKind::Gpu => &mut self.gpu,
            SeriesKind::Memory => &mut self.memory,
        }
    }

    fn tail(&self, kind: SeriesKind) -> &Tail {
        match kind {
            SeriesKind::Gpu => &self.gpu,
            SeriesKind::Memory => &self.memory,
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Monitoring(Session),
}

pub struct Monitor<F, C, S> {
    fs: F,
    clock: C,
    sink: S,
    settings: Settings,
    state: State,
    sessions: u64,
}

impl<F: FileSystem, C: Clock, S: EventSink> Monitor<F, C, S> {
    pub fn new(fs: F, clock: C, sink: S, settings: Settings) -> Self {
        Self {
            fs,
            clock,
            sink,
            settings,
            state: State::Idle,
            sessions: 0,
        }
    }

    /// Opens a session over both logs and reads what they already hold.
    pub fn start(
        &mut self,
        gpu_path: impl Into<PathBuf>,
        memory_path: impl Into<PathBuf>,
    ) -> Result<StartOutcome, MonitorError> {
        if self.is_monitoring() {
            self.sink.record(&MonitorEvent::Reused);
            return Ok(StartOutcome::Reused);
        }

        let mut gpu = Tail::new(SeriesKind::Gpu, gpu_path.into());
        let mut memory = Tail::new(SeriesKind::Memory, memory_path.into());
        for tail in [&gpu, &memory] {
            self.fs
                .size(&tail.path)
                .map_err(|e| MonitorError::from_tail(tail.kind, e))?;
        }

        let mut windows = Windows::new(self.settings.max_data_points);
        let mut updates = Vec::with_capacity(2);
        for tail in [&mut gpu, &mut memory] {
            let initial = read_initial(&self.fs, &tail.path, self.settings.backfill_bytes)
                .map_err(|e| MonitorError::from_tail(tail.kind, e))?;
            updates.push(self.open(tail, initial, &mut windows));
        }

        self.sessions += 1;
        self.sink.record(&MonitorEvent::Started {
            gpu: gpu.path.clone(),
            memory: memory.path.clone(),
        });
        self.state = State::Monitoring(Session {
            id: self.sessions,
            last_tick: self.clock.now(),
            gpu,
            memory,
            windows,
        });

        Ok(StartOutcome::Started(updates))
    }

    fn open(&self, tail: &mut Tail, initial: InitialRead, windows: &mut Windows) -> Update {
        if let Some(from) = initial.backfilled_from {
            self.sink.record(&MonitorEvent::Backfilled {
                kind: tail.kind,
                from,
            });
        }

        tail.header = initial.header.as_ref().map(|h| Header::parse(&h.line));
        tail.position = initial.header.as_ref().map_or(0, |h| h.end);
        tail.skip_line = initial.open_line;
        let batch = tail.absorb(&initial.chunk.bytes, initial.chunk.end);
        Self::deliver(&self.sink, tail.kind, tail.position, batch, windows)
    }

    fn deliver(
        sink: &S,
        kind: SeriesKind,
        position: u64,
        batch: Batch,
        windows: &mut Windows,
    ) -> Update {
        for error in batch.errors {
            sink.record(&MonitorEvent::RowSkipped {
                kind,
                row: error.row,
                line: error.line,
                reason: error.kind.to_string(),
            });
        }

        windows.extend_from(&batch.samples);
        Update {
            kind,
            samples: batch.samples,
            last_position: position,
        }
    }

    /// Ends the session. Positions, headers and samples are dropped.
    pub fn stop(&mut self) {
        if let State::Monitoring(_) = std::mem::replace(&mut self.state, State::Idle) {
            self.sink.record(&MonitorEvent::Stopped);
        }
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(self.state, State::Monitoring(_))
    }

    /// Whether a tick is owed.
    pub fn due(&self) -> bool {
        match &self.state {
            State::Idle => false,
            State::Monitoring(session) => {
                self.clock.now().saturating_duration_since(session.last_tick)
                    >= self.settings.interval()
            }
        }
    }

    /// Hands out a read for every path without one already in flight.
    pub fn plan_tick(&mut self) -> Vec<TailJob> {
        let State::Monitoring(session) = &mut self.state else {
            return Vec::new();
        };
        session.last_tick = self.clock.now();

        let id = session.id;
        SeriesKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let tail = session.tail_mut(kind);
                if tail.in_flight {
                    debug!(%kind, "read still in flight, skipping");
                    return None;
                }
                tail.in_flight = true;
                Some(TailJob {
                    session: id,
                    kind,
                    path: tail.path.clone(),
                    position: tail.position,
                })
            })
            .collect()
    }

    /// Applies a finished read.
    pub fn complete(&mut self, result: TailResult) -> Option<Update> {
        let TailResult {
            session: id,
            kind,
            outcome,
        } = result;

        let session = match &mut self.state {
            State::Monitoring(session) if session.id == id => session,
            _ => {
                self.sink.record(&MonitorEvent::StaleResultDiscarded { kind });
                return None;
            }
        };

        let tail = session.tail_mut(kind);
        tail.in_flight = false;

        let chunk = match outcome {
            Ok(chunk) => chunk,
            Err(error) => {
                self.sink.record(&MonitorEvent::TickFailed {
                    kind,
                    error: error.to_string(),
                });
                return None;
            }
        };
        if chunk.start != tail.position {
            self.sink.record(&MonitorEvent::StaleResultDiscarded { kind });
            return None;
        }

        debug!(%kind, start = chunk.start, end = chunk.end, "tail read");
        let batch = tail.absorb(&chunk.bytes, chunk.end);
        let position = tail.position;
        Some(Self::deliver(
            &self.sink,
            kind,
            position,
            batch,
            &mut session.windows,
        ))
    }

    /// Plans, runs and completes one tick on the calling thread.
    pub fn poll(&mut self) -> Vec<Update> {
        self.plan_tick()
            .into_iter()
            .filter_map(|job| {
                let result = job.run(&self.fs);
                self.complete(result)
            })
            .collect()
    }

    pub fn windows(&self) -> Option<&Windows> {
        match &self.state {
            State::Idle => None,
            State::Monitoring(session) => Some(&session.windows),
        }
    }

    pub fn position(&self, kind: SeriesKind) -> Option<u64> {
        match &self.state {
            State::Idle => None,
            State::Monitoring(session) => Some(session.tail(kind).position),
        }
    }

    pub fn path(&self, kind: SeriesKind) -> Option<&Path> {
        match &self.state {
            State::Idle => None,
            State::Monitoring(session) => Some(&session.tail(kind).path),
        }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
