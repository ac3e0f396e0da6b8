//! Messages exchanged with a panel over JSON lines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::events::{EventSink, MonitorEvent};
use crate::models::{Sample, SeriesKind};
use crate::monitor::{self, Monitor, MonitorError, StartOutcome, Update};
use crate::tail::{self, FileSystem, TailChunk, TailError};
use crate::transform::{self, Header, Schema};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Error,
}

/// What a panel can ask for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    GetInitialData {
        path: PathBuf,
        #[serde(rename = "type", default)]
        kind: Option<SeriesKind>,
    },
    #[serde(rename_all = "camelCase")]
    GetNewData {
        path: PathBuf,
        #[serde(rename = "type", default)]
        kind: Option<SeriesKind>,
        #[serde(default)]
        last_position: u64,
    },
    #[serde(rename_all = "camelCase")]
    StartMonitoring {
        gpu_path: PathBuf,
        memory_path: PathBuf,
    },
    StopMonitoring,
    Log {
        text: String,
        #[serde(default)]
        level: LogLevel,
    },
    Error {
        text: String,
    },
}

/// What the panel is sent back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    InitialData {
        #[serde(rename = "type")]
        kind: SeriesKind,
        path: PathBuf,
        data: Vec<Sample>,
        last_position: u64,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        #[serde(rename = "type")]
        kind: SeriesKind,
        path: PathBuf,
        data: Vec<Sample>,
        last_position: u64,
    },
    Clear,
    Error {
        text: String,
    },
}

impl Response {
    fn error(err: impl std::fmt::Display) -> Self {
        Response::Error {
            text: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("cannot tell whether {} is a gpu or memory log", .0.display())]
    UnknownSchema(PathBuf),

    #[error(transparent)]
    Tail(#[from] TailError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

#[derive(Clone, Debug)]
struct KnownHeader {
    header: Header,
    end: u64,
}

/// Serves panel requests on top of a [`Monitor`].
pub struct Handler<F, C, S> {
    monitor: Monitor<F, C, S>,
    headers: HashMap<PathBuf, KnownHeader>,
}

impl<F: FileSystem, C: Clock, S: EventSink> Handler<F, C, S> {
    pub fn new(monitor: Monitor<F, C, S>) -> Self {
        Self {
            monitor,
            headers: HashMap::new(),
        }
    }

    pub fn monitor(&self) -> &Monitor<F, C, S> {
        &self.monitor
    }

    /// Handles one raw line. Never fails: problems become `error` responses.
    pub fn handle_line(&mut self, line: &str) -> Vec<Response> {
        if line.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request),
            Err(err) => {
                warn!(%err, "ignoring malformed message");
                vec![Response::error(ProtocolError::Malformed(err))]
            }
        }
    }

    pub fn handle(&mut self, request: Request) -> Vec<Response> {
        let result = match request {
            Request::GetInitialData { path, kind } => {
                self.initial_data(&path, kind).map(|r| vec![r])
            }
            Request::GetNewData {
                path,
                kind,
                last_position,
            } => self.new_data(&path, kind, last_position).map(|r| vec![r]),
            Request::StartMonitoring {
                gpu_path,
                memory_path,
            } => self.start(gpu_path, memory_path),
            Request::StopMonitoring => {
                self.monitor.stop();
                Ok(vec![Response::Clear])
            }
            Request::Log { text, level } => {
                match level {
                    LogLevel::Info => info!(target: "panel", "{text}"),
                    LogLevel::Error => error!(target: "panel", "{text}"),
                }
                Ok(Vec::new())
            }
            Request::Error { text } => {
                error!(target: "panel", "panel error: {text}");
                Ok(Vec::new())
            }
        };

        result.unwrap_or_else(|err| {
            error!(%err, "request failed");
            vec![Response::error(err)]
        })
    }

    /// Runs a polling tick if one is due.
    pub fn tick(&mut self) -> Vec<Response> {
        if !self.monitor.due() {
            return Vec::new();
        }
        self.monitor
            .poll()
            .into_iter()
            .filter(|u| !u.samples.is_empty())
            .filter_map(|u| {
                let path = self.monitor.path(u.kind)?.to_path_buf();
                Some(Response::Update {
                    kind: u.kind,
                    path,
                    data: u.samples,
                    last_position: u.last_position,
                })
            })
            .collect()
    }

    fn start(&mut self, gpu: PathBuf, memory: PathBuf) -> Result<Vec<Response>, ProtocolError> {
        let updates = match self.monitor.start(gpu, memory)? {
            StartOutcome::Started(updates) => updates,
            StartOutcome::Reused => return Ok(Vec::new()),
        };

        Ok(updates
            .into_iter()
            .filter_map(|update: Update| {
                let path = self.monitor.path(update.kind)?.to_path_buf();
                Some(Response::InitialData {
                    kind: update.kind,
                    path,
                    data: update.samples,
                    last_position: update.last_position,
                })
            })
            .collect())
    }

    fn initial_data(
        &mut self,
        path: &Path,
        kind: Option<SeriesKind>,
    ) -> Result<Response, ProtocolError> {
        let initial = monitor::read_initial(
            self.monitor.fs(),
            path,
            self.monitor.settings().backfill_bytes,
        )?;

        let Some(line) = initial.header else {
            let kind = kind.ok_or_else(|| ProtocolError::UnknownSchema(path.to_path_buf()))?;
            return Ok(Response::InitialData {
                kind,
                path: path.to_path_buf(),
                data: Vec::new(),
                last_position: 0,
            });
        };

        let known = KnownHeader {
            header: Header::parse(&line.line),
            end: line.end,
        };
        let kind = resolve_kind(path, kind, &known.header)?;
        self.headers.insert(path.to_path_buf(), known.clone());

        let (data, last_position) = self.rows(kind, &known.header, &initial.chunk);
        Ok(Response::InitialData {
            kind,
            path: path.to_path_buf(),
            data,
            last_position,
        })
    }

    fn new_data(
        &mut self,
        path: &Path,
        kind: Option<SeriesKind>,
        last_position: u64,
    ) -> Result<Response, ProtocolError> {
        let known = match self.headers.get(path) {
            Some(known) => known.clone(),
            None => {
                let Some(line) = tail::read_header(self.monitor.fs(), path)? else {
                    let kind =
                        kind.ok_or_else(|| ProtocolError::UnknownSchema(path.to_path_buf()))?;
                    return Ok(Response::Update {
                        kind,
                        path: path.to_path_buf(),
                        data: Vec::new(),
                        last_position,
                    });
                };
                let known = KnownHeader {
                    header: Header::parse(&line.line),
                    end: line.end,
                };
                self.headers.insert(path.to_path_buf(), known.clone());
                known
            }
        };

        let kind = resolve_kind(path, kind, &known.header)?;
        // a position inside a line resumes at the next line start.
        let aligned = tail::read_aligned(self.monitor.fs(), path, last_position, known.end)?;
        let (data, last_position) = self.rows(kind, &known.header, &aligned.chunk);
        Ok(Response::Update {
            kind,
            path: path.to_path_buf(),
            data,
            last_position,
        })
    }

    /// Parses the complete lines of a chunk.
    ///
    /// The returned position stops after the last newline so a half-written
    /// row is requested again.
    fn rows(&self, kind: SeriesKind, header: &Header, chunk: &TailChunk) -> (Vec<Sample>, u64) {
        let consumed = chunk
            .bytes
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let text = String::from_utf8_lossy(&chunk.bytes[..consumed]);
        let batch = transform::parse_rows(&text, header, Schema::from(kind));

        for error in batch.errors {
            self.monitor.sink().record(&MonitorEvent::RowSkipped {
                kind,
                row: error.row,
                line: error.line,
                reason: error.kind.to_string(),
            });
        }

        (batch.samples, chunk.start + consumed as u64)
    }
}

fn resolve_kind(
    path: &Path,
    kind: Option<SeriesKind>,
    header: &Header,
) -> Result<SeriesKind, ProtocolError> {
    kind.or_else(|| Schema::detect(header).map(Schema::kind))
        .ok_or_else(|| ProtocolError::UnknownSchema(path.to_path_buf()))
}

#[cfg(test)]
mod tests;
