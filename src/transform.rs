//! CSV rows to validated samples.

use chrono::{DateTime, Local, NaiveDateTime};
use thiserror::Error;

use crate::models::{GpuSample, MemorySample, Sample, SeriesKind};

/// Naive timestamp layouts accepted besides RFC 3339.
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// Rendering of a sample's timestamp.
const DISPLAY_FORMAT: &str = "%H:%M:%S";

const KB_PER_MB: f64 = 1024.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schema {
    Gpu,
    Memory,
}

impl Schema {
    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            Schema::Gpu => &["Timestamp", "GPU_Utilization", "Memory_Used", "Memory_Total"],
            Schema::Memory => &["Timestamp", "RSS_KB", "VSZ_KB"],
        }
    }

    pub fn kind(self) -> SeriesKind {
        match self {
            Schema::Gpu => SeriesKind::Gpu,
            Schema::Memory => SeriesKind::Memory,
        }
    }

    /// Guesses the schema from the columns a header carries.
    pub fn detect(header: &Header) -> Option<Schema> {
        [Schema::Gpu, Schema::Memory].into_iter().find(|schema| {
            schema
                .required_columns()
                .iter()
                .all(|column| header.index(column).is_some())
        })
    }

    fn parse_row(self, row: &Row<'_>) -> Result<Sample, RowErrorKind> {
        // presence is checked for every column before any value is parsed.
        for column in self.required_columns() {
            row.field(column)?;
        }

        let timestamp = parse_timestamp(row.field("Timestamp")?)?;
        match self {
            Schema::Gpu => {
                let utilization = row.number("GPU_Utilization")?;
                let memory_used = row.number("Memory_Used")?;
                let memory_total = row.number("Memory_Total")?;
                if memory_total == 0.0 {
                    return Err(RowErrorKind::ZeroMemoryTotal);
                }
                Ok(Sample::Gpu(GpuSample {
                    timestamp,
                    utilization,
                    memory: (memory_used / memory_total) * 100.0,
                }))
            }
            Schema::Memory => {
                let rss_kb = row.number("RSS_KB")?;
                let vsz_kb = row.number("VSZ_KB")?;
                Ok(Sample::Memory(MemorySample {
                    timestamp,
                    usage: rss_kb / KB_PER_MB,
                    virtual_usage: vsz_kb / KB_PER_MB,
                }))
            }
        }
    }
}

impl From<SeriesKind> for Schema {
    fn from(kind: SeriesKind) -> Self {
        match kind {
            SeriesKind::Gpu => Schema::Gpu,
            SeriesKind::Memory => Schema::Memory,
        }
    }
}

/// Column names taken from the first line of a log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    columns: Vec<String>,
}

impl Header {
    pub fn parse(line: &str) -> Self {
        Self {
            columns: split_cells(line),
        }
    }

    pub fn index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum RowErrorKind {
    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("field {field} is not a finite number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("Memory_Total is zero")]
    ZeroMemoryTotal,
}

/// A data row that was skipped.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("row {row}: {kind} ({line:?})")]
pub struct RowError {
    /// 1-based among the data rows of the batch.
    pub row: usize,
    pub line: String,
    pub kind: RowErrorKind,
}

/// The outcome of parsing one chunk of rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub samples: Vec<Sample>,
    pub errors: Vec<RowError>,
}

/// Parses a whole document whose first non-blank line is the header.
///
/// Returns `None` when the text holds no header.
pub fn parse_document(text: &str, schema: Schema) -> Option<(Header, Batch)> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = Header::parse(lines.next()?);
    let batch = parse_lines(lines, &header, schema);
    Some((header, batch))
}

/// Parses data rows against a header seen earlier.
pub fn parse_rows(text: &str, header: &Header, schema: Schema) -> Batch {
    parse_lines(text.lines(), header, schema)
}

fn parse_lines<'a>(
    lines: impl Iterator<Item = &'a str>,
    header: &Header,
    schema: Schema,
) -> Batch {
    let mut batch = Batch::default();

    for (idx, line) in lines.filter(|l| !l.trim().is_empty()).enumerate() {
        let cells = split_cells(line);
        let row = Row {
            header,
            cells: &cells,
        };
        match schema.parse_row(&row) {
            Ok(sample) => batch.samples.push(sample),
            Err(kind) => batch.errors.push(RowError {
                row: idx + 1,
                line: line.to_string(),
                kind,
            }),
        }
    }

    batch
}

struct Row<'a> {
    header: &'a Header,
    cells: &'a [String],
}

impl Row<'_> {
    fn field(&self, column: &'static str) -> Result<&str, RowErrorKind> {
        self.header
            .index(column)
            .and_then(|i| self.cells.get(i))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or(RowErrorKind::MissingField(column))
    }

    fn number(&self, column: &'static str) -> Result<f64, RowErrorKind> {
        let value = self.field(column)?;
        value
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| RowErrorKind::InvalidNumber {
                field: column,
                value: value.to_string(),
            })
    }
}

/// Parses a logged timestamp and renders it as local wall-clock time.
pub fn parse_timestamp(value: &str) -> Result<String, RowErrorKind> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Local).format(DISPLAY_FORMAT).to_string());
    }

    // naive values are already local wall-clock time, including ones that
    // fall in a DST gap.
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.format(DISPLAY_FORMAT).to_string())
        .ok_or_else(|| RowErrorKind::InvalidTimestamp(value.to_string()))
}

/// Splits one CSV line into trimmed cells, honouring double quotes.
fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());

    cells
}

#[cfg(test)]
mod tests;
