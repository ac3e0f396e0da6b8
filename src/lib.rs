//! Live charts for GPU and process-memory CSV logs.
//!
//! Two append-only logs are tailed on a fixed interval. Each read only covers
//! the bytes written since the previous one; complete rows are validated,
//! turned into samples and kept in bounded per-series windows.

pub mod app;
pub mod clock;
pub mod config;
pub mod events;
pub mod models;
pub mod monitor;
pub mod protocol;
pub mod serve;
pub mod tail;
pub mod theme;
pub mod transform;
pub mod ui;
