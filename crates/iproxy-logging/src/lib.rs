//! Leveled gateway logger with three sinks: colored console, a daily file
//! under `data/logs/`, and an in-memory ring replayed to SSE subscribers.

mod file_sink;
mod logger;

pub use logger::{LogEntry, LogLevel, Logger};
