use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use iproxy_common::beijing_timestamp_string;

use crate::file_sink::FileSink;

const RING_CAPACITY: usize = 100;
const DEDUP_CAPACITY: usize = 1000;
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            _ => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub module: String,
    pub message: String,
}

impl LogEntry {
    /// Dedup signature; suppresses echoes of entries this process already saw.
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.timestamp,
            self.level.as_str(),
            self.module,
            self.message
        )
    }

    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{}] [{}] {}",
            self.timestamp,
            self.level.as_str(),
            self.module,
            self.message
        )
    }
}

struct DedupSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupSet {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Insert a signature; returns false if it was already present.
    fn insert(&mut self, signature: String) -> bool {
        if self.seen.contains(&signature) {
            return false;
        }
        if self.order.len() >= DEDUP_CAPACITY
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(signature.clone());
        self.order.push_back(signature);
        true
    }
}

struct LoggerInner {
    min_level: AtomicU8,
    tx: broadcast::Sender<LogEntry>,
    ring: Mutex<VecDeque<LogEntry>>,
    dedup: Mutex<DedupSet>,
    file: Option<FileSink>,
    console: bool,
}

/// Process-wide logger. Cheap to clone; all sinks share one inner state.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    /// `log_dir = None` disables the file sink (used by tests).
    pub fn new(min_level: LogLevel, log_dir: Option<PathBuf>) -> Self {
        Self::build(min_level, log_dir, true)
    }

    /// No console or file output; ring and subscribers still work.
    pub fn silent(min_level: LogLevel) -> Self {
        Self::build(min_level, None, false)
    }

    fn build(min_level: LogLevel, log_dir: Option<PathBuf>, console: bool) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(LoggerInner {
                min_level: AtomicU8::new(min_level as u8),
                tx,
                ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
                dedup: Mutex::new(DedupSet::new()),
                file: log_dir.map(FileSink::spawn),
                console,
            }),
        }
    }

    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.min_level.load(Ordering::Relaxed))
    }

    pub fn set_min_level(&self, level: LogLevel) {
        self.inner.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn debug(&self, module: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, module, message.as_ref());
    }

    pub fn info(&self, module: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Info, module, message.as_ref());
    }

    pub fn error(&self, module: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Error, module, message.as_ref());
    }

    pub fn log(&self, level: LogLevel, module: &str, message: &str) {
        if level < self.min_level() {
            return;
        }
        let entry = LogEntry {
            timestamp: beijing_timestamp_string(),
            level,
            module: module.to_string(),
            message: message.to_string(),
        };
        self.record_signature(&entry);
        self.dispatch(entry);
    }

    /// Feed an entry that arrived from outside the process (e.g. a tailed log
    /// file). Entries whose signature was already seen are dropped, which
    /// stops the tail watcher from echoing our own writes back in.
    pub fn ingest_external(&self, entry: LogEntry) -> bool {
        if !self.record_signature(&entry) {
            return false;
        }
        self.dispatch(entry);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.tx.subscribe()
    }

    /// Snapshot of the ring, oldest first, optionally filtered by level.
    pub fn recent(&self, min_level: Option<LogLevel>) -> Vec<LogEntry> {
        let ring = self.inner.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.iter()
            .filter(|entry| min_level.is_none_or(|lvl| entry.level >= lvl))
            .cloned()
            .collect()
    }

    /// Drain the file queue; called once during ordered shutdown.
    pub async fn flush(&self) {
        if let Some(file) = &self.inner.file {
            file.flush().await;
        }
    }

    fn record_signature(&self, entry: &LogEntry) -> bool {
        let mut dedup = self.inner.dedup.lock().unwrap_or_else(|e| e.into_inner());
        dedup.insert(entry.signature())
    }

    fn dispatch(&self, entry: LogEntry) {
        if self.inner.console {
            print_colored(&entry);
        }
        if let Some(file) = &self.inner.file {
            file.enqueue(entry.format_line());
        }
        {
            let mut ring = self.inner.ring.lock().unwrap_or_else(|e| e.into_inner());
            if ring.len() >= RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }
        let _ = self.inner.tx.send(entry);
    }
}

fn print_colored(entry: &LogEntry) {
    let color = match entry.level {
        LogLevel::Debug => "\x1b[36m",
        LogLevel::Info => "\x1b[32m",
        LogLevel::Error => "\x1b[31m",
    };
    println!(
        "[{}] {}[{}]\x1b[0m [{}] {}",
        entry.timestamp,
        color,
        entry.level.as_str(),
        entry.module,
        entry.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Error);
        assert_eq!(LogLevel::parse("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("bogus"), None);
    }

    #[tokio::test]
    async fn ring_keeps_last_hundred() {
        let logger = Logger::silent(LogLevel::Debug);
        for i in 0..150 {
            logger.info("Test", format!("line {i}"));
        }
        let recent = logger.recent(None);
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].message, "line 50");
        assert_eq!(recent[99].message, "line 149");
    }

    #[tokio::test]
    async fn min_level_filters_entries() {
        let logger = Logger::silent(LogLevel::Info);
        logger.debug("Test", "dropped");
        logger.error("Test", "kept");
        let recent = logger.recent(None);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "kept");
    }

    #[tokio::test]
    async fn external_echo_is_suppressed() {
        let logger = Logger::silent(LogLevel::Debug);
        logger.info("Echo", "hello");
        let entry = logger.recent(None).pop().unwrap();
        assert!(!logger.ingest_external(entry));
        assert_eq!(logger.recent(None).len(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_new_entries() {
        let logger = Logger::silent(LogLevel::Debug);
        let mut rx = logger.subscribe();
        logger.info("Sub", "ping");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "ping");
    }
}
