//! Log-sink registry
//!
//! Two JSON-lines files under `LOGS_DIR` (`diag.log` for all structured
//! diagnostics, `money.log` for financial events only) plus a broadcast
//! channel feeding the dashboard's SSE streams. Initialized once at startup
//! and torn down with the process; the reconciler and notifier write
//! through the shared handle.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Which sink a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Diag,
    Money,
}

impl LogStream {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "diag" => Some(LogStream::Diag),
            "money" => Some(LogStream::Money),
            _ => None,
        }
    }
}

/// One structured line, already serialized, tagged with its stream.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub json: String,
}

/// Buffered lines an SSE subscriber can fall behind by before dropping.
const BROADCAST_CAPACITY: usize = 256;

pub struct LogSinks {
    diag: Mutex<File>,
    money: Mutex<File>,
    sender: broadcast::Sender<LogLine>,
}

#[derive(Serialize)]
struct Entry<'a> {
    timestamp: DateTime<Utc>,
    level: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    fields: Value,
}

impl LogSinks {
    /// Open (appending) both sink files under `logs_dir`.
    pub fn open(logs_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(logs_dir)
            .wrap_err_with(|| format!("Failed to create logs dir {}", logs_dir.display()))?;

        let open = |name: &str| -> Result<File> {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(logs_dir.join(name))
                .wrap_err_with(|| format!("Failed to open {}", name))
        };

        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Ok(Self {
            diag: Mutex::new(open("diag.log")?),
            money: Mutex::new(open("money.log")?),
            sender,
        })
    }

    /// Subscribe to live lines for the SSE endpoints.
    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.sender.subscribe()
    }

    /// Structured diagnostic entry (any level).
    pub fn diag(&self, level: &str, message: &str, fields: Value) {
        self.write(LogStream::Diag, level, message, fields);
    }

    /// Financial event. Money lines also land in diag so the full journal
    /// stays in one place.
    pub fn money(&self, event: &str, fields: Value) {
        self.write(LogStream::Money, "info", event, fields.clone());
        self.write(LogStream::Diag, "info", event, fields);
    }

    fn write(&self, stream: LogStream, level: &str, message: &str, fields: Value) {
        let entry = Entry {
            timestamp: Utc::now(),
            level,
            message,
            fields,
        };
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize log entry");
                return;
            }
        };

        let file = match stream {
            LogStream::Diag => &self.diag,
            LogStream::Money => &self.money,
        };
        if let Ok(mut guard) = file.lock() {
            let _ = writeln!(guard, "{}", json);
        }

        // Subscribers may lag or be absent; both are fine
        let _ = self.sender.send(LogLine { stream, json });
    }
}
