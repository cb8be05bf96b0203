//! Event Logger - persists bus events to a JSONL file
//!
//! Subscribes like any other consumer, so a slow disk only costs the logger
//! its own oldest events.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use super::bus::{MessageBus, Subscription};
use super::types::{Event, EventLogEntry};

/// Appends every event as one JSON line
pub struct EventLogger {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl EventLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventLogger::new: creating logger");
        Self { path, writer: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one event, opening the file on first use
    pub fn write_event(&mut self, event: &Event) -> eyre::Result<()> {
        debug!(event_type = event.event_type(), "EventLogger::write_event");

        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Consume events until the subscription closes
    pub async fn run(mut self, subscription: Subscription) {
        debug!(path = ?self.path, "EventLogger::run: starting event logger");
        let mut seen_dropped = 0;

        while let Some(event) = subscription.recv().await {
            let dropped = subscription.dropped();
            if dropped > seen_dropped {
                warn!(missed = dropped - seen_dropped, "EventLogger: lagged behind, missed events");
                seen_dropped = dropped;
            }
            if let Err(e) = self.write_event(&event) {
                error!(event_type = event.event_type(), error = %e, "EventLogger: failed to write event");
            }
        }

        debug!("EventLogger: bus closed, shutting down");
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// Read back an event log, skipping malformed lines
pub fn read_event_log(path: impl AsRef<Path>) -> eyre::Result<Vec<EventLogEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_event_log: reading log file");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_event_log: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_event_log: loaded entries");
    Ok(entries)
}

/// Spawn an event logger for `bus` as a background task
pub fn spawn_event_logger(bus: &MessageBus, path: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(path);
    let subscription = bus.subscribe();
    tokio::spawn(async move {
        logger.run(subscription).await;
    })
}
