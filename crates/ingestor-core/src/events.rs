//! Append-only JSONL log of [`IngestionEvent`]s for one ingestion run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ingestor_types::IngestionEvent;

pub const EVENTS_FILE: &str = "events.jsonl";

pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<IngestionEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: IngestionEvent) {
        self.events.push(event);
    }

    /// Absorbs another log's events, e.g. from a finished bucket worker.
    pub fn merge(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;
        Ok(())
    }

    pub fn events(&self) -> &[IngestionEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestor_types::EventKind;

    #[test]
    fn write_to_file_appends_jsonl() {
        let td = tempfile::tempdir().unwrap();
        let path = events_path(td.path());

        let mut log = EventLog::new();
        log.record(IngestionEvent {
            timestamp: chrono::Utc::now(),
            artifact: "bucket/foo.tar.gz".to_string(),
            elapsed: std::time::Duration::from_secs(1),
            kind: EventKind::Discovered,
        });
        log.write_to_file(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn merge_absorbs_another_logs_events_in_order() {
        let mut log = EventLog::new();
        log.record(IngestionEvent {
            timestamp: chrono::Utc::now(),
            artifact: "bucket-a/foo.tar.gz".to_string(),
            elapsed: std::time::Duration::from_secs(0),
            kind: EventKind::Discovered,
        });

        let mut other = EventLog::new();
        other.record(IngestionEvent {
            timestamp: chrono::Utc::now(),
            artifact: "bucket-b/bar.tar.gz".to_string(),
            elapsed: std::time::Duration::from_secs(0),
            kind: EventKind::Discovered,
        });

        log.merge(other);

        assert_eq!(log.events().len(), 2);
        assert_eq!(log.events()[0].artifact, "bucket-a/foo.tar.gz");
        assert_eq!(log.events()[1].artifact, "bucket-b/bar.tar.gz");
    }
}
