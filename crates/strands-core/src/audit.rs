//! Append-only JSON-lines audit log.
//!
//! One line per decision transition and execution record. Lines are flushed
//! on every append; the file is never rewritten.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// One audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_id: Option<Uuid>,
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(correlation_id: Uuid, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            event_type: event_type.into(),
            decision_id: None,
            playbook_id: None,
            payload,
        }
    }

    pub fn with_decision(mut self, decision_id: Uuid) -> Self {
        self.decision_id = Some(decision_id);
        self
    }

    pub fn with_playbook(mut self, playbook_id: Uuid) -> Self {
        self.playbook_id = Some(playbook_id);
        self
    }
}

/// Sink for audit entries.
#[derive(Debug)]
enum Sink {
    File(BufWriter<File>),
    /// Captures entries in memory; used by tests and dry runs.
    Memory(Vec<AuditEvent>),
}

/// Append-only audit logger shared across the process.
#[derive(Debug)]
pub struct AuditLogger {
    path: Option<PathBuf>,
    sink: Mutex<Sink>,
}

impl AuditLogger {
    /// Open (or create) the audit file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path: Some(path),
            sink: Mutex::new(Sink::File(BufWriter::new(file))),
        })
    }

    /// In-memory logger for tests and `--dry-run`.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sink: Mutex::new(Sink::Memory(Vec::new())),
        }
    }

    /// Append one entry and flush.
    pub fn append(&self, event: AuditEvent) -> Result<()> {
        let mut sink = self.sink.lock().unwrap();
        match &mut *sink {
            Sink::File(writer) => {
                let line = serde_json::to_string(&event)?;
                writeln!(writer, "{line}")?;
                writer.flush()?;
            }
            Sink::Memory(entries) => entries.push(event),
        }
        metrics::counter!("strands_audit_events_total").increment(1);
        Ok(())
    }

    /// Entries captured by an in-memory logger. Empty for file loggers.
    pub fn captured(&self) -> Vec<AuditEvent> {
        match &*self.sink.lock().unwrap() {
            Sink::Memory(entries) => entries.clone(),
            Sink::File(_) => Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
