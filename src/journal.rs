//! Structured Event Journal
//!
//! One JSON object per line: `{ts, kind, payload}`. Files rotate daily by
//! UTC date so post-mortems line up with venue settlement records. Journal
//! failures are logged and swallowed — losing a journal line must never take
//! down the trading loop.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Opportunity,
    ExecStart,
    LegSubmit,
    LegFill,
    LegFail,
    UnwindStart,
    UnwindResult,
    ExecComplete,
    Kill,
    Cooldown,
    Error,
    State,
}

struct JournalFile {
    date: NaiveDate,
    file: File,
}

pub struct EventJournal {
    dir: PathBuf,
    inner: Mutex<Option<JournalFile>>,
}

impl EventJournal {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "📓 event journal ready");
        Ok(Self {
            dir,
            inner: Mutex::new(None),
        })
    }

    fn path_for(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("events-{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append one event. Never panics, never blocks trading on I/O errors.
    pub fn record(&self, kind: EventKind, payload: serde_json::Value) {
        let ts = Utc::now();
        let line = json!({
            "ts": ts.timestamp_millis(),
            "kind": kind,
            "payload": payload,
        });

        let mut guard = self.inner.lock();
        let today = ts.date_naive();
        let needs_rotate = match guard.as_ref() {
            Some(jf) => jf.date != today,
            None => true,
        };
        if needs_rotate {
            match OpenOptions::new()
                .create(true)
                .append(true)
                .open(Self::path_for(&self.dir, today))
            {
                Ok(file) => *guard = Some(JournalFile { date: today, file }),
                Err(e) => {
                    error!(error = %e, "failed to rotate event journal");
                    *guard = None;
                    return;
                }
            }
        }
        if let Some(jf) = guard.as_mut() {
            if let Err(e) = writeln!(jf.file, "{line}") {
                error!(error = %e, "failed to append journal event");
            }
        }
    }

    /// Convenience: serialize any payload type.
    pub fn record_obj<T: Serialize>(&self, kind: EventKind, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(v) => self.record(kind, v),
            Err(e) => error!(error = %e, "journal payload failed to serialize"),
        }
    }

    pub fn current_path(&self) -> PathBuf {
        Self::path_for(&self.dir, Utc::now().date_naive())
    }
}
