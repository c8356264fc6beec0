use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use common::{Result, Signal};

/// Append-only JSON-lines journal of signal lifecycle and scoring
/// decisions. One entry at creation and one at every terminal
/// transition; the stats tooling replays this file.
pub struct SignalJournal {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

#[derive(Serialize)]
struct JournalEntry<'a, T: Serialize> {
    at: DateTime<Utc>,
    event: &'a str,
    #[serde(flatten)]
    payload: T,
}

impl SignalJournal {
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            create_dir_all(dir)?;
        }
        let path = dir.join("signals.jsonl");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "signal journal opened");
        Ok(SignalJournal {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one typed event. Each line flushes immediately so a crash
    /// never loses a committed transition.
    pub async fn record<T: Serialize>(&self, event: &str, payload: &T) -> Result<()> {
        let entry = JournalEntry {
            at: Utc::now(),
            event,
            payload,
        };
        let line = serde_json::to_string(&entry)?;
        let mut writer = self.writer.lock().await;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    pub async fn signal_opened(&self, signal: &Signal) -> Result<()> {
        self.record("signal_opened", signal).await
    }

    pub async fn signal_closed(&self, signal: &Signal) -> Result<()> {
        self.record("signal_closed", signal).await
    }
}
