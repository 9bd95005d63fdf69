//! Contains the surface that mirrors live timer state outside the process.
//! [FileStatusSink] is the main artifact of this module, an external widget
//! or status-bar script renders whatever it writes.

use std::{io::ErrorKind, path::PathBuf};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::clock::Clock;

/// Contract of the always-visible live display. The display is cosmetic, never authoritative:
/// callers log failures and move on, reconciliation must not notice a broken sink.
#[cfg_attr(test, mockall::automock)]
pub trait StatusSink: Send {
    /// Shows `name` with its accumulated duration.
    fn update(&mut self, name: &str, duration: Duration) -> Result<()>;

    /// Takes the display down.
    fn end(&mut self) -> Result<()>;
}

/// What the sink file holds while a timer runs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveStatus {
    pub name: String,
    pub duration_secs: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
}

/// [StatusSink] writing a single JSON file next to the journal. Present file means a timer is
/// running, absent file means none is.
pub struct FileStatusSink {
    path: PathBuf,
    clock: Box<dyn Clock>,
}

impl FileStatusSink {
    pub fn new(path: PathBuf, clock: Box<dyn Clock>) -> Self {
        Self { path, clock }
    }
}

impl StatusSink for FileStatusSink {
    fn update(&mut self, name: &str, duration: Duration) -> Result<()> {
        let status = LiveStatus {
            name: name.to_owned(),
            duration_secs: duration.num_seconds(),
            updated_at: self.clock.now(),
        };
        std::fs::write(&self.path, serde_json::to_vec(&status)?)?;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)?,
        }
    }
}
