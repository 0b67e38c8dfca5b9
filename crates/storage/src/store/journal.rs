//! Journal of persisted heads
//!
//! `journal.log` gets one line per persisted head:
//!
//! ```text
//! <record id> root <millis since epoch>
//! ```
//!
//! On open the store walks the journal backwards and picks the newest head
//! whose record is readable, so a torn last line or a head pointing into a
//! lost segment falls back to the previous one.

use arbor_core::{now_millis, RecordId, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Journal file name
pub const JOURNAL_FILE: &str = "journal.log";

/// Append-only head journal
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open (or create) the journal in `directory`
    pub fn open(directory: &Path) -> Result<Self> {
        let path = directory.join(JOURNAL_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Journal path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All heads in the journal, oldest first
    ///
    /// Malformed lines are skipped.
    pub fn heads(&self) -> Result<Vec<RecordId>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut heads = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let mut parts = line.split_whitespace();
            let (Some(id), Some("root")) = (parts.next(), parts.next()) else {
                continue;
            };
            match id.parse::<RecordId>() {
                Ok(id) => heads.push(id),
                Err(e) => {
                    tracing::warn!(target: "arbor::store", line = %line, error = %e, "Skipping malformed journal line")
                }
            }
        }
        Ok(heads)
    }

    /// Append a head
    pub fn append(&mut self, head: RecordId) -> Result<()> {
        writeln!(self.file, "{} root {}", head, now_millis())?;
        Ok(())
    }

    /// Sync appended heads to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
