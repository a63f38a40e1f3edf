//! File-backed JSON document with change detection.
//!
//! A document is re-read only when its modification fingerprint (mtime + length) differs from
//! the last one that parsed. The fingerprint is committed only after a successful parse, so an
//! empty or half-written file is retried on the next poll instead of being skipped until the
//! next write.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fingerprint {
    modified: SystemTime,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            modified: meta.modified()?,
            len: meta.len(),
        })
    }
}

/// Result of one poll.
#[derive(Debug, PartialEq)]
pub enum DocumentPoll<T> {
    /// The file does not exist.
    Missing,
    /// Fingerprint equals the last committed one.
    Unchanged,
    /// The file exists but is empty (writer has truncated, not yet written).
    Pending,
    /// The content did not parse. Retried on the next poll.
    Malformed(String),
    Updated(T),
}

#[derive(Debug)]
pub struct PersistedDocument {
    path: PathBuf,
    seen: Option<Fingerprint>,
    rejected: Option<Fingerprint>,
}

impl PersistedDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: None,
            rejected: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Drop the committed fingerprint so the next poll re-reads the file.
    pub fn forget(&mut self) {
        self.seen = None;
    }

    pub fn poll<T: DeserializeOwned>(&mut self) -> Result<DocumentPoll<T>> {
        let fingerprint = match Fingerprint::of(&self.path) {
            Ok(fp) => fp,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DocumentPoll::Missing),
            Err(e) => {
                return Err(e).with_context(|| format!("stat {}", self.path.display()));
            }
        };
        if self.seen == Some(fingerprint) {
            return Ok(DocumentPoll::Unchanged);
        }

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DocumentPoll::Missing),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(DocumentPoll::Pending);
        }

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => {
                self.seen = Some(fingerprint);
                self.rejected = None;
                Ok(DocumentPoll::Updated(value))
            }
            Err(e) => {
                let reason = e.to_string();
                if self.rejected == Some(fingerprint) {
                    log::debug!("{} still malformed: {}", self.path.display(), reason);
                } else {
                    log::warn!("{} malformed, retrying: {}", self.path.display(), reason);
                    self.rejected = Some(fingerprint);
                }
                Ok(DocumentPoll::Malformed(reason))
            }
        }
    }

    /// Replace the whole document with compact JSON in one write.
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).context("serialize document")?;
        self.write_bytes(&bytes)
    }

    /// Replace the whole document with indented JSON in one write.
    pub fn write_pretty<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value).context("serialize document")?;
        self.write_bytes(&bytes)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        fs::write(&self.path, bytes).with_context(|| format!("write {}", self.path.display()))?;
        // Our own write is already reflected in the cache; do not report it back.
        self.seen = Some(
            Fingerprint::of(&self.path).with_context(|| format!("stat {}", self.path.display()))?,
        );
        self.rejected = None;
        Ok(())
    }
}
