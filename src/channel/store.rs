//! Config document and its in-memory cache.

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::document::{DocumentPoll, PersistedDocument};
use super::merge::{coerce_f64, ConfigUpdate};
use crate::{now_s, Category};

/// User alert preferences, as persisted and as echoed to the subscriber.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertConfig {
    pub vibration: bool,
    pub vibration_intensity: f64,
    pub sound: bool,
    pub volume_intensity: f64,
    pub alerts_enabled: BTreeSet<Category>,
    pub min_distance: f64,
    pub max_distance: f64,
    /// Unix seconds of the last save. Zero until first saved.
    pub timestamp: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            vibration: true,
            vibration_intensity: 50.0,
            sound: true,
            volume_intensity: 50.0,
            alerts_enabled: Category::defaults(),
            min_distance: 1.5,
            max_distance: 4.0,
            timestamp: 0,
        }
    }
}

impl AlertConfig {
    /// Build from a persisted document.
    ///
    /// The document goes through the same coercion as a remote update, applied over the
    /// defaults, so an external edit and a remote write of the same fields produce the same
    /// cache.
    pub fn from_document(value: &Value) -> Result<Self> {
        let fields = value
            .as_object()
            .ok_or_else(|| anyhow!("config document must be a JSON object"))?;
        let update = ConfigUpdate::from_fields(fields);
        if !update.unknown_categories.is_empty() {
            log::warn!(
                "Config document lists unknown categories: {}",
                update.unknown_categories.join(", ")
            );
        }
        let mut config = update.apply(&AlertConfig::default()).config;
        config.timestamp = fields
            .get("timestamp")
            .and_then(coerce_f64)
            .filter(|ts| *ts >= 0.0)
            .map(|ts| ts as u64)
            .unwrap_or(0);
        Ok(config)
    }
}

/// Owner of the config document and its last-parsed cache.
pub struct ConfigStore {
    doc: PersistedDocument,
    cache: AlertConfig,
}

impl ConfigStore {
    /// Load the document, creating it with defaults when absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self {
            doc: PersistedDocument::new(path),
            cache: AlertConfig::default(),
        };
        if store.doc.exists() {
            store.reload()?;
        } else {
            log::info!("Creating default config at {}", store.path().display());
            store.doc.write_pretty(&store.cache)?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.doc.path()
    }

    pub fn current(&self) -> &AlertConfig {
        &self.cache
    }

    /// Pick up external edits. Returns true when a new version of the document was loaded.
    pub fn reload(&mut self) -> Result<bool> {
        match self.doc.poll::<Value>()? {
            DocumentPoll::Updated(value) => match AlertConfig::from_document(&value) {
                Ok(config) => {
                    self.cache = config;
                    Ok(true)
                }
                Err(e) => {
                    log::warn!("{}: {}", self.path().display(), e);
                    self.doc.forget();
                    Ok(false)
                }
            },
            DocumentPoll::Missing => {
                log::warn!(
                    "{} disappeared, rewriting from cache",
                    self.path().display()
                );
                self.doc.write_pretty(&self.cache)?;
                Ok(false)
            }
            DocumentPoll::Unchanged | DocumentPoll::Pending | DocumentPoll::Malformed(_) => {
                Ok(false)
            }
        }
    }

    /// Persist `config` with a fresh timestamp and make it the cache.
    pub fn save(&mut self, mut config: AlertConfig) -> Result<()> {
        config.timestamp = now_s()?;
        self.doc.write_pretty(&config)?;
        self.cache = config;
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.cache)?)
    }
}
