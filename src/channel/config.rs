//! Config channel: read/notify mirror of the config store plus the remote write path.

use anyhow::Result;
use std::path::PathBuf;

use super::merge::{merge_update, MergeOutcome};
use super::store::ConfigStore;
use super::subscription::Subscription;
use crate::transport::{SubscriberHandle, Topic, Transport};
use crate::Category;

pub struct ConfigChannel {
    store: ConfigStore,
    subscription: Subscription,
}

impl ConfigChannel {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(ConfigStore::open(path)?))
    }

    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            subscription: Subscription::default(),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Enable notifications and push the current config as a baseline.
    pub fn subscribe(&mut self, handle: SubscriberHandle, transport: &mut dyn Transport) -> Result<()> {
        if let Some(previous) = self.subscription.subscribe(handle) {
            log::debug!("Config subscriber {} replaced", previous);
        }
        log::info!("Notify ON for config");
        self.store.reload()?;
        self.push(transport)?;
        Ok(())
    }

    pub fn unsubscribe(&mut self) {
        if self.subscription.unsubscribe() {
            log::info!("Notify OFF for config");
        }
    }

    /// Serve a read. Reloads first so an external edit is visible immediately; a change picked
    /// up here is also pushed to the subscriber, since the next poll will no longer see it.
    pub fn read(&mut self, transport: &mut dyn Transport) -> Result<Vec<u8>> {
        if self.store.reload()? {
            log::info!("Config changed on disk");
            self.push(transport)?;
        }
        self.store.to_json()
    }

    /// Notify the subscriber when the document changed on disk.
    pub fn poll(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        if !self.store.reload()? {
            return Ok(false);
        }
        log::info!("Config changed on disk");
        self.push(transport)
    }

    /// Periodic resend of the current config.
    pub fn heartbeat(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        self.push(transport)
    }

    /// Merge a remote update, persist it and echo the result.
    ///
    /// Undecodable payloads are logged and dropped; the config is left unchanged.
    pub fn write(
        &mut self,
        payload: &[u8],
        transport: &mut dyn Transport,
    ) -> Result<Option<MergeOutcome>> {
        let raw = match std::str::from_utf8(payload) {
            Ok(raw) => raw.trim(),
            Err(e) => {
                log::warn!("Config write is not valid UTF-8: {}", e);
                return Ok(None);
            }
        };

        // Merge against what is on disk now, not a stale cache.
        self.store.reload()?;
        let outcome = match merge_update(raw, self.store.current()) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Invalid config update: {:#}", e);
                return Ok(None);
            }
        };

        self.store.save(outcome.config.clone())?;
        self.push(transport)?;
        if !outcome.enabled_now.is_empty() {
            log::info!("Alerts enabled: {}", join(&outcome.enabled_now));
        }
        if !outcome.disabled_now.is_empty() {
            log::info!("Alerts disabled: {}", join(&outcome.disabled_now));
        }
        log::info!(
            "Config saved to {}: {:?}",
            self.store.path().display(),
            self.store.current()
        );
        Ok(Some(outcome))
    }

    fn push(&self, transport: &mut dyn Transport) -> Result<bool> {
        match self.subscription.handle() {
            Some(handle) => {
                transport.notify(Topic::ConfigState, handle, &self.store.to_json()?)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn join(categories: &[Category]) -> String {
    categories
        .iter()
        .map(Category::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
