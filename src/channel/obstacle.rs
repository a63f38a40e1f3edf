//! Obstacle channel: detection-side producer and distribution-side last-value cache.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::document::{DocumentPoll, PersistedDocument};
use super::subscription::Subscription;
use crate::transport::{SubscriberHandle, Topic, Transport};
use crate::{iso_now, ObstacleEvent, TrafficColor};

/// Writes the obstacle document. One whole-document write per event.
pub struct ObstacleProducer {
    doc: PersistedDocument,
    history: Option<PathBuf>,
}

impl ObstacleProducer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: PersistedDocument::new(path),
            history: None,
        }
    }

    /// Also append every pushed event to a line-oriented history log.
    pub fn with_history_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.history = Some(path.into());
        self
    }

    pub fn path(&self) -> &Path {
        self.doc.path()
    }

    /// Publish an obstacle. Distance is rounded to centimeters.
    pub fn push(
        &mut self,
        obstacle: &str,
        distance_m: f64,
        traffic: TrafficColor,
    ) -> Result<ObstacleEvent> {
        let rounded = if distance_m.is_finite() {
            (distance_m * 100.0).round() / 100.0
        } else {
            distance_m
        };
        let event = ObstacleEvent::new(obstacle, rounded, traffic);
        self.push_event(&event)?;
        Ok(event)
    }

    pub fn push_event(&mut self, event: &ObstacleEvent) -> Result<()> {
        self.doc.write(event)?;
        if let Some(history) = &self.history {
            append_history(history, event)?;
        }
        Ok(())
    }
}

fn append_history(path: &Path, event: &ObstacleEvent) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(file, "{} {}", iso_now(), serde_json::to_string(event)?)?;
    Ok(())
}

/// Distribution-side view of the obstacle document.
pub struct ObstacleChannel {
    doc: PersistedDocument,
    cache: ObstacleEvent,
    subscription: Subscription,
}

impl ObstacleChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: PersistedDocument::new(path),
            cache: ObstacleEvent::ready(),
            subscription: Subscription::default(),
        }
    }

    pub fn path(&self) -> &Path {
        self.doc.path()
    }

    pub fn current(&self) -> &ObstacleEvent {
        &self.cache
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn subscribe(&mut self, handle: SubscriberHandle) {
        if let Some(previous) = self.subscription.subscribe(handle) {
            log::debug!("Obstacle subscriber {} replaced", previous);
        }
        log::info!("Notify ON for obstacle");
    }

    pub fn unsubscribe(&mut self) {
        if self.subscription.unsubscribe() {
            log::info!("Notify OFF for obstacle");
        }
    }

    /// Serialized cache, as served to a read.
    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.cache)?)
    }

    /// Check the document and push a new version to the subscriber.
    /// Returns true when the cache was replaced.
    pub fn poll(&mut self, transport: &mut dyn Transport) -> Result<bool> {
        match self.doc.poll::<ObstacleEvent>()? {
            DocumentPoll::Updated(mut event) => {
                event.normalize();
                log::debug!(
                    "Obstacle document changed: {} {:?} {}",
                    event.obstacle,
                    event.distance_m,
                    event.traffic
                );
                self.publish(event, transport)?;
                Ok(true)
            }
            DocumentPoll::Missing
            | DocumentPoll::Unchanged
            | DocumentPoll::Pending
            | DocumentPoll::Malformed(_) => Ok(false),
        }
    }

    /// Replace the cache and notify. Returns true when a notification was sent.
    pub fn publish(&mut self, event: ObstacleEvent, transport: &mut dyn Transport) -> Result<bool> {
        self.cache = event;
        match self.subscription.handle() {
            Some(handle) => {
                let payload = serde_json::to_vec(&self.cache)?;
                transport.notify(Topic::Obstacle, handle, &payload)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
