//! File-backed distribution channels.
//!
//! The detection side and the distribution side exchange state only through two JSON
//! documents:
//! - obstacle document: written whole by `ObstacleProducer`, polled by `ObstacleChannel`
//! - config document: owned by `ConfigStore`, edited remotely through `ConfigChannel::write`
//!   or externally by any process
//!
//! `DistributionLoop` drives both channels from transport events and timers.

pub mod config;
pub mod document;
pub mod merge;
pub mod obstacle;
pub mod server;
pub mod store;
pub mod subscription;

pub use config::ConfigChannel;
pub use document::{DocumentPoll, PersistedDocument};
pub use merge::{coerce_bool, coerce_f64, merge_update, AlertsUpdate, ConfigUpdate, MergeOutcome};
pub use obstacle::{ObstacleChannel, ObstacleProducer};
pub use server::{DistributionLoop, DEMO_PERIOD};
pub use store::{AlertConfig, ConfigStore};
pub use subscription::Subscription;
