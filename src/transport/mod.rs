//! Notification transport boundary.
//!
//! The wireless stack (pairing, connection management, characteristic tables) is an external
//! collaborator. The distribution loop only needs:
//! - inbound events: read, write, subscribe toggles, connect/disconnect
//! - outbound `notify` to a subscribed handle and `respond` to a read
//!
//! `MemoryTransport` records everything it is asked to send; `mqtt::MqttTransport` maps the
//! three topics onto an MQTT broker.

pub mod mqtt;

pub use mqtt::{
    parse_mqtt_endpoint, route_incoming, validate_loopback_addr, MqttEndpoint, MqttTransport,
    MqttTransportOptions,
};

use anyhow::{anyhow, Result};
use std::fmt;

/// The three remote-facing channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Read + notify: latest obstacle document.
    Obstacle,
    /// Write-only: partial config updates from the client.
    ConfigWrite,
    /// Read + notify: merged config echo.
    ConfigState,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Obstacle, Topic::ConfigWrite, Topic::ConfigState];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Obstacle => "obstacle",
            Topic::ConfigWrite => "config",
            Topic::ConfigState => "config_state",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.as_str() == name)
    }

    pub fn is_readable(&self) -> bool {
        !matches!(self, Topic::ConfigWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Topic::ConfigWrite)
    }

    pub fn is_notifiable(&self) -> bool {
        self.is_readable()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle identifying the subscriber session that enabled notifications.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(String);

impl SubscriberHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound transport events, delivered to the distribution loop in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connected { peer: String },
    Disconnected { peer: String },
    Read { topic: Topic },
    Write { topic: Topic, payload: Vec<u8> },
    Subscribe { topic: Topic, handle: SubscriberHandle },
    Unsubscribe { topic: Topic },
}

/// Outbound side of the transport.
pub trait Transport {
    /// Push a value to a subscribed handle.
    fn notify(&mut self, topic: Topic, handle: &SubscriberHandle, payload: &[u8]) -> Result<()>;

    /// Answer a read request.
    fn respond(&mut self, topic: Topic, payload: &[u8]) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub topic: Topic,
    pub handle: SubscriberHandle,
    pub payload: Vec<u8>,
}

/// In-memory transport. Records notifications and read responses.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    notifications: Vec<Notification>,
    responses: Vec<(Topic, Vec<u8>)>,
    offline: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail, as a dropped link would.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn notifications_for(&self, topic: Topic) -> Vec<&Notification> {
        self.notifications
            .iter()
            .filter(|n| n.topic == topic)
            .collect()
    }

    /// Most recent notification on `topic`, decoded as JSON.
    pub fn last_notified_json(&self, topic: Topic) -> Option<serde_json::Value> {
        self.notifications
            .iter()
            .rev()
            .find(|n| n.topic == topic)
            .and_then(|n| serde_json::from_slice(&n.payload).ok())
    }

    pub fn responses(&self) -> &[(Topic, Vec<u8>)] {
        &self.responses
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
        self.responses.clear();
    }
}

impl Transport for MemoryTransport {
    fn notify(&mut self, topic: Topic, handle: &SubscriberHandle, payload: &[u8]) -> Result<()> {
        if self.offline {
            return Err(anyhow!("transport offline"));
        }
        self.notifications.push(Notification {
            topic,
            handle: handle.clone(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn respond(&mut self, topic: Topic, payload: &[u8]) -> Result<()> {
        if self.offline {
            return Err(anyhow!("transport offline"));
        }
        self.responses.push((topic, payload.to_vec()));
        Ok(())
    }
}
