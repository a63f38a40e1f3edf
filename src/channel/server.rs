//! Distribution loop.
//!
//! Single-threaded. Transport events and timers are serviced in arrival order:
//! - obstacle document poll (default 0.5 s)
//! - config document poll (default 0.5 s)
//! - config heartbeat (default 10 s)
//! - optional demo feed (2 s)
//!
//! Both caches and both subscriptions are owned here; nothing is shared with other threads.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use super::config::ConfigChannel;
use super::obstacle::ObstacleChannel;
use crate::config::{DistributionSettings, NavicapConfig};
use crate::detect::normalize_label;
use crate::transport::{Topic, Transport, TransportEvent};
use crate::{ObstacleEvent, TrafficColor};

const MAX_IDLE_WAIT: Duration = Duration::from_millis(250);
pub const DEMO_PERIOD: Duration = Duration::from_secs(2);

const DEMO_SAMPLES: &[(&str, f64, TrafficColor)] = &[
    ("persona", 1.6, TrafficColor::Green),
    ("auto", 3.2, TrafficColor::Red),
    ("perro", 0.9, TrafficColor::Green),
    ("puerta", 0.7, TrafficColor::Green),
    ("bicicleta", 2.5, TrafficColor::Red),
];

/// Fixed-period timer driven by externally supplied instants.
#[derive(Clone, Debug)]
struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next: start + period,
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.period;
        // Skip missed periods after a stall instead of firing in a burst.
        if self.next <= now {
            self.next = now + self.period;
        }
        true
    }
}

struct DemoFeed {
    ticker: Ticker,
    index: usize,
}

impl DemoFeed {
    fn next_event(&mut self) -> ObstacleEvent {
        let (label, distance, traffic) = DEMO_SAMPLES[self.index % DEMO_SAMPLES.len()];
        self.index += 1;
        ObstacleEvent::new(normalize_label(label), distance, traffic)
    }
}

pub struct DistributionLoop<T: Transport> {
    transport: T,
    obstacle: ObstacleChannel,
    config: ConfigChannel,
    obstacle_poll: Ticker,
    config_poll: Ticker,
    heartbeat: Ticker,
    demo: Option<DemoFeed>,
}

impl<T: Transport> DistributionLoop<T> {
    pub fn new(
        transport: T,
        obstacle: ObstacleChannel,
        config: ConfigChannel,
        settings: &DistributionSettings,
    ) -> Self {
        let start = Instant::now();
        Self {
            transport,
            obstacle,
            config,
            obstacle_poll: Ticker::new(settings.obstacle_poll, start),
            config_poll: Ticker::new(settings.config_poll, start),
            heartbeat: Ticker::new(settings.config_heartbeat, start),
            demo: None,
        }
    }

    /// Open both channels from the process settings. Creates the config document if needed.
    pub fn open(cfg: &NavicapConfig, transport: T) -> Result<Self> {
        let obstacle = ObstacleChannel::new(&cfg.obstacle_path);
        let config = ConfigChannel::open(&cfg.config_path)?;
        log::info!("Watching obstacle document: {}", cfg.obstacle_path.display());
        log::info!("Watching config document: {}", cfg.config_path.display());
        Ok(Self::new(transport, obstacle, config, &cfg.distribution))
    }

    /// Publish a rotating list of sample obstacles every `period`.
    pub fn enable_demo(&mut self, period: Duration) {
        self.demo = Some(DemoFeed {
            ticker: Ticker::new(period, Instant::now()),
            index: 0,
        });
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn obstacle(&self) -> &ObstacleChannel {
        &self.obstacle
    }

    pub fn config(&self) -> &ConfigChannel {
        &self.config
    }

    pub fn handle(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Connected { peer } => {
                log::info!("Connected: {}", peer);
            }
            TransportEvent::Disconnected { peer } => {
                log::info!("Disconnected: {}", peer);
                self.obstacle.unsubscribe();
                self.config.unsubscribe();
            }
            TransportEvent::Read { topic } => {
                let payload = match topic {
                    Topic::Obstacle => self.obstacle.read()?,
                    Topic::ConfigState => self.config.read(&mut self.transport)?,
                    Topic::ConfigWrite => {
                        log::warn!("Ignoring read on write-only topic {}", topic);
                        return Ok(());
                    }
                };
                self.transport.respond(topic, &payload)?;
            }
            TransportEvent::Write { topic, payload } => {
                if topic.is_writable() {
                    self.config.write(&payload, &mut self.transport)?;
                } else {
                    log::warn!("Ignoring write on read-only topic {}", topic);
                }
            }
            TransportEvent::Subscribe { topic, handle } => match topic {
                Topic::Obstacle => self.obstacle.subscribe(handle),
                Topic::ConfigState => self.config.subscribe(handle, &mut self.transport)?,
                Topic::ConfigWrite => {
                    log::warn!("Ignoring subscribe on write-only topic {}", topic);
                }
            },
            TransportEvent::Unsubscribe { topic } => match topic {
                Topic::Obstacle => self.obstacle.unsubscribe(),
                Topic::ConfigState => self.config.unsubscribe(),
                Topic::ConfigWrite => {}
            },
        }
        Ok(())
    }

    pub fn poll_obstacle(&mut self) -> Result<bool> {
        self.obstacle.poll(&mut self.transport)
    }

    pub fn poll_config(&mut self) -> Result<bool> {
        self.config.poll(&mut self.transport)
    }

    pub fn heartbeat(&mut self) -> Result<bool> {
        self.config.heartbeat(&mut self.transport)
    }

    /// Replace the obstacle cache directly, bypassing the document.
    pub fn publish_obstacle(&mut self, event: ObstacleEvent) -> Result<bool> {
        self.obstacle.publish(event, &mut self.transport)
    }

    /// Run every timer that is due at `now`. A failing timer does not stop the others.
    pub fn tick(&mut self, now: Instant) {
        if self.obstacle_poll.due(now) {
            if let Err(e) = self.poll_obstacle() {
                log::warn!("Obstacle poll failed: {:#}", e);
            }
        }
        if self.config_poll.due(now) {
            if let Err(e) = self.poll_config() {
                log::warn!("Config poll failed: {:#}", e);
            }
        }
        if self.heartbeat.due(now) {
            if let Err(e) = self.heartbeat() {
                log::warn!("Config heartbeat failed: {:#}", e);
            }
        }
        let demo_event = self
            .demo
            .as_mut()
            .and_then(|demo| demo.ticker.due(now).then(|| demo.next_event()));
        if let Some(event) = demo_event {
            log::debug!("Demo obstacle: {}", event.obstacle);
            if let Err(e) = self.publish_obstacle(event) {
                log::warn!("Demo publish failed: {:#}", e);
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        let mut next = self
            .obstacle_poll
            .next
            .min(self.config_poll.next)
            .min(self.heartbeat.next);
        if let Some(demo) = &self.demo {
            next = next.min(demo.ticker.next);
        }
        next
    }

    /// Service events and timers until `running` is cleared.
    pub fn run(&mut self, events: &Receiver<TransportEvent>, running: &AtomicBool) -> Result<()> {
        while running.load(Ordering::SeqCst) {
            let wait = self
                .next_deadline()
                .saturating_duration_since(Instant::now())
                .min(MAX_IDLE_WAIT);
            match events.recv_timeout(wait) {
                Ok(event) => {
                    if let Err(e) = self.handle(event) {
                        log::warn!("Transport event failed: {:#}", e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("transport event channel closed"));
                }
            }
            self.tick(Instant::now());
        }
        log::info!("Distribution loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, SubscriberHandle};
    use std::sync::mpsc;

    fn settings() -> DistributionSettings {
        DistributionSettings {
            obstacle_poll: Duration::from_millis(500),
            config_poll: Duration::from_millis(500),
            config_heartbeat: Duration::from_secs(10),
        }
    }

    fn open_loop(dir: &tempfile::TempDir) -> DistributionLoop<MemoryTransport> {
        let obstacle = ObstacleChannel::new(dir.path().join("obstacle.json"));
        let config = ConfigChannel::open(dir.path().join("config.json")).unwrap();
        DistributionLoop::new(MemoryTransport::new(), obstacle, config, &settings())
    }

    #[test]
    fn ticker_skips_missed_periods() {
        let start = Instant::now();
        let mut ticker = Ticker::new(Duration::from_millis(100), start);
        assert!(!ticker.due(start));
        assert!(ticker.due(start + Duration::from_millis(100)));
        assert!(ticker.due(start + Duration::from_millis(1000)));
        assert!(!ticker.due(start + Duration::from_millis(1050)));
        assert!(ticker.due(start + Duration::from_millis(1100)));
    }

    #[test]
    fn reads_are_answered_from_caches() {
        let dir = tempfile::tempdir().unwrap();
        let mut dist = open_loop(&dir);
        dist.handle(TransportEvent::Read {
            topic: Topic::Obstacle,
        })
        .unwrap();
        dist.handle(TransportEvent::Read {
            topic: Topic::ConfigState,
        })
        .unwrap();
        dist.handle(TransportEvent::Read {
            topic: Topic::ConfigWrite,
        })
        .unwrap();

        let responses = dist.transport().responses();
        assert_eq!(responses.len(), 2);
        let obstacle: serde_json::Value = serde_json::from_slice(&responses[0].1).unwrap();
        assert_eq!(obstacle["obstacle"], "ready");
        assert_eq!(responses[1].0, Topic::ConfigState);
    }

    #[test]
    fn disconnect_clears_both_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let mut dist = open_loop(&dir);
        for topic in [Topic::Obstacle, Topic::ConfigState] {
            dist.handle(TransportEvent::Subscribe {
                topic,
                handle: SubscriberHandle::new("phone"),
            })
            .unwrap();
        }
        assert!(dist.obstacle().subscription().is_subscribed());
        assert!(dist.config().subscription().is_subscribed());

        dist.handle(TransportEvent::Disconnected {
            peer: "phone".to_string(),
        })
        .unwrap();
        assert!(!dist.obstacle().subscription().is_subscribed());
        assert!(!dist.config().subscription().is_subscribed());
    }

    #[test]
    fn demo_feed_rotates_canonical_labels() {
        let dir = tempfile::tempdir().unwrap();
        let mut dist = open_loop(&dir);
        dist.handle(TransportEvent::Subscribe {
            topic: Topic::Obstacle,
            handle: SubscriberHandle::new("phone"),
        })
        .unwrap();
        dist.enable_demo(Duration::from_millis(10));

        let start = Instant::now();
        dist.tick(start + Duration::from_millis(20));
        dist.tick(start + Duration::from_millis(40));

        let sent = dist.transport().notifications_for(Topic::Obstacle);
        assert_eq!(sent.len(), 2);
        let first: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        let second: serde_json::Value = serde_json::from_slice(&sent[1].payload).unwrap();
        assert_eq!(first["obstacle"], "person");
        assert_eq!(second["obstacle"], "car");
        assert_eq!(second["traffic"], "red");
    }

    #[test]
    fn run_stops_when_flag_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let mut dist = open_loop(&dir);
        let (tx, rx) = mpsc::channel();
        tx.send(TransportEvent::Connected {
            peer: "phone".to_string(),
        })
        .unwrap();
        let running = AtomicBool::new(false);
        dist.run(&rx, &running).unwrap();
    }

    #[test]
    fn run_fails_when_event_source_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let mut dist = open_loop(&dir);
        let (tx, rx) = mpsc::channel::<TransportEvent>();
        drop(tx);
        let running = AtomicBool::new(true);
        assert!(dist.run(&rx, &running).is_err());
    }
}
