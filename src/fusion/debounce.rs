//! Publish debounce: emit on change, or on a heartbeat during a static scene.

use std::time::{Duration, Instant};

use crate::config::FusionTunables;
use crate::TrafficColor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishReason {
    First,
    LabelChanged,
    TrafficChanged,
    DistanceMoved,
    Heartbeat,
}

#[derive(Clone, Debug)]
struct Published {
    obstacle: String,
    distance_m: f64,
    traffic: TrafficColor,
    at: Instant,
}

#[derive(Clone, Debug)]
pub struct PublishDebouncer {
    distance_threshold_m: f64,
    heartbeat: Duration,
    last: Option<Published>,
}

impl PublishDebouncer {
    pub fn new(distance_threshold_m: f64, heartbeat: Duration) -> Self {
        Self {
            distance_threshold_m,
            heartbeat,
            last: None,
        }
    }

    pub fn from_tunables(tunables: &FusionTunables) -> Self {
        Self::new(tunables.debounce_distance_m, tunables.debounce_heartbeat)
    }

    /// Decide whether this assessment is emitted. An emission becomes the new baseline.
    pub fn decide(
        &mut self,
        obstacle: &str,
        distance_m: f64,
        traffic: TrafficColor,
        now: Instant,
    ) -> Option<PublishReason> {
        let reason = match &self.last {
            None => Some(PublishReason::First),
            Some(last) if last.obstacle != obstacle => Some(PublishReason::LabelChanged),
            Some(last) if last.traffic != traffic => Some(PublishReason::TrafficChanged),
            // inf - inf is NaN and compares false: two "no range" readings are equal.
            Some(last) if (distance_m - last.distance_m).abs() > self.distance_threshold_m => {
                Some(PublishReason::DistanceMoved)
            }
            Some(last) if now.saturating_duration_since(last.at) >= self.heartbeat => {
                Some(PublishReason::Heartbeat)
            }
            Some(_) => None,
        };

        if reason.is_some() {
            self.last = Some(Published {
                obstacle: obstacle.to_string(),
                distance_m,
                traffic,
                at: now,
            });
        }
        reason
    }
}

impl Default for PublishDebouncer {
    fn default() -> Self {
        Self::from_tunables(&FusionTunables::default())
    }
}
