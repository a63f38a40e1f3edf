//! Per-frame sensor fusion.
//!
//! `FusionEngine` runs once per captured frame:
//! 1. Range samples are reduced to one distance (`DistanceFilter`)
//! 2. Traffic-light detections are filtered, scored and color-classified (`TrafficLightSelector`)
//! 3. One primary obstacle is picked from the confident detections (`select_primary`)
//! 4. The debouncer decides whether the resulting `ObstacleEvent` is emitted

pub mod debounce;
pub mod distance;
pub mod obstacle;
pub mod traffic_light;

pub use debounce::{PublishDebouncer, PublishReason};
pub use distance::{echo_to_distance_m, DistanceFilter, NoEchoSensor, RangeSensor};
pub use obstacle::{select_primary, PrimaryObstacle};
pub use traffic_light::{rgb_to_hsv, TrafficLightCandidate, TrafficLightSelector};

use std::time::Instant;

use crate::config::FusionTunables;
use crate::detect::{DetectParams, Detection};
use crate::frame::Frame;
use crate::{ObstacleEvent, OBSTACLE_NONE};

/// Result of one fusion cycle.
#[derive(Clone, Debug)]
pub struct FusionOutcome {
    pub event: ObstacleEvent,
    pub primary: Option<PrimaryObstacle>,
    /// Set when the debouncer lets this event through.
    pub publish: Option<PublishReason>,
}

pub struct FusionEngine {
    tunables: FusionTunables,
    distance: DistanceFilter,
    traffic: TrafficLightSelector,
    debouncer: PublishDebouncer,
}

impl FusionEngine {
    pub fn new(tunables: FusionTunables) -> Self {
        Self {
            distance: DistanceFilter::from_tunables(&tunables),
            traffic: TrafficLightSelector::new(&tunables),
            debouncer: PublishDebouncer::from_tunables(&tunables),
            tunables,
        }
    }

    pub fn tunables(&self) -> &FusionTunables {
        &self.tunables
    }

    pub fn distance_filter(&self) -> &DistanceFilter {
        &self.distance
    }

    /// Backend parameters. The backend threshold is the lower of the general and the
    /// traffic-light thresholds so that faint traffic lights still reach the selector.
    pub fn detect_params(&self, input_size: u32) -> DetectParams {
        DetectParams {
            conf_threshold: self
                .tunables
                .conf_general
                .min(self.tunables.conf_traffic_light),
            nms_threshold: self.tunables.nms,
            input_size,
        }
    }

    /// Fuse one frame's detections and range samples.
    pub fn process(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        range_samples: &[Option<f64>],
        now: Instant,
    ) -> FusionOutcome {
        let distance_m = self.distance.filter(range_samples);
        let traffic = self.traffic.select(frame, detections, now);

        let confident: Vec<Detection> = detections
            .iter()
            .filter(|det| det.confidence >= self.tunables.conf_general)
            .cloned()
            .collect();
        let primary = select_primary(&confident);
        let label = primary
            .as_ref()
            .map(|p| p.label.clone())
            .unwrap_or_else(|| OBSTACLE_NONE.to_string());

        let publish = self.debouncer.decide(&label, distance_m, traffic, now);
        FusionOutcome {
            event: ObstacleEvent::new(label, distance_m, traffic),
            primary,
            publish,
        }
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionTunables::default())
    }
}
