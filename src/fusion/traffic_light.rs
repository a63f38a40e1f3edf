//! Traffic-light candidate filtering, HSV color classification and short hysteresis.

use image::RgbImage;
use std::time::{Duration, Instant};

use crate::config::FusionTunables;
use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;
use crate::TrafficColor;

const TRAFFIC_LIGHT_LABEL: &str = "traffic_light";

/// Inclusive HSV range on the OpenCV scale (H 0..=180, S/V 0..=255).
#[derive(Clone, Copy, Debug)]
struct HsvRange {
    lo: (u8, u8, u8),
    hi: (u8, u8, u8),
}

impl HsvRange {
    const fn new(lo: (u8, u8, u8), hi: (u8, u8, u8)) -> Self {
        Self { lo, hi }
    }

    fn contains(&self, (h, s, v): (u8, u8, u8)) -> bool {
        (self.lo.0..=self.hi.0).contains(&h)
            && (self.lo.1..=self.hi.1).contains(&s)
            && (self.lo.2..=self.hi.2).contains(&v)
    }
}

// Red wraps around hue 0, so it needs two ranges.
const RED_LOW: HsvRange = HsvRange::new((0, 70, 80), (10, 255, 255));
const RED_HIGH: HsvRange = HsvRange::new((165, 70, 80), (180, 255, 255));
const GREEN: HsvRange = HsvRange::new((35, 60, 80), (90, 255, 255));

/// RGB to HSV on the OpenCV 8-bit scale.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { delta * 255.0 / max } else { 0.0 };
    let mut h = if delta <= 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    (
        (h / 2.0).round().min(180.0) as u8,
        s.round() as u8,
        max as u8,
    )
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrafficLightCandidate {
    pub score: f32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Clone, Debug)]
pub struct TrafficLightSelector {
    min_confidence: f32,
    min_area_ratio: f32,
    min_aspect: f32,
    high_bonus: f32,
    high_fraction: f32,
    roi_pad: f32,
    min_color_fraction: f32,
    hold: Duration,
    last_positive: Option<(TrafficColor, Instant)>,
}

impl TrafficLightSelector {
    pub fn new(tunables: &FusionTunables) -> Self {
        Self {
            min_confidence: tunables.conf_traffic_light,
            min_area_ratio: tunables.traffic_light_min_area_ratio,
            min_aspect: tunables.traffic_light_min_aspect,
            high_bonus: tunables.traffic_light_high_bonus,
            high_fraction: tunables.traffic_light_high_fraction,
            roi_pad: tunables.traffic_light_roi_pad,
            min_color_fraction: tunables.traffic_light_min_color_fraction,
            hold: tunables.traffic_light_hold,
            last_positive: None,
        }
    }

    /// Traffic-light detections that pass the confidence and geometry filters, in input order.
    pub fn candidates(
        &self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<TrafficLightCandidate> {
        let frame_area = f64::from(frame_width) * f64::from(frame_height);
        if frame_area <= 0.0 {
            return Vec::new();
        }
        detections
            .iter()
            .filter(|det| det.label == TRAFFIC_LIGHT_LABEL)
            .filter(|det| det.confidence >= self.min_confidence)
            .filter(|det| det.bbox.area() as f64 / frame_area >= f64::from(self.min_area_ratio))
            .filter(|det| det.bbox.aspect_ratio() >= self.min_aspect)
            .map(|det| {
                let high = (det.bbox.y as f32) < frame_height as f32 * self.high_fraction;
                TrafficLightCandidate {
                    score: det.confidence + if high { self.high_bonus } else { 0.0 },
                    confidence: det.confidence,
                    bbox: det.bbox,
                }
            })
            .collect()
    }

    /// Highest-scoring candidate, first seen on ties.
    pub fn best_candidate(
        &self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
    ) -> Option<TrafficLightCandidate> {
        let mut best: Option<TrafficLightCandidate> = None;
        for cand in self.candidates(detections, frame_width, frame_height) {
            if best.map_or(true, |b| cand.score > b.score) {
                best = Some(cand);
            }
        }
        best
    }

    /// Count red and green pixels in a padded ROI around `bbox`.
    pub fn classify_color(&self, image: &RgbImage, bbox: BoundingBox) -> TrafficColor {
        let pad = (bbox.w.max(bbox.h) as f32 * self.roi_pad) as i64;
        let (fw, fh) = (i64::from(image.width()), i64::from(image.height()));
        let x0 = (i64::from(bbox.x) - pad).max(0);
        let y0 = (i64::from(bbox.y) - pad).max(0);
        let x1 = (i64::from(bbox.x) + i64::from(bbox.w) + pad).min(fw);
        let y1 = (i64::from(bbox.y) + i64::from(bbox.h) + pad).min(fh);
        if x1 <= x0 || y1 <= y0 {
            return TrafficColor::Unknown;
        }

        let mut red = 0u64;
        let mut green = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                let [r, g, b] = image.get_pixel(x as u32, y as u32).0;
                let hsv = rgb_to_hsv(r, g, b);
                if RED_LOW.contains(hsv) || RED_HIGH.contains(hsv) {
                    red += 1;
                }
                if GREEN.contains(hsv) {
                    green += 1;
                }
            }
        }

        let area = ((x1 - x0) * (y1 - y0)) as f64;
        if (red.max(green) as f64) / area < f64::from(self.min_color_fraction) {
            return TrafficColor::Unknown;
        }
        if red > green {
            TrafficColor::Red
        } else {
            TrafficColor::Green
        }
    }

    /// Per-frame traffic color, with hysteresis over missed frames.
    pub fn select(&mut self, frame: &Frame, detections: &[Detection], now: Instant) -> TrafficColor {
        let observed = match self.best_candidate(detections, frame.width(), frame.height()) {
            Some(best) => {
                let color = self.classify_color(frame.pixels(), best.bbox);
                log::debug!(
                    "traffic light conf={:.2} color={} box={:?}",
                    best.confidence,
                    color,
                    best.bbox
                );
                color
            }
            None => TrafficColor::Unknown,
        };
        self.observe(observed, now)
    }

    /// Apply hysteresis: a positive color seen within the hold window survives an unknown frame.
    pub fn observe(&mut self, observed: TrafficColor, now: Instant) -> TrafficColor {
        if observed.is_positive() {
            self.last_positive = Some((observed, now));
            return observed;
        }
        match self.last_positive {
            Some((color, seen)) if now.saturating_duration_since(seen) < self.hold => color,
            _ => TrafficColor::Unknown,
        }
    }
}

impl Default for TrafficLightSelector {
    fn default() -> Self {
        Self::new(&FusionTunables::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 640;
    const H: u32 = 480;

    fn light(confidence: f32, bbox: BoundingBox) -> Detection {
        Detection::new(TRAFFIC_LIGHT_LABEL, confidence, bbox)
    }

    fn frame_with(bbox: BoundingBox, color: [u8; 3]) -> Frame {
        let mut frame = Frame::blank(W, H);
        frame.fill_rect(bbox.x as u32, bbox.y as u32, bbox.w as u32, bbox.h as u32, color);
        frame
    }

    #[test]
    fn hsv_matches_opencv_scale() {
        assert_eq!(rgb_to_hsv(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv(0, 255, 0), (60, 255, 255));
        assert_eq!(rgb_to_hsv(0, 0, 255), (120, 255, 255));
        assert_eq!(rgb_to_hsv(0, 0, 0), (0, 0, 0));
        // Magenta-ish red lands in the upper red band.
        let (h, _, _) = rgb_to_hsv(255, 0, 40);
        assert!(h >= 165);
    }

    #[test]
    fn geometry_filters_reject_bad_boxes() {
        let selector = TrafficLightSelector::default();
        let dets = vec![
            // too unconfident
            light(0.05, BoundingBox::new(100, 50, 20, 40)),
            // too small: 10x20 = 200 px < 0.15% of 307200
            light(0.9, BoundingBox::new(100, 50, 10, 20)),
            // wider than tall
            light(0.9, BoundingBox::new(100, 50, 40, 30)),
            // not a traffic light
            Detection::new("person", 0.9, BoundingBox::new(100, 50, 20, 40)),
            light(0.3, BoundingBox::new(100, 50, 20, 40)),
        ];
        let cands = selector.candidates(&dets, W, H);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].confidence, 0.3);
    }

    #[test]
    fn high_mounted_lights_get_bonus() {
        let selector = TrafficLightSelector::default();
        let dets = vec![
            light(0.50, BoundingBox::new(10, 400, 20, 40)),
            light(0.47, BoundingBox::new(300, 20, 20, 40)),
        ];
        let best = selector.best_candidate(&dets, W, H).unwrap();
        assert_eq!(best.bbox.y, 20);
        assert!((best.score - 0.52).abs() < 1e-6);
    }

    #[test]
    fn classifies_red_and_green_lights() {
        let selector = TrafficLightSelector::default();
        let bbox = BoundingBox::new(200, 60, 20, 40);

        let red = frame_with(bbox, [230, 20, 20]);
        assert_eq!(selector.classify_color(red.pixels(), bbox), TrafficColor::Red);

        let green = frame_with(bbox, [30, 220, 90]);
        assert_eq!(selector.classify_color(green.pixels(), bbox), TrafficColor::Green);
    }

    #[test]
    fn dark_roi_is_unknown() {
        let selector = TrafficLightSelector::default();
        let frame = Frame::blank(W, H);
        let bbox = BoundingBox::new(200, 60, 20, 40);
        assert_eq!(selector.classify_color(frame.pixels(), bbox), TrafficColor::Unknown);
    }

    #[test]
    fn roi_outside_frame_is_unknown() {
        let selector = TrafficLightSelector::default();
        let frame = Frame::blank(W, H);
        let bbox = BoundingBox::new(900, 900, 20, 40);
        assert_eq!(selector.classify_color(frame.pixels(), bbox), TrafficColor::Unknown);
    }

    #[test]
    fn red_is_held_through_short_gaps_then_dropped() {
        let mut selector = TrafficLightSelector::default();
        let bbox = BoundingBox::new(200, 60, 20, 40);
        let red_frame = frame_with(bbox, [240, 10, 10]);
        let empty_frame = Frame::blank(W, H);
        let t0 = Instant::now();

        assert_eq!(
            selector.select(&red_frame, &[light(0.4, bbox)], t0),
            TrafficColor::Red
        );
        for i in 1..=5u64 {
            let now = t0 + Duration::from_millis(100 * i);
            assert_eq!(selector.select(&empty_frame, &[], now), TrafficColor::Red);
        }
        let late = t0 + Duration::from_millis(900);
        assert_eq!(selector.select(&empty_frame, &[], late), TrafficColor::Unknown);
    }

    #[test]
    fn new_positive_color_replaces_held_color() {
        let mut selector = TrafficLightSelector::default();
        let t0 = Instant::now();
        selector.observe(TrafficColor::Red, t0);
        assert_eq!(
            selector.observe(TrafficColor::Green, t0 + Duration::from_millis(200)),
            TrafficColor::Green
        );
        assert_eq!(
            selector.observe(TrafficColor::Unknown, t0 + Duration::from_millis(900)),
            TrafficColor::Green
        );
    }
}
