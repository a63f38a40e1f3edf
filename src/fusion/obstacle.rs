//! Primary obstacle selection.

use crate::detect::{BoundingBox, Detection};
use crate::is_obstacle_label;

#[derive(Clone, Debug, PartialEq)]
pub struct PrimaryObstacle {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Highest-confidence obstacle-category detection, else the highest-confidence detection
/// of any label. Ties keep the first detection seen.
pub fn select_primary(detections: &[Detection]) -> Option<PrimaryObstacle> {
    best_of(detections.iter().filter(|det| is_obstacle_label(&det.label)))
        .or_else(|| best_of(detections.iter()))
        .map(|det| PrimaryObstacle {
            label: det.label.clone(),
            confidence: det.confidence,
            bbox: det.bbox,
        })
}

fn best_of<'a>(detections: impl Iterator<Item = &'a Detection>) -> Option<&'a Detection> {
    let mut best: Option<&Detection> = None;
    for det in detections {
        if best.map_or(true, |b| det.confidence > b.confidence) {
            best = Some(det);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(0, 0, 10, 10))
    }

    #[test]
    fn obstacle_categories_win_over_higher_scores() {
        let dets = vec![det("car", 0.95), det("door", 0.40), det("person", 0.60)];
        let primary = select_primary(&dets).unwrap();
        assert_eq!(primary.label, "person");
        assert_eq!(primary.confidence, 0.60);
    }

    #[test]
    fn falls_back_to_best_overall() {
        let dets = vec![det("tree", 0.50), det("car", 0.80), det("traffic_light", 0.70)];
        assert_eq!(select_primary(&dets).unwrap().label, "car");
    }

    #[test]
    fn no_detections_yield_sentinel() {
        assert!(select_primary(&[]).is_none());
    }

    #[test]
    fn ties_keep_first_seen() {
        let dets = vec![det("stairs", 0.7), det("escalator", 0.7)];
        assert_eq!(select_primary(&dets).unwrap().label, "stairs");

        let dets = vec![det("dog", 0.5), det("car", 0.5)];
        assert_eq!(select_primary(&dets).unwrap().label, "dog");
    }
}
