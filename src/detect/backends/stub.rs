use anyhow::Result;

use crate::detect::backend::{DetectParams, DetectorBackend};
use crate::detect::labels::ClassNames;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// One raw network output row before the class id is resolved to a label.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class_id: usize, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// Stub backend for testing and bring-up. Replays a fixed script of per-frame raw outputs
/// and resolves class ids through the loaded names table.
///
/// With an empty script every frame yields no detections.
pub struct StubBackend {
    classes: ClassNames,
    script: Vec<Vec<RawDetection>>,
    cursor: usize,
}

impl StubBackend {
    pub fn new(classes: ClassNames) -> Self {
        Self::scripted(classes, Vec::new())
    }

    /// Cycle through `script`, one entry per frame.
    pub fn scripted(classes: ClassNames, script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            classes,
            script,
            cursor: 0,
        }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let entry = &self.script[self.cursor % self.script.len()];
        self.cursor = self.cursor.wrapping_add(1);

        let mut detections = Vec::with_capacity(entry.len());
        for raw in entry {
            if raw.confidence < params.conf_threshold {
                continue;
            }
            match self.classes.label(raw.class_id) {
                Some(label) => detections.push(Detection::new(label, raw.confidence, raw.bbox)),
                None => log::debug!("dropping detection with unknown class id {}", raw.class_id),
            }
        }
        Ok(detections)
    }
}
