use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Inference parameters handed to a backend for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Minimum confidence the backend should report.
    pub conf_threshold: f32,
    /// Non-maximum suppression overlap threshold.
    pub nms_threshold: f32,
    /// Square network input size in pixels.
    pub input_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.12,
            nms_threshold: 0.35,
            input_size: 608,
        }
    }
}

/// Detector backend trait.
///
/// The network itself is a black box: a backend turns one frame into a flat list of
/// `(label, confidence, box)` detections with labels already normalized.
/// Ordering of the returned list is significant, selection ties go to the first entry.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
