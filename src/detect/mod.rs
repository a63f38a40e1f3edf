mod backend;
mod backends;
mod labels;
mod result;

pub use backend::{DetectParams, DetectorBackend};
pub use backends::{RawDetection, StubBackend};
pub use labels::{normalize_label, ClassNames};
pub use result::{BoundingBox, Detection};
