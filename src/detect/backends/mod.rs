pub mod stub;

pub use stub::{RawDetection, StubBackend};
