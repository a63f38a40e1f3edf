//! Frame source boundary.
//!
//! Camera capture and decoding are external collaborators. A `FrameSource` yields decoded
//! RGB frames; the fusion layer only needs pixel access for traffic-light color
//! classification and the frame dimensions for geometric filters.
//!
//! - `Frame`: decoded RGB image.
//! - `FrameSource`: open/read/close contract for a capture device.
//! - `StubFrameSource`: synthetic source for bring-up and tests (`stub://` camera).

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

/// Decoded frame handed to the detector and the traffic-light selector.
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    /// All-black frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::from_rgb(RgbImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.image
    }

    /// Fill a rectangle, clipped to the frame. Used by synthetic sources.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        let x1 = x.saturating_add(w).min(self.width());
        let y1 = y.saturating_add(h).min(self.height());
        for py in y.min(y1)..y1 {
            for px in x.min(x1)..x1 {
                self.image.put_pixel(px, py, Rgb(color));
            }
        }
    }
}

/// Capture device contract.
///
/// A failed `next_frame` is recoverable: the caller closes the source, waits, and reopens it.
pub trait FrameSource {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn next_frame(&mut self) -> Result<Frame>;

    fn close(&mut self);
}

/// Synthetic frame source. Produces blank frames of a fixed size.
pub struct StubFrameSource {
    name: String,
    width: u32,
    height: u32,
    open: bool,
    frames_captured: u64,
}

impl StubFrameSource {
    pub fn new(camera_index: u32, width: u32, height: u32) -> Self {
        Self {
            name: format!("stub://camera{}", camera_index),
            width,
            height,
            open: false,
            frames_captured: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }
}

impl FrameSource for StubFrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("{}: frame size must be non-zero", self.name));
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("{}: source not open", self.name));
        }
        self.frames_captured += 1;
        Ok(Frame::blank(self.width, self.height))
    }

    fn close(&mut self) {
        self.open = false;
    }
}
