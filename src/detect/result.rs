/// Axis-aligned box in frame pixels, `(x, y)` is the top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> i64 {
        i64::from(self.w.max(0)) * i64::from(self.h.max(0))
    }

    /// Height over width, with width floored at one pixel.
    pub fn aspect_ratio(&self) -> f32 {
        self.h as f32 / self.w.max(1) as f32
    }
}

/// One detector output. Ephemeral, never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// 0..=1
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_tolerates_zero_width() {
        let bbox = BoundingBox::new(0, 0, 0, 12);
        assert_eq!(bbox.aspect_ratio(), 12.0);
        assert_eq!(bbox.area(), 0);
    }

    #[test]
    fn area_uses_pixels() {
        assert_eq!(BoundingBox::new(5, 5, 20, 40).area(), 800);
    }
}
