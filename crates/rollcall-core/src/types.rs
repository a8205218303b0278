use serde::{Deserialize, Serialize};

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score in [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Clamp the box to a `width` x `height` frame and round to whole pixels.
    ///
    /// Returns `(x, y, w, h)`, or `None` when nothing of the box is inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).round() as u32;
        let y0 = self.y.max(0.0).round() as u32;
        let x1 = ((self.x + self.width).round().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height).round().max(0.0) as u32).min(height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// One face found in a frame together with the recognizer's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub bbox: BoundingBox,
    /// Composite identity key, or [`crate::UNKNOWN_KEY`].
    pub key: String,
    /// Recognizer distance. Lower means a closer match.
    pub confidence: f32,
}

/// Per-frame face localization and identity inference.
///
/// The attendance session only sees this seam; the concrete detector and
/// recognizer live in `rollcall-vision`.
pub trait FramePipeline {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Find every face in a grayscale frame and classify it.
    fn detect_and_classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Recognition>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0 }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_degenerate() {
        let a = make_bbox(0.0, 0.0, 0.0, 0.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn test_clamp_inside() {
        let b = make_bbox(10.0, 20.0, 50.0, 60.0);
        assert_eq!(b.clamp_to(640, 480), Some((10, 20, 50, 60)));
    }

    #[test]
    fn test_clamp_overhanging_edges() {
        let b = make_bbox(-10.0, 450.0, 50.0, 60.0);
        assert_eq!(b.clamp_to(640, 480), Some((0, 450, 40, 30)));
    }

    #[test]
    fn test_clamp_outside() {
        let b = make_bbox(700.0, 10.0, 50.0, 50.0);
        assert_eq!(b.clamp_to(640, 480), None);
    }
}
