//! Mapping detections from frame-native pixels into display space.
//!
//! Detections arrive in the frame's native resolution; the overlay is drawn
//! over a rendition of that frame at some other size. Each axis is scaled
//! independently, and boxes are shrunk around their centre by a cosmetic
//! factor because detector boxes run larger than the visible face.

use crate::types::{BoundingBox, Point, Size};

/// Box shrink used for the live camera overlay.
pub const LIVE_SHRINK_FACTOR: f32 = 0.87;
/// Box shrink used for still image overlays.
pub const STILL_SHRINK_FACTOR: f32 = 0.95;

/// Per-axis `display / native` ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub x: f32,
    pub y: f32,
}

impl ScaleFactors {
    pub const IDENTITY: ScaleFactors = ScaleFactors { x: 1.0, y: 1.0 };

    /// Returns `None` when the native size has a zero dimension.
    pub fn between(native: Size, display: Size) -> Option<Self> {
        if native.is_empty() {
            return None;
        }
        Some(Self {
            x: display.width as f32 / native.width as f32,
            y: display.height as f32 / native.height as f32,
        })
    }
}

/// An axis-aligned rectangle in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Scale a box into display space and shrink it symmetrically by `shrink`.
pub fn map_box(bbox: &BoundingBox, scale: ScaleFactors, shrink: f32) -> DisplayRect {
    let scaled_w = bbox.width * scale.x;
    let scaled_h = bbox.height * scale.y;
    DisplayRect {
        left: bbox.x * scale.x + scaled_w * (1.0 - shrink) / 2.0,
        top: bbox.y * scale.y + scaled_h * (1.0 - shrink) / 2.0,
        width: scaled_w * shrink,
        height: scaled_h * shrink,
    }
}

pub fn map_point(point: Point, scale: ScaleFactors) -> Point {
    Point {
        x: point.x * scale.x,
        y: point.y * scale.y,
    }
}

pub fn map_points(points: &[Point], scale: ScaleFactors) -> Vec<Point> {
    points.iter().map(|p| map_point(*p, scale)).collect()
}

/// Fit `native` into at most `max_width` pixels wide, preserving aspect.
///
/// Frames narrower than `max_width` are displayed at native size.
pub fn fit_width(native: Size, max_width: u32) -> Size {
    if native.is_empty() || max_width == 0 || native.width <= max_width {
        return native;
    }
    let height = (native.height as f64 * max_width as f64 / native.width as f64).round() as u32;
    Size::new(max_width, height.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, score: 0.9 }
    }

    #[test]
    fn test_half_scale_no_shrink() {
        let scale = ScaleFactors::between(Size::new(1280, 720), Size::new(640, 360)).unwrap();
        let rect = map_box(&bbox(100.0, 100.0, 200.0, 200.0), scale, 1.0);
        assert_eq!(
            rect,
            DisplayRect { left: 50.0, top: 50.0, width: 100.0, height: 100.0 }
        );
    }

    #[test]
    fn test_identity_scale_is_identity() {
        let size = Size::new(640, 480);
        let scale = ScaleFactors::between(size, size).unwrap();
        assert_eq!(scale, ScaleFactors::IDENTITY);
        let rect = map_box(&bbox(12.5, 40.0, 80.0, 96.0), scale, 1.0);
        assert_eq!(
            rect,
            DisplayRect { left: 12.5, top: 40.0, width: 80.0, height: 96.0 }
        );
    }

    #[test]
    fn test_shrink_keeps_centre() {
        let rect = map_box(&bbox(100.0, 200.0, 100.0, 50.0), ScaleFactors::IDENTITY, 0.8);
        assert!((rect.width - 80.0).abs() < 1e-4);
        assert!((rect.height - 40.0).abs() < 1e-4);
        assert!((rect.left + rect.width / 2.0 - 150.0).abs() < 1e-4);
        assert!((rect.top + rect.height / 2.0 - 225.0).abs() < 1e-4);
    }

    #[test]
    fn test_axes_scale_independently() {
        let scale = ScaleFactors::between(Size::new(100, 100), Size::new(200, 50)).unwrap();
        let rect = map_box(&bbox(10.0, 10.0, 20.0, 20.0), scale, 1.0);
        assert_eq!(rect.left, 20.0);
        assert_eq!(rect.top, 5.0);
        assert_eq!(rect.width, 40.0);
        assert_eq!(rect.height, 10.0);
    }

    #[test]
    fn test_points_are_not_shrunk() {
        let scale = ScaleFactors::between(Size::new(1280, 720), Size::new(640, 360)).unwrap();
        let mapped = map_points(&[Point { x: 100.0, y: 300.0 }], scale);
        assert_eq!(mapped, vec![Point { x: 50.0, y: 150.0 }]);
    }

    #[test]
    fn test_zero_native_size_has_no_scale() {
        assert!(ScaleFactors::between(Size::new(0, 720), Size::new(640, 360)).is_none());
    }

    #[test]
    fn test_fit_width() {
        assert_eq!(fit_width(Size::new(1280, 720), 600), Size::new(600, 338));
        assert_eq!(fit_width(Size::new(320, 240), 600), Size::new(320, 240));
        assert_eq!(fit_width(Size::new(1280, 720), 0), Size::new(1280, 720));
    }
}
