//! Overlay scene: detections mapped into display space, ready to draw.

use crate::store::Snapshot;
use facelens_core::geometry::{self, DisplayRect, ScaleFactors};
use facelens_core::label::face_caption;
use ab_glyph::{FontVec, PxScale};
use facelens_core::{Expression, Matcher, Point, Size};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([0, 200, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const LANDMARK_RADIUS: i32 = 1;
const TEXT_SCALE: f32 = 14.0;
const TEXT_GAP: i32 = 2;

#[derive(Error, Debug)]
pub enum FontError {
    #[error("reading font {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a usable font")]
    Invalid { path: PathBuf },
}

/// TrueType/OpenType font used for captions and expression labels.
pub struct CaptionFont(FontVec);

impl CaptionFont {
    pub fn load(path: &Path) -> Result<Self, FontError> {
        let bytes = std::fs::read(path).map_err(|source| FontError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        FontVec::try_from_vec(bytes)
            .map(Self)
            .map_err(|_| FontError::Invalid {
                path: path.to_path_buf(),
            })
    }
}

/// One face as it should appear on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOverlay {
    pub rect: DisplayRect,
    pub caption: String,
    pub landmarks: Vec<Point>,
    pub expression: Option<(Expression, f32)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayScene {
    pub display: Size,
    pub faces: Vec<FaceOverlay>,
}

impl OverlayScene {
    /// Map every detection in `snapshot` into its display size.
    ///
    /// Boxes are shrunk by `shrink`; landmarks are only scaled. A snapshot
    /// without a native size yields an empty scene.
    pub fn build(snapshot: &Snapshot, matcher: Option<&dyn Matcher>, shrink: f32) -> Self {
        let Some(scale) = ScaleFactors::between(snapshot.native_size, snapshot.display_size) else {
            return Self {
                display: snapshot.display_size,
                faces: Vec::new(),
            };
        };

        let faces = snapshot
            .detections
            .iter()
            .map(|det| FaceOverlay {
                rect: geometry::map_box(&det.bbox, scale, shrink),
                caption: face_caption(det, matcher),
                landmarks: det
                    .landmarks
                    .as_deref()
                    .map(|pts| geometry::map_points(pts, scale))
                    .unwrap_or_default(),
                expression: det.expressions.as_ref().and_then(|e| e.dominant()),
            })
            .collect();

        Self {
            display: snapshot.display_size,
            faces,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// One human-readable line per face.
    pub fn summary_lines(&self) -> Vec<String> {
        self.faces
            .iter()
            .map(|f| {
                let mut line = format!(
                    "{} @ ({:.0}, {:.0}) {:.0}x{:.0}",
                    f.caption, f.rect.left, f.rect.top, f.rect.width, f.rect.height
                );
                if let Some((expr, p)) = f.expression {
                    line.push_str(&format!(" [{expr} {:.2}]", p));
                }
                line
            })
            .collect()
    }

    /// Draw boxes and landmark dots onto `canvas`, which must already be
    /// at the scene's display size. With a font, each box also gets its
    /// caption above and its dominant expression below.
    pub fn draw(&self, canvas: &mut RgbImage, font: Option<&CaptionFont>) {
        for face in &self.faces {
            draw_box(canvas, &face.rect);
            for p in &face.landmarks {
                draw_filled_circle_mut(
                    canvas,
                    (p.x.round() as i32, p.y.round() as i32),
                    LANDMARK_RADIUS,
                    LANDMARK_COLOR,
                );
            }

            let Some(CaptionFont(font)) = font else {
                continue;
            };
            let scale = PxScale::from(TEXT_SCALE);
            let (_, text_height) = text_size(scale, font, &face.caption);
            let (x, y) = caption_origin(&face.rect, text_height);
            draw_text_mut(canvas, TEXT_COLOR, x, y, scale, font, &face.caption);

            if let Some((expr, p)) = face.expression {
                let (x, y) = expression_origin(&face.rect);
                draw_text_mut(canvas, TEXT_COLOR, x, y, scale, font, &format!("{expr} ({p:.2})"));
            }
        }
    }
}

/// Two nested hollow rects give the outline its thickness.
fn draw_box(canvas: &mut RgbImage, rect: &DisplayRect) {
    let left = rect.left.round() as i32;
    let top = rect.top.round() as i32;
    let width = rect.width.round() as i32;
    let height = rect.height.round() as i32;

    for inset in 0..BOX_THICKNESS as i32 {
        let w = width - 2 * inset;
        let h = height - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let r = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, r, BOX_COLOR);
    }
}

/// Top-left of a caption sitting just above the box, kept on canvas.
fn caption_origin(rect: &DisplayRect, text_height: u32) -> (i32, i32) {
    let x = rect.left.round().max(0.0) as i32;
    let y = rect.top.round() as i32 - text_height as i32 - TEXT_GAP;
    (x, y.max(0))
}

fn expression_origin(rect: &DisplayRect) -> (i32, i32) {
    let x = rect.left.round().max(0.0) as i32;
    let y = (rect.top + rect.height).round() as i32 + TEXT_GAP;
    (x, y)
}

/// Resize `frame` to the scene's display size and draw the overlay on it.
pub fn render_onto_frame(scene: &OverlayScene, frame: &RgbImage, font: Option<&CaptionFont>) -> RgbImage {
    let mut canvas = if frame.dimensions() == (scene.display.width, scene.display.height) {
        frame.clone()
    } else {
        image::imageops::resize(
            frame,
            scene.display.width,
            scene.display.height,
            image::imageops::FilterType::Triangle,
        )
    };
    scene.draw(&mut canvas, font);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelens_core::{
        AgeGender, BoundingBox, Descriptor, DetectionResult, ExpressionScores, FaceMatcher, Gender,
        ReferenceIdentity,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn snapshot(native: Size, display: Size, detections: Vec<DetectionResult>) -> Snapshot {
        Snapshot {
            native_size: native,
            display_size: display,
            detections: Arc::new(detections),
            ..Snapshot::default()
        }
    }

    fn full_detection() -> DetectionResult {
        let mut expr = BTreeMap::new();
        expr.insert(Expression::Surprised, 0.8);
        expr.insert(Expression::Neutral, 0.2);
        DetectionResult {
            bbox: BoundingBox { x: 100.0, y: 100.0, width: 200.0, height: 200.0, score: 0.99 },
            landmarks: Some(vec![Point { x: 200.0, y: 160.0 }]),
            expressions: Some(ExpressionScores(expr)),
            age_gender: Some(AgeGender { age: 30.4, gender: Gender::Male, gender_probability: 0.91 }),
            descriptor: Some(Descriptor::new(vec![0.0, 0.0])),
        }
    }

    #[test]
    fn test_scene_maps_box_and_landmarks() {
        let snap = snapshot(Size::new(1280, 720), Size::new(640, 360), vec![full_detection()]);
        let matcher = FaceMatcher::new(
            vec![ReferenceIdentity { label: "A".into(), descriptor: Descriptor::new(vec![0.0, 0.0]) }],
            0.6,
        )
        .unwrap();

        let scene = OverlayScene::build(&snap, Some(&matcher), 1.0);
        assert_eq!(scene.display, Size::new(640, 360));
        let face = &scene.faces[0];
        assert_eq!(face.rect, DisplayRect { left: 50.0, top: 50.0, width: 100.0, height: 100.0 });
        assert_eq!(face.landmarks, vec![Point { x: 100.0, y: 80.0 }]);
        assert_eq!(face.caption, "A (0.00) | male (91%) | Age: 30");
        assert_eq!(face.expression.map(|e| e.0), Some(Expression::Surprised));
    }

    #[test]
    fn test_scene_without_matcher_is_unknown() {
        let snap = snapshot(Size::new(100, 100), Size::new(100, 100), vec![full_detection()]);
        let scene = OverlayScene::build(&snap, None, 0.87);
        assert_eq!(scene.faces[0].caption, "Unknown");
        assert!((scene.faces[0].rect.width - 174.0).abs() < 1e-3);
    }

    #[test]
    fn test_scene_without_native_size_is_empty() {
        let snap = snapshot(Size::default(), Size::new(640, 360), vec![full_detection()]);
        assert!(OverlayScene::build(&snap, None, 1.0).is_empty());
    }

    #[test]
    fn test_draw_outlines_box() {
        let snap = snapshot(Size::new(20, 20), Size::new(20, 20), vec![DetectionResult::from_box(
            BoundingBox { x: 5.0, y: 5.0, width: 10.0, height: 10.0, score: 1.0 },
        )]);
        let scene = OverlayScene::build(&snap, None, 1.0);
        let mut canvas = RgbImage::new(20, 20);
        scene.draw(&mut canvas, None);
        assert_eq!(*canvas.get_pixel(5, 5), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(14, 10), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(6, 10), BOX_COLOR, "outline is two pixels thick");
        assert_eq!(*canvas.get_pixel(13, 10), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(7, 10), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(10, 10), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_landmarks_and_clipped_box() {
        let mut det = DetectionResult::from_box(BoundingBox { x: -5.0, y: -5.0, width: 10.0, height: 10.0, score: 1.0 });
        det.landmarks = Some(vec![Point { x: 15.0, y: 15.0 }]);
        let snap = snapshot(Size::new(20, 20), Size::new(20, 20), vec![det]);
        let scene = OverlayScene::build(&snap, None, 1.0);
        let mut canvas = RgbImage::new(20, 20);
        scene.draw(&mut canvas, None);
        assert_eq!(*canvas.get_pixel(15, 15), LANDMARK_COLOR);
        assert_eq!(*canvas.get_pixel(4, 2), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_degenerate_box_draws_nothing() {
        let rect = DisplayRect { left: 3.0, top: 3.0, width: 0.0, height: 4.0 };
        let mut canvas = RgbImage::new(10, 10);
        draw_box(&mut canvas, &rect);
        assert!(canvas.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_text_sits_outside_box() {
        let rect = DisplayRect { left: 50.0, top: 40.0, width: 100.0, height: 80.0 };
        assert_eq!(caption_origin(&rect, 14), (50, 24));
        assert_eq!(expression_origin(&rect), (50, 122));

        let at_edge = DisplayRect { left: -3.0, top: 5.0, width: 10.0, height: 10.0 };
        assert_eq!(caption_origin(&at_edge, 14), (0, 0));
    }

    #[test]
    fn test_missing_font_is_read_error() {
        let err = CaptionFont::load(Path::new("/nonexistent/facelens.ttf")).err().unwrap();
        assert!(matches!(err, FontError::Read { .. }));
    }

    #[test]
    fn test_render_resizes_to_display() {
        let snap = snapshot(Size::new(40, 20), Size::new(20, 10), Vec::new());
        let scene = OverlayScene::build(&snap, None, 1.0);
        let out = render_onto_frame(&scene, &RgbImage::new(40, 20), None);
        assert_eq!(out.dimensions(), (20, 10));
    }

    #[test]
    fn test_summary_lines() {
        let snap = snapshot(Size::new(100, 100), Size::new(100, 100), vec![full_detection()]);
        let scene = OverlayScene::build(&snap, None, 1.0);
        assert_eq!(
            scene.summary_lines(),
            vec!["Unknown @ (100, 100) 200x200 [surprised 0.80]".to_string()]
        );
    }
}
