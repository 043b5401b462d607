use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Pixel dimensions of a frame or of its on-screen rendition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded RGB8 frame, either from a live camera or a still image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Build a frame from any decoded image, converting to RGB8.
    pub fn from_image(image: &image::DynamicImage, sequence: u32) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self {
            data: rgb.into_raw(),
            width,
            height,
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// Copy the pixels back into an `image` buffer for drawing or encoding.
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// Frames are handed around by reference count; the latest one wins.
pub type SharedFrame = Arc<Frame>;

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Face bounding box in frame-native pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    #[serde(default)]
    pub score: f32,
}

/// Face descriptor vector (128-dimensional for the usual recognition nets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Descriptors of different length are incomparable and report
    /// `f32::INFINITY`.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        };
        f.write_str(name)
    }
}

/// Probability per expression, as reported by the expression net.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpressionScores(pub BTreeMap<Expression, f32>);

impl ExpressionScores {
    /// The most probable expression, if any scores were reported.
    pub fn dominant(&self) -> Option<(Expression, f32)> {
        self.0
            .iter()
            .map(|(e, p)| (*e, *p))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Male => "male",
            Gender::Female => "female",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeGender {
    pub age: f32,
    pub gender: Gender,
    pub gender_probability: f32,
}

/// One detected face. Optional fields are filled only when the matching
/// capability was requested from the inference backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expressions: Option<ExpressionScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_gender: Option<AgeGender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
}

impl DetectionResult {
    /// A bare detection with no optional attributes.
    pub fn from_box(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            landmarks: None,
            expressions: None,
            age_gender: None,
            descriptor: None,
        }
    }
}

/// A labelled reference face, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceIdentity {
    pub label: String,
    pub descriptor: Descriptor,
}
