//! facelens-core: detection data model, inference boundary and matching.
//!
//! Face detection and description are delegated to an external vision
//! backend behind [`FaceInference`]; this crate holds what the application
//! does with the results: reference matching, overlay geometry and captions.

pub mod geometry;
pub mod inference;
pub mod label;
pub mod matcher;
pub mod reference;
pub mod types;

pub use inference::{Capabilities, DetectorOptions, FaceInference, InferenceError, LoadState};
pub use matcher::{FaceMatcher, MatchResult, Matcher};
pub use types::{
    AgeGender, BoundingBox, Descriptor, DetectionResult, Expression, ExpressionScores, Frame,
    Gender, Point, ReferenceIdentity, SharedFrame, Size,
};
