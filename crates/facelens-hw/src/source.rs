//! The "produces frames on demand" capability shared by live and still sources.

use crate::camera::CameraError;
use async_trait::async_trait;
use facelens_core::{SharedFrame, Size};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("image has zero size")]
    EmptyImage,
    #[error("source task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Continuous camera stream, detected every tick.
    Live,
    /// One decoded image, detected once.
    Still,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Live => "live",
            SourceKind::Still => "still",
        })
    }
}

/// A frame producer. There is no queue: `current_frame` always returns the
/// most recent frame, or `None` when nothing has been decoded yet.
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Acquire the underlying device or file; resolves with the native size.
    async fn start(&self) -> Result<Size, SourceError>;

    /// Whether a frame is available for detection.
    fn is_ready(&self) -> bool;

    /// Whether the source stopped producing frames on its own.
    fn is_ended(&self) -> bool {
        false
    }

    fn current_frame(&self) -> Option<SharedFrame>;

    /// Release the device and drop any pending frame.
    fn stop(&self);
}
