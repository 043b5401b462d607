//! facelens-hw: frame sources for the detection loop.
//!
//! Provides a V4L2-based live camera source and a still image source
//! behind the common [`FrameSource`] capability.

pub mod camera;
pub mod frame;
pub mod source;
pub mod still;

pub use camera::{Camera, CameraError, CameraSource, DeviceInfo};
pub use frame::PixelFormat;
pub use source::{FrameSource, SourceError, SourceKind};
pub use still::StillSource;
