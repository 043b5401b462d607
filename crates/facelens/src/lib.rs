//! facelens: live and still-image face recognition overlays.
//!
//! Frames flow one way: a [`facelens_hw::FrameSource`] feeds the
//! [`engine::OverlayEngine`], which publishes detections into the
//! [`store::DetectionStore`]; views subscribe and build an
//! [`overlay::OverlayScene`] right before drawing.

pub mod config;
pub mod engine;
pub mod helper;
pub mod overlay;
pub mod store;

pub use config::Config;
pub use engine::{EngineError, EngineOptions, OverlayEngine};
pub use overlay::OverlayScene;
pub use store::{DetectionStore, LoopPhase, Snapshot};
