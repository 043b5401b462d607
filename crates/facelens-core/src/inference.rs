//! Boundary to the external pretrained vision library.
//!
//! Detection, landmarks, expressions, age/gender and descriptors are all
//! computed behind [`FaceInference`]; this crate only consumes the results.

use crate::types::{DetectionResult, Frame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Detector input resolution used for every call.
pub const DEFAULT_INPUT_SIZE: u32 = 320;
/// Minimum detector score for a face to be reported.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("models not loaded yet")]
    NotLoaded,
    #[error("inference failed: {0}")]
    Failed(String),
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Detector options passed with every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorOptions {
    pub input_size: u32,
    pub score_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// Model loading progress reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Loading,
    Ready,
    /// The backend will never become ready.
    Failed(String),
}

/// Which optional attributes the backend should compute per face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub landmarks: bool,
    pub expressions: bool,
    pub age_gender: bool,
    pub descriptor: bool,
}

impl Capabilities {
    /// Everything the overlay shows.
    pub const ALL: Capabilities = Capabilities {
        landmarks: true,
        expressions: true,
        age_gender: true,
        descriptor: true,
    };

    /// What a reference image needs: landmarks for alignment, then a descriptor.
    pub const REFERENCE: Capabilities = Capabilities {
        landmarks: true,
        expressions: false,
        age_gender: false,
        descriptor: true,
    };
}

/// Asynchronous face inference over a decoded frame.
#[async_trait]
pub trait FaceInference: Send + Sync {
    /// Model loading progress; backends without a load phase are always ready.
    fn load_state(&self) -> LoadState {
        LoadState::Ready
    }

    /// Whether the backend's models have finished loading.
    fn is_loaded(&self) -> bool {
        self.load_state() == LoadState::Ready
    }

    async fn detect_all(
        &self,
        frame: &Frame,
        options: &DetectorOptions,
        capabilities: Capabilities,
    ) -> Result<Vec<DetectionResult>, InferenceError>;

    /// Detect the single most confident face.
    async fn detect_single(
        &self,
        frame: &Frame,
        options: &DetectorOptions,
        capabilities: Capabilities,
    ) -> Result<Option<DetectionResult>, InferenceError> {
        let faces = self.detect_all(frame, options, capabilities).await?;
        Ok(faces.into_iter().max_by(|a, b| {
            a.bbox
                .score
                .partial_cmp(&b.bbox.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }))
    }
}

/// Re-check the load state every `poll` until the backend is ready.
///
/// Fails with [`InferenceError::Unavailable`] once the backend reports that
/// loading failed.
pub async fn wait_until_loaded(inference: &dyn FaceInference, poll: Duration) -> Result<(), InferenceError> {
    let mut announced = false;
    loop {
        match inference.load_state() {
            LoadState::Ready => {
                if announced {
                    tracing::info!("inference models loaded");
                }
                return Ok(());
            }
            LoadState::Failed(reason) => {
                tracing::error!(reason = %reason, "inference models failed to load");
                return Err(InferenceError::Unavailable(reason));
            }
            LoadState::Loading => {
                if !announced {
                    tracing::info!("waiting for inference models to load");
                    announced = true;
                }
                tokio::time::sleep(poll).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Fixed(Vec<DetectionResult>);

    #[async_trait]
    impl FaceInference for Fixed {
        async fn detect_all(
            &self,
            _frame: &Frame,
            _options: &DetectorOptions,
            _capabilities: Capabilities,
        ) -> Result<Vec<DetectionResult>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    fn face(score: f32) -> DetectionResult {
        DetectionResult::from_box(BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, score })
    }

    fn frame() -> Frame {
        Frame::from_image(&image::DynamicImage::new_rgb8(2, 2), 0)
    }

    #[tokio::test]
    async fn test_detect_single_takes_highest_score() {
        let backend = Fixed(vec![face(0.6), face(0.95), face(0.7)]);
        let best = backend
            .detect_single(&frame(), &DetectorOptions::default(), Capabilities::REFERENCE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.bbox.score, 0.95);
    }

    #[tokio::test]
    async fn test_detect_single_none_when_empty() {
        let backend = Fixed(Vec::new());
        let best = backend
            .detect_single(&frame(), &DetectorOptions::default(), Capabilities::REFERENCE)
            .await
            .unwrap();
        assert!(best.is_none());
    }

    struct Loading(Arc<AtomicBool>);

    #[async_trait]
    impl FaceInference for Loading {
        fn load_state(&self) -> LoadState {
            if self.0.load(Ordering::SeqCst) {
                LoadState::Ready
            } else {
                LoadState::Loading
            }
        }

        async fn detect_all(
            &self,
            _frame: &Frame,
            _options: &DetectorOptions,
            _capabilities: Capabilities,
        ) -> Result<Vec<DetectionResult>, InferenceError> {
            Err(InferenceError::NotLoaded)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_loaded_polls() {
        let flag = Arc::new(AtomicBool::new(false));
        let backend = Loading(flag.clone());
        let setter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });
        wait_until_loaded(&backend, Duration::from_millis(10)).await.unwrap();
        assert!(backend.is_loaded());
        setter.await.unwrap();
    }

    struct Broken;

    #[async_trait]
    impl FaceInference for Broken {
        fn load_state(&self) -> LoadState {
            LoadState::Failed("weights missing".into())
        }

        async fn detect_all(
            &self,
            _frame: &Frame,
            _options: &DetectorOptions,
            _capabilities: Capabilities,
        ) -> Result<Vec<DetectionResult>, InferenceError> {
            Err(InferenceError::NotLoaded)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_loaded_fails_on_broken_backend() {
        let err = wait_until_loaded(&Broken, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(ref m) if m == "weights missing"));
        assert!(!Broken.is_loaded());
    }

    #[test]
    fn test_backend_without_load_phase_is_ready() {
        assert_eq!(Fixed(Vec::new()).load_state(), LoadState::Ready);
        assert!(Fixed(Vec::new()).is_loaded());
    }

    #[test]
    fn test_default_options() {
        let opts = DetectorOptions::default();
        assert_eq!(opts.input_size, 320);
        assert_eq!(opts.score_threshold, 0.5);
    }
}
