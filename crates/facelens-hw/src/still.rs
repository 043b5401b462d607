//! Still image source: one user-selected photo, decoded once.

use crate::source::{FrameSource, SourceError, SourceKind};
use async_trait::async_trait;
use facelens_core::{Frame, SharedFrame, Size};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

enum Origin {
    File(PathBuf),
    Image(image::DynamicImage),
}

pub struct StillSource {
    origin: Origin,
    frame: watch::Sender<Option<SharedFrame>>,
}

impl StillSource {
    /// A source that decodes `path` on start.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_origin(Origin::File(path.into()))
    }

    /// A source over an already decoded image.
    pub fn from_image(image: image::DynamicImage) -> Self {
        Self::with_origin(Origin::Image(image))
    }

    fn with_origin(origin: Origin) -> Self {
        let (frame, _) = watch::channel(None);
        Self { origin, frame }
    }
}

#[async_trait]
impl FrameSource for StillSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Still
    }

    async fn start(&self) -> Result<Size, SourceError> {
        let frame = match &self.origin {
            Origin::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || {
                    image::open(&path)
                        .map(|img| Frame::from_image(&img, 0))
                        .map_err(|source| SourceError::Image {
                            path: path.display().to_string(),
                            source,
                        })
                })
                .await
                .map_err(|e| SourceError::Task(e.to_string()))??
            }
            Origin::Image(img) => Frame::from_image(img, 0),
        };

        let size = frame.size();
        if size.is_empty() {
            return Err(SourceError::EmptyImage);
        }
        tracing::info!(size = %size, "still image decoded");
        self.frame.send_replace(Some(Arc::new(frame)));
        Ok(size)
    }

    fn is_ready(&self) -> bool {
        self.frame.borrow().is_some()
    }

    fn current_frame(&self) -> Option<SharedFrame> {
        self.frame.borrow().clone()
    }

    fn stop(&self) {
        self.frame.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_image_reports_natural_size() {
        let source = StillSource::from_image(image::DynamicImage::new_rgb8(64, 48));
        assert!(!source.is_ready());
        let size = source.start().await.unwrap();
        assert_eq!(size, Size::new(64, 48));
        assert!(source.is_ready());
        assert_eq!(source.current_frame().unwrap().data.len(), 64 * 48 * 3);
        assert_eq!(source.kind(), SourceKind::Still);
    }

    #[tokio::test]
    async fn test_stop_clears_frame() {
        let source = StillSource::from_image(image::DynamicImage::new_rgb8(4, 4));
        source.start().await.unwrap();
        source.stop();
        assert!(!source.is_ready());
        assert!(source.current_frame().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let source = StillSource::open("/nonexistent/facelens/upload.jpg");
        assert!(matches!(source.start().await, Err(SourceError::Image { .. })));
        assert!(!source.is_ready());
    }

    #[tokio::test]
    async fn test_zero_size_image_is_rejected() {
        let source = StillSource::from_image(image::DynamicImage::new_rgb8(0, 0));
        assert!(matches!(source.start().await, Err(SourceError::EmptyImage)));
    }
}
