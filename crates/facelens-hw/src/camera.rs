//! V4L2 live camera source via the `v4l` crate.
//!
//! Capture runs on a dedicated OS thread that overwrites a single
//! "latest frame" slot; nothing is queued, so detection always sees the
//! newest decoded frame.

use crate::frame::{self, PixelFormat};
use crate::source::{FrameSource, SourceError, SourceKind};
use async_trait::async_trait;
use facelens_core::{SharedFrame, Size};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::watch;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Formats requested in order of preference.
const PREFERRED_FORMATS: [&[u8; 4]; 4] = [b"YUYV", b"MJPG", b"RGB3", b"GREY"];
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied opening {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// An opened, format-negotiated V4L2 device.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    ///
    /// `resolution` is a request; the driver may negotiate something else,
    /// and the negotiated size is what gets reported.
    pub fn open(device_path: &str, resolution: Option<Size>) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(device_path.to_string()),
            io::ErrorKind::NotFound => CameraError::DeviceNotFound(device_path.to_string()),
            _ if e.raw_os_error() == Some(16) || e.to_string().contains("busy") => {
                CameraError::DeviceBusy
            }
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let current = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        let (width, height) = match resolution {
            Some(size) if !size.is_empty() => (size.width, size.height),
            _ => (current.width, current.height),
        };

        // Walk the preference list until the driver accepts a format we can decode.
        let mut negotiated = None;
        for fourcc in PREFERRED_FORMATS {
            let mut fmt = current.clone();
            fmt.fourcc = FourCC::new(fourcc);
            fmt.width = width;
            fmt.height = height;
            match device.set_format(&fmt) {
                Ok(got) => {
                    if let Some(pixel_format) = PixelFormat::from_fourcc(&got.fourcc.repr) {
                        negotiated = Some((got, pixel_format));
                        break;
                    }
                    tracing::debug!(requested = ?fourcc, got = ?got.fourcc, "driver substituted an unsupported format");
                }
                Err(e) => tracing::debug!(requested = ?fourcc, error = %e, "format rejected"),
            }
        }

        let (fmt, pixel_format) = negotiated.ok_or_else(|| {
            CameraError::FormatNegotiationFailed(
                "no supported pixel format (need YUYV, MJPG, RGB3 or GREY)".to_string(),
            )
        })?;

        tracing::info!(
            width = fmt.width,
            height = fmt.height,
            fourcc = ?fmt.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: fmt.width,
            height: fmt.height,
            device_path: device_path.to_string(),
            fourcc: fmt.fourcc,
            pixel_format,
        })
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Stream frames into `slot` until `stop` is raised or capture fails.
    ///
    /// Returns `Err` on the failure that ended the stream.
    fn stream_into(
        &self,
        slot: &watch::Sender<Option<SharedFrame>>,
        stop: &AtomicBool,
    ) -> Result<(), CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        while !stop.load(Ordering::Acquire) {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

            match frame::to_frame(buf, self.pixel_format, self.width, self.height, meta.sequence) {
                Ok(frame) => {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    slot.send_replace(Some(Arc::new(frame)));
                }
                // A single corrupt buffer (common with MJPG) is not fatal.
                Err(e) => tracing::debug!(seq = meta.sequence, error = %e, "dropping undecodable frame"),
            }
        }
        Ok(())
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Live camera source. Restartable: `start` after `stop` reopens the device.
pub struct CameraSource {
    device_path: String,
    resolution: Option<Size>,
    frame: watch::Sender<Option<SharedFrame>>,
    stop: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CameraSource {
    pub fn new(device_path: impl Into<String>, resolution: Option<Size>) -> Self {
        let (frame, _) = watch::channel(None);
        Self {
            device_path: device_path.into(),
            resolution,
            frame,
            stop: Arc::new(AtomicBool::new(false)),
            ended: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn set_worker(&self, handle: JoinHandle<()>) {
        match self.worker.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
    }
}

#[async_trait]
impl FrameSource for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    async fn start(&self) -> Result<Size, SourceError> {
        // A previous capture thread must have released the device first.
        self.stop.store(true, Ordering::Release);
        let previous = self.take_worker();
        let device_path = self.device_path.clone();
        let resolution = self.resolution;
        let camera = tokio::task::spawn_blocking(move || {
            if let Some(handle) = previous {
                let _ = handle.join();
            }
            Camera::open(&device_path, resolution)
        })
        .await
        .map_err(|e| SourceError::Task(e.to_string()))??;

        let size = camera.size();
        self.stop.store(false, Ordering::Release);
        self.ended.store(false, Ordering::Release);
        self.frame.send_replace(None);

        let slot = self.frame.clone();
        let stop = self.stop.clone();
        let ended = self.ended.clone();
        let handle = std::thread::Builder::new()
            .name("facelens-capture".into())
            .spawn(move || {
                tracing::info!(device = %camera.device_path, "capture thread started");
                if let Err(e) = camera.stream_into(&slot, &stop) {
                    tracing::warn!(device = %camera.device_path, error = %e, "camera stream ended");
                    ended.store(true, Ordering::Release);
                }
                slot.send_replace(None);
                tracing::info!(device = %camera.device_path, "capture thread exiting");
            })
            .map_err(|e| SourceError::Task(format!("failed to spawn capture thread: {e}")))?;
        self.set_worker(handle);

        Ok(size)
    }

    fn is_ready(&self) -> bool {
        self.frame.borrow().is_some()
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn current_frame(&self) -> Option<SharedFrame> {
        self.frame.borrow().clone()
    }

    fn stop(&self) {
        // The capture thread notices on its next dequeue and drops the device;
        // the next `start` joins it before reopening.
        self.stop.store(true, Ordering::Release);
        self.frame.send_replace(None);
        tracing::info!(device = %self.device_path, "camera stop requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let result = Camera::open("/dev/facelens-does-not-exist", None);
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_start_missing_device_is_reported() {
        let source = CameraSource::new("/dev/facelens-does-not-exist", None);
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, SourceError::Camera(CameraError::DeviceNotFound(_))));
        assert!(!source.is_ready());
        assert!(!source.is_ended());
    }

    #[test]
    fn test_stop_before_start_is_harmless() {
        let source = CameraSource::new("/dev/facelens-does-not-exist", None);
        source.stop();
        assert!(source.current_frame().is_none());
        assert_eq!(source.kind(), SourceKind::Live);
    }
}
