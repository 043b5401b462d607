//! Raw capture buffer conversion from YUYV, GREY, RGB3 and MJPG into RGB8.

use facelens_core::Frame;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decoded MJPG is {actual}, negotiated {expected}")]
    SizeMismatch { expected: String, actual: String },
}

/// Pixel layouts the camera may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpg,
    /// Packed 24-bit RGB.
    Rgb3,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            b"RGB3" => Some(Self::Rgb3),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Convert one capture buffer into an RGB8 frame.
pub fn to_frame(
    buf: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    sequence: u32,
) -> Result<Frame, FrameError> {
    let data = match format {
        PixelFormat::Yuyv => yuyv_to_rgb(buf, width, height)?,
        PixelFormat::Grey => grey_to_rgb(buf, width, height)?,
        PixelFormat::Rgb3 => {
            let expected = (width * height * 3) as usize;
            check_len("RGB3", buf, expected)?;
            buf[..expected].to_vec()
        }
        PixelFormat::Mjpg => {
            let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)?.to_rgb8();
            if decoded.dimensions() != (width, height) {
                return Err(FrameError::SizeMismatch {
                    expected: format!("{width}x{height}"),
                    actual: format!("{}x{}", decoded.width(), decoded.height()),
                });
            }
            decoded.into_raw()
        }
    };

    Ok(Frame {
        data,
        width,
        height,
        sequence,
        timestamp: Instant::now(),
    })
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Convert packed YUYV (4:2:2) to RGB8 with BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("YUYV", yuyv, expected)?;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Replicate 8-bit grayscale into three channels.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    check_len("GREY", grey, expected)?;
    Ok(grey[..expected].iter().flat_map(|&p| [p, p, p]).collect())
}
