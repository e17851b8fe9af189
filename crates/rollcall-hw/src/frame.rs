//! Captured frames and luma extraction from raw V4L2 buffers.

use thiserror::Error;

/// Pixel layouts the capture path can reduce to 8-bit luma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, `[Y0 U Y1 V]`.
    Yuyv,
    Grey,
    /// 16-bit little-endian luma.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Yuyv => "YUYV",
            Self::Grey => "GREY",
            Self::Y16 => "Y16",
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Grey => 1,
            Self::Yuyv | Self::Y16 => 2,
        }
    }

    /// Reduce a raw buffer to `width * height` luma bytes, ignoring any
    /// driver padding after the image.
    pub fn luma(self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        let needed = width as usize * height as usize * self.bytes_per_pixel();
        let raw = raw.get(..needed).ok_or(FrameError::ShortBuffer {
            format: self.name(),
            needed,
            got: raw.len(),
        })?;

        Ok(match self {
            Self::Grey => raw.to_vec(),
            Self::Yuyv => raw.iter().step_by(2).copied().collect(),
            Self::Y16 => raw.chunks_exact(2).map(|px| px[1]).collect(),
        })
    }
}

/// One grayscale frame, row-major, `width * height` bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver sequence number, for log correlation.
    pub sequence: u32,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{format} buffer holds {got} bytes, frame needs {needed}")]
    ShortBuffer {
        format: &'static str,
        needed: usize,
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"GREY"), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(b"Y16 "), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }

    #[test]
    fn test_yuyv_keeps_luma_samples() {
        let raw = [100, 128, 200, 128];
        assert_eq!(PixelFormat::Yuyv.luma(&raw, 2, 1).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_grey_drops_padding() {
        let raw = [1, 2, 3, 4, 0, 0];
        assert_eq!(PixelFormat::Grey.luma(&raw, 2, 2).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let raw = [0xFF, 0x12, 0x00, 0x80];
        assert_eq!(PixelFormat::Y16.luma(&raw, 2, 1).unwrap(), vec![0x12, 0x80]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let err = PixelFormat::Yuyv.luma(&[100, 128], 2, 1).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortBuffer { format: "YUYV", needed: 4, got: 2 }
        ));
    }
}
