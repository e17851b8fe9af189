//! V4L2 capture through the `v4l` crate.

use crate::frame::{Frame, FrameError, PixelFormat};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {}", .0.display())]
    Missing(PathBuf),
    #[error("{} is in use by another process", .0.display())]
    Busy(PathBuf),
    #[error("{} is not a video capture device", .0.display())]
    NotCapture(PathBuf),
    #[error("cannot {action} on {}: {source}", path.display())]
    Device {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("camera answered with {0}, expected YUYV, GREY or Y16")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

fn device_error(path: &Path, action: &'static str, source: io::Error) -> CameraError {
    CameraError::Device {
        path: path.to_path_buf(),
        action,
        source,
    }
}

/// A capture-capable node under `/dev`.
#[derive(Debug, Clone)]
pub struct CaptureDevice {
    pub path: PathBuf,
    pub card: String,
    pub driver: String,
    pub bus: String,
}

/// An opened camera with a negotiated frame size and pixel format.
pub struct Camera {
    device: Device,
    path: PathBuf,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Camera {
    /// Open `path` and ask for a YUYV `width`×`height` stream. The driver
    /// may settle on another size or on GREY/Y16; what it grants is kept.
    pub fn open(path: impl AsRef<Path>, width: u32, height: u32) -> Result<Self, CameraError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CameraError::Missing(path.to_path_buf()));
        }

        let device = Device::with_path(path).map_err(|e| {
            if e.raw_os_error() == Some(EBUSY) {
                CameraError::Busy(path.to_path_buf())
            } else {
                device_error(path, "open", e)
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| device_error(path, "query capabilities", e))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(path.to_path_buf()));
        }

        let mut requested = device
            .format()
            .map_err(|e| device_error(path, "read the format", e))?;
        requested.fourcc = FourCC::new(b"YUYV");
        requested.width = width;
        requested.height = height;
        let granted = device
            .set_format(&requested)
            .map_err(|e| device_error(path, "set the format", e))?;

        let format = PixelFormat::from_fourcc(&granted.fourcc.repr)
            .ok_or_else(|| CameraError::UnsupportedFormat(granted.fourcc.to_string()))?;

        tracing::info!(
            device = %path.display(),
            card = %caps.card,
            width = granted.width,
            height = granted.height,
            ?format,
            "camera ready"
        );

        Ok(Self {
            device,
            path: path.to_path_buf(),
            width: granted.width,
            height: granted.height,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Start an mmap stream; frames come from [`CaptureSession::next_frame`].
    pub fn stream(&self) -> Result<CaptureSession<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| device_error(&self.path, "start streaming", e))?;
        Ok(CaptureSession {
            camera: self,
            stream,
        })
    }

    /// `/dev/video*` nodes that support video capture, sorted by path.
    pub fn capture_devices() -> Vec<CaptureDevice> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .collect();
        paths.sort();

        paths
            .into_iter()
            .filter_map(|path| {
                let caps = Device::with_path(&path).and_then(|d| d.query_caps()).ok()?;
                caps.capabilities
                    .contains(Flags::VIDEO_CAPTURE)
                    .then(|| CaptureDevice {
                        path,
                        card: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

/// Streaming state borrowed from a [`Camera`].
pub struct CaptureSession<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl CaptureSession<'_> {
    /// Block for the next buffer and reduce it to luma.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (raw, meta) = self
            .stream
            .next()
            .map_err(|e| device_error(&self.camera.path, "dequeue a frame", e))?;

        let (width, height) = self.camera.dimensions();
        let pixels = self.camera.format.luma(raw, width, height)?;

        Ok(Frame {
            pixels,
            width,
            height,
            sequence: meta.sequence,
        })
    }

    /// Read and drop `count` frames while exposure settles.
    pub fn discard(&mut self, count: usize) -> Result<(), CameraError> {
        if count > 0 {
            tracing::debug!(count, "discarding warmup frames");
        }
        for _ in 0..count {
            self.next_frame()?;
        }
        Ok(())
    }
}
