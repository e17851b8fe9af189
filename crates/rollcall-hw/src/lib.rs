//! rollcall-hw — V4L2 camera capture reduced to 8-bit grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureDevice, CaptureSession};
pub use frame::{Frame, FrameError, PixelFormat};
