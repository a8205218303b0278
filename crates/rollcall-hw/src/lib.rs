//! rollcall-hw: webcam capture.
//!
//! Opens a V4L2 device, negotiates a raw pixel format and yields 8-bit
//! grayscale frames for the recognition pipeline.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureStream, DeviceInfo, PixelFormat};
pub use frame::Frame;
