//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream as _;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
const MAX_DEVICE_INDEX: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera not found: {0}")]
    DeviceNotFound(String),
    #[error("camera {0} is in use by another process")]
    DeviceBusy(String),
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// A capture device found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Raw pixel layouts the camera may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, luma in every other byte.
    Yuyv,
    Grey,
    /// 16-bit little-endian luma.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    fn to_grayscale(
        self,
        buf: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, frame::FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
            Self::Grey => frame::grey_to_grayscale(buf, width, height),
            Self::Y16 => frame::y16_to_grayscale(buf, width, height),
        }
    }
}

/// An open webcam with a negotiated resolution and pixel format.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `/dev/video<index>`.
    pub fn open_index(index: u32, width: u32, height: u32) -> Result<Self, CameraError> {
        Self::open(&format!("/dev/video{index}"), width, height)
    }

    /// Open a capture device and ask for `width` x `height` YUYV.
    ///
    /// The driver may settle on another size or on GREY/Y16; both are accepted
    /// and the negotiated values are what the camera reports afterwards.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(16) => CameraError::DeviceBusy(device_path.to_string()),
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("querying capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCaptureDevice(device_path.to_string()));
        }
        tracing::info!(
            device = device_path,
            card = %caps.card,
            driver = %caps.driver,
            "opened camera"
        );

        let (width_got, height_got, pixel_format) = negotiate(&device, width, height)?;
        if (width_got, height_got) != (width, height) {
            tracing::warn!(
                requested = %format!("{width}x{height}"),
                negotiated = %format!("{width_got}x{height_got}"),
                "camera picked a different resolution"
            );
        }

        Ok(Self {
            device,
            width: width_got,
            height: height_got,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start streaming and throw away `warmup_frames` while auto-exposure settles.
    pub fn stream(&self, warmup_frames: usize) -> Result<CaptureStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("creating mmap stream: {e}")))?;
        let mut capture = CaptureStream {
            camera: self,
            stream,
        };

        for _ in 0..warmup_frames {
            capture.next_frame()?;
        }
        tracing::debug!(warmup_frames, "capture stream ready");
        Ok(capture)
    }

    /// Capture devices among `/dev/video0` to `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_DEVICE_INDEX)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

/// Request YUYV at the given size; returns what the driver actually set.
fn negotiate(
    device: &Device,
    width: u32,
    height: u32,
) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("reading format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = width;
    fmt.height = height;

    let set = device
        .set_format(&fmt)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("setting format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(set.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "driver offers {}, need YUYV, GREY or Y16",
            set.fourcc
        ))
    })?;

    tracing::info!(
        width = set.width,
        height = set.height,
        format = ?pixel_format,
        "negotiated format"
    );
    Ok((set.width, set.height, pixel_format))
}

/// Frames from a streaming camera, held open for the whole session.
pub struct CaptureStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl CaptureStream<'_> {
    /// Block for the next frame and convert it to grayscale.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeuing buffer: {e}")))?;
        let sequence = meta.sequence;

        let cam = self.camera;
        let gray = cam
            .pixel_format
            .to_grayscale(buf, cam.width, cam.height)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        Ok(Frame::from_gray(gray, cam.width, cam.height, sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_pixel_format_conversion() {
        let yuyv = [10, 128, 20, 128];
        assert_eq!(PixelFormat::Yuyv.to_grayscale(&yuyv, 2, 1).unwrap(), vec![10, 20]);
        assert_eq!(PixelFormat::Grey.to_grayscale(&[1, 2], 2, 1).unwrap(), vec![1, 2]);
        assert!(PixelFormat::Y16.to_grayscale(&[0, 0], 2, 1).is_err());
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist", 640, 480)
            .err()
            .expect("missing device must fail");
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
