//! Capture devices: open, negotiate a convertible format, pull frames.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Devices tried, in order, when no camera is configured.
pub const DEFAULT_DEVICES: [&str; 3] = ["/dev/video0", "/dev/video1", "/dev/video2"];

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported by {0}")]
    StreamingNotSupported(String),
    #[error("no usable camera among {0:?}")]
    NoCamera(Vec<String>),
}

/// A capture-capable device found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel formats we know how to turn into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Open V4L2 capture stream. Dropping it stops streaming and releases the device.
pub struct Camera {
    // Declared before `device` so the stream is torn down first.
    stream: MmapStream<'static>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a capture device by path (e.g. "/dev/video0") and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(EBUSY) => CameraError::DeviceBusy(device_path.to_string()),
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("{device_path}: querying capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported(device_path.to_string()));
        }

        let (granted, pixel_format) = negotiate(&device, device_path)?;
        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("{device_path}: mapping buffers: {e}")))?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = granted.width,
            height = granted.height,
            format = ?pixel_format,
            "camera streaming"
        );

        Ok(Self {
            stream,
            device,
            width: granted.width,
            height: granted.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Open the first device in `candidates` that works.
    pub fn open_first(candidates: &[&str]) -> Result<Self, CameraError> {
        for &path in candidates {
            match Self::open(path) {
                Ok(camera) => return Ok(camera),
                Err(e) => tracing::debug!(device = path, error = %e, "camera candidate unusable"),
            }
        }
        Err(CameraError::NoCamera(
            candidates.iter().map(|c| c.to_string()).collect(),
        ))
    }

    /// Block until the next frame arrives and convert it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };

        let image = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(payload, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_rgb(payload, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(payload),
        }
        .map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))?;

        tracing::trace!(sequence = meta.sequence, "frame captured");
        Ok(Frame::new(image))
    }

    /// Name reported by the driver for the open device.
    pub fn card_name(&self) -> Option<String> {
        self.device.query_caps().ok().map(|caps| caps.card)
    }

    /// Capture-capable devices among `/dev/video0..15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

/// Ask for 640x480 YUYV; drivers may grant another size or format, and any
/// format we can convert is accepted.
fn negotiate(device: &Device, device_path: &str) -> Result<(v4l::Format, PixelFormat), CameraError> {
    let mut requested = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("{device_path}: reading format: {e}")))?;
    requested.width = REQUESTED_WIDTH;
    requested.height = REQUESTED_HEIGHT;
    requested.fourcc = FourCC::new(b"YUYV");

    let granted = device
        .set_format(&requested)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("{device_path}: setting format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(granted.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "{device_path}: driver offers {:?} (need YUYV, MJPG or GREY)",
            granted.fourcc
        ))
    })?;
    Ok((granted, pixel_format))
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::debug!(device = %self.device_path, "releasing camera");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/definitely-not-a-camera").err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_open_first_reports_all_candidates() {
        let err = Camera::open_first(&["/dev/nope0", "/dev/nope1"]).err().unwrap();
        match err {
            CameraError::NoCamera(tried) => assert_eq!(tried, vec!["/dev/nope0", "/dev/nope1"]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
