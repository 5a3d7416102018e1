//! rollcall-hw: camera capture for the interactive attendance loop.
//!
//! Opens a V4L2 capture device and converts its native pixel format
//! (YUYV, MJPEG or GREY) into RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, DEFAULT_DEVICES};
pub use frame::{Frame, FrameError};
