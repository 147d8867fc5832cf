//! rollcall-hw — V4L2 camera capture for rollcall.
//!
//! Implements the capture traits from `rollcall-core` on top of the `v4l`
//! crate and converts MJPG, YUYV and RGB3 buffers to RGB frames.

pub mod camera;
pub mod convert;

pub use camera::{list_devices, Camera, DeviceInfo, PixelFormat, V4l2Backend};
pub use convert::ConvertError;
