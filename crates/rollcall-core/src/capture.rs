//! Capture device seam.
//!
//! The session controller only talks to cameras through these traits;
//! `rollcall-hw` provides the V4L2 implementation and tests provide fakes.

use crate::error::ErrorKind;
use crate::frame::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CaptureUnavailable
    }
}

/// Requested capture mode. Devices may negotiate something close instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Opens capture devices by index.
pub trait CaptureBackend {
    type Handle: CaptureHandle;

    fn open(&mut self, index: u32) -> Result<Self::Handle, CaptureError>;
}

/// An open capture device.
pub trait CaptureHandle {
    /// Apply resolution and frame rate.
    fn configure(&mut self, settings: &CaptureSettings) -> Result<(), CaptureError>;

    /// Block until the next frame. `Ok(None)` marks end of stream.
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the device.
    fn release(self);
}
