//! V4L2 camera capture via the `v4l` crate.

use crate::convert;
use rollcall_core::{CaptureBackend, CaptureError, CaptureHandle, CaptureSettings, Frame};
use std::io;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

const EBUSY: i32 = 16;
const STREAM_BUFFERS: u32 = 4;
/// Highest `/dev/videoN` index probed by [`list_devices`].
const MAX_PROBE_INDEX: u32 = 16;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel formats we can turn into RGB, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG. Most USB webcams only reach 720p30 in this mode.
    Mjpg,
    /// YUYV 4:2:2 packed.
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb3,
}

impl PixelFormat {
    const PREFERENCE: [PixelFormat; 3] = [PixelFormat::Mjpg, PixelFormat::Yuyv, PixelFormat::Rgb3];

    pub fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Mjpg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Rgb3 => FourCC::new(b"RGB3"),
        }
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|p| p.fourcc() == fourcc)
    }
}

/// Opens `/dev/video{index}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Backend;

impl CaptureBackend for V4l2Backend {
    type Handle = Camera;

    fn open(&mut self, index: u32) -> Result<Camera, CaptureError> {
        Camera::open(index)
    }
}

/// An open V4L2 capture device.
pub struct Camera {
    // Declared before `device` so buffers are unmapped first.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pixel_format: Option<PixelFormat>,
}

impl Camera {
    pub fn open(index: u32) -> Result<Self, CaptureError> {
        let path = device_path(index);
        if !Path::new(&path).exists() {
            return Err(CaptureError::DeviceNotFound(path));
        }

        let device = Device::new(index as usize).map_err(|e| {
            if e.raw_os_error() == Some(EBUSY) {
                CaptureError::DeviceBusy(path.clone())
            } else {
                CaptureError::DeviceNotFound(format!("{path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::CaptureFailed(format!("{path}: failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::DeviceNotFound(format!("{path}: not a video capture device")));
        }

        let fmt = device
            .format()
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("{path}: failed to get format: {e}")))?;

        tracing::info!(
            device = %path,
            driver = %caps.driver,
            card = %caps.card,
            width = fmt.width,
            height = fmt.height,
            fourcc = %fmt.fourcc,
            "opened camera"
        );

        Ok(Self {
            stream: None,
            device,
            index,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
            pixel_format: PixelFormat::from_fourcc(fmt.fourcc),
        })
    }

    /// Best supported pixel format the driver advertises.
    fn pick_format(&self) -> Result<PixelFormat, CaptureError> {
        let offered = self
            .device
            .enum_formats()
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to enumerate formats: {e}")))?;
        PixelFormat::PREFERENCE
            .into_iter()
            .find(|p| offered.iter().any(|d| d.fourcc == p.fourcc()))
            .ok_or_else(|| {
                let names: Vec<String> = offered.iter().map(|d| d.fourcc.to_string()).collect();
                CaptureError::FormatNegotiationFailed(format!(
                    "no supported pixel format (device offers {}; need MJPG, YUYV or RGB3)",
                    names.join(", ")
                ))
            })
    }

    fn to_rgb(&self, buf: &[u8]) -> Result<image::RgbImage, CaptureError> {
        let Some(format) = self.pixel_format else {
            return Err(CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format {}",
                self.fourcc
            )));
        };
        let converted = match format {
            PixelFormat::Mjpg => convert::mjpg_to_rgb(buf),
            PixelFormat::Yuyv => convert::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Rgb3 => convert::rgb24_to_rgb(buf, self.width, self.height),
        };
        converted.map_err(|e| CaptureError::CaptureFailed(e.to_string()))
    }
}

impl CaptureHandle for Camera {
    fn configure(&mut self, settings: &CaptureSettings) -> Result<(), CaptureError> {
        // Formats cannot change while buffers are mapped.
        self.stream = None;

        let format = self.pick_format()?;
        let mut fmt = self
            .device
            .format()
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = format.fourcc();
        fmt.width = settings.width;
        fmt.height = settings.height;

        let negotiated = self
            .device
            .set_format(&fmt)
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        self.width = negotiated.width;
        self.height = negotiated.height;
        self.fourcc = negotiated.fourcc;
        self.pixel_format = PixelFormat::from_fourcc(negotiated.fourcc);

        match self.device.set_params(&Parameters::with_fps(settings.fps)) {
            Ok(params) => tracing::debug!(interval = ?params.interval, "frame interval set"),
            Err(e) => tracing::warn!(fps = settings.fps, error = %e, "driver rejected frame rate"),
        }

        tracing::info!(
            index = self.index,
            width = self.width,
            height = self.height,
            fourcc = %self.fourcc,
            "negotiated format"
        );
        if self.pixel_format.is_none() {
            return Err(CaptureError::FormatNegotiationFailed(format!(
                "driver substituted unsupported format {}",
                self.fourcc
            )));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}"))),
        };
        let sequence = meta.sequence;
        // Copy out before touching `self` again; the buffer is owned by the stream.
        let raw = buf.to_vec();
        let image = self.to_rgb(&raw)?;
        Ok(Some(Frame::new(image, sequence)))
    }

    fn release(mut self) {
        self.stream = None;
        tracing::debug!(index = self.index, "camera released");
    }
}

fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for index in 0..MAX_PROBE_INDEX {
        let path = device_path(index);
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::new(index as usize) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            index,
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}
