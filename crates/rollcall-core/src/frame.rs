//! Frame type and downsampling for detection.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::time::Instant;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Shrink the frame by `factor` in each dimension (1/factor² of the area).
    ///
    /// Dimensions are floored, never below one pixel. A factor of 0 or 1
    /// returns an unscaled copy.
    pub fn downsample(&self, factor: u32) -> Frame {
        let image = if factor <= 1 {
            self.image.clone()
        } else {
            let w = (self.width() / factor).max(1);
            let h = (self.height() / factor).max(1);
            imageops::resize(&self.image, w, h, FilterType::Triangle)
        };
        Frame {
            image,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Average luma (0.0–255.0), BT.601 weights.
    pub fn avg_brightness(&self) -> f32 {
        let n = (self.width() as usize) * (self.height() as usize);
        if n == 0 {
            return 0.0;
        }
        let sum: f32 = self
            .image
            .pixels()
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .sum();
        sum / n as f32
    }
}
