//! Frame sampling and throttling.
//!
//! Every frame is pulled and displayed; only every Kth frame takes the
//! expensive detection path, on a copy shrunk by the downsample factor.

use crate::capture::{CaptureError, CaptureHandle};
use crate::frame::Frame;

/// Reference sampling ratio: detect on every third frame.
pub const DEFAULT_SAMPLE_EVERY: u32 = 3;
/// Reference downsample factor: 1/4 linear, 1/16 area.
pub const DEFAULT_DOWNSAMPLE: u32 = 4;

/// Decides which ticks run detection. The first tick is always sampled.
#[derive(Debug, Clone)]
pub struct Cadence {
    every: u32,
    count: u64,
}

impl Cadence {
    /// A ratio of 0 is treated as 1.
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            count: 0,
        }
    }

    /// Advance one tick and report whether it is sampled.
    pub fn tick(&mut self) -> bool {
        let sampled = self.count % u64::from(self.every) == 0;
        self.count += 1;
        sampled
    }

    pub fn ticks(&self) -> u64 {
        self.count
    }
}

/// One pulled frame plus, when sampled, its downsampled copy for detection.
pub struct SampledFrame {
    pub frame: Frame,
    pub detect_input: Option<Frame>,
}

/// Pulls frames from an open capture handle and applies the cadence.
pub struct FrameSampler<H: CaptureHandle> {
    handle: H,
    cadence: Cadence,
    downsample: u32,
}

impl<H: CaptureHandle> FrameSampler<H> {
    pub fn new(handle: H, sample_every: u32, downsample: u32) -> Self {
        Self {
            handle,
            cadence: Cadence::new(sample_every),
            downsample: downsample.max(1),
        }
    }

    /// Factor that maps detection coordinates back to full-frame coordinates.
    pub fn downsample(&self) -> u32 {
        self.downsample
    }

    /// Pull the next frame. `Ok(None)` when the device reports end of stream.
    ///
    /// The cadence only advances on frames actually received.
    pub fn next_frame(&mut self) -> Result<Option<SampledFrame>, CaptureError> {
        let Some(frame) = self.handle.read()? else {
            return Ok(None);
        };
        let detect_input = if self.cadence.tick() {
            Some(frame.downsample(self.downsample))
        } else {
            None
        };
        Ok(Some(SampledFrame {
            frame,
            detect_input,
        }))
    }

    /// Tear down and hand back the capture handle.
    pub fn into_handle(self) -> H {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureSettings;
    use image::RgbImage;

    #[test]
    fn test_cadence_first_tick_sampled() {
        let mut c = Cadence::new(3);
        let pattern: Vec<bool> = (0..7).map(|_| c.tick()).collect();
        assert_eq!(pattern, vec![true, false, false, true, false, false, true]);
        assert_eq!(c.ticks(), 7);
    }

    #[test]
    fn test_cadence_counts_ceil() {
        for k in 1..=5u32 {
            for m in 0..=20u64 {
                let mut c = Cadence::new(k);
                let sampled = (0..m).filter(|_| c.tick()).count() as u64;
                assert_eq!(sampled, m.div_ceil(u64::from(k)), "k={k} m={m}");
                if k > 1 && m > 1 {
                    assert!(sampled < m);
                }
            }
        }
    }

    #[test]
    fn test_cadence_zero_ratio_samples_every_tick() {
        let mut c = Cadence::new(0);
        assert!((0..5).all(|_| c.tick()));
    }

    struct Scripted {
        remaining: u32,
    }

    impl CaptureHandle for Scripted {
        fn configure(&mut self, _settings: &CaptureSettings) -> Result<(), CaptureError> {
            Ok(())
        }

        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Frame::new(RgbImage::new(64, 48), self.remaining)))
        }

        fn release(self) {}
    }

    #[test]
    fn test_sampler_downsamples_sampled_frames_only() {
        let mut sampler = FrameSampler::new(Scripted { remaining: 4 }, 3, 4);
        let mut sampled = Vec::new();
        while let Some(s) = sampler.next_frame().unwrap() {
            assert_eq!((s.frame.width(), s.frame.height()), (64, 48));
            if let Some(small) = &s.detect_input {
                assert_eq!((small.width(), small.height()), (16, 12));
            }
            sampled.push(s.detect_input.is_some());
        }
        assert_eq!(sampled, vec![true, false, false, true]);
    }
}
