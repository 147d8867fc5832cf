//! Raw V4L2 buffer → RGB conversion.

use image::{ImageFormat, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("buffer too short for {format}: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPG decode failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Convert packed YUYV 4:2:2 to RGB (BT.601, limited range).
///
/// Every 4 bytes `[Y0, U, Y1, V]` carry two pixels sharing one chroma pair.
pub fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let expected = width as usize * height as usize * 2;
    if buf.len() < expected {
        return Err(ConvertError::InvalidLength {
            format: "YUYV",
            expected,
            actual: buf.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in buf[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    RgbImage::from_raw(width, height, rgb).ok_or(ConvertError::InvalidLength {
        format: "YUYV",
        expected,
        actual: buf.len(),
    })
}

/// Copy a packed RGB24 buffer.
pub fn rgb24_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let expected = width as usize * height as usize * 3;
    let invalid = ConvertError::InvalidLength {
        format: "RGB3",
        expected,
        actual: buf.len(),
    };
    if buf.len() < expected {
        return Err(invalid);
    }
    RgbImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(invalid)
}

/// Decode one Motion-JPEG frame.
pub fn mjpg_to_rgb(buf: &[u8]) -> Result<RgbImage, ConvertError> {
    Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 1.164 * (y as f32 - 16.0);
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_grey_levels() {
        // 2x1: black then white, neutral chroma.
        let img = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // High V pushes red up and green down.
        let img = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let p = img.get_pixel(0, 0).0;
        assert!(p[0] > 200 && p[1] < 60 && p[2] < 60, "{p:?}");
    }

    #[test]
    fn test_yuyv_too_short() {
        assert!(matches!(
            yuyv_to_rgb(&[16, 128], 2, 1),
            Err(ConvertError::InvalidLength { expected: 4, actual: 2, .. })
        ));
    }

    #[test]
    fn test_rgb24_ignores_trailing_padding() {
        let buf = [1, 2, 3, 4, 5, 6, 99, 99];
        let img = rgb24_to_rgb(&buf, 2, 1).unwrap();
        assert_eq!(img.as_raw(), &vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_mjpg_roundtrip_dimensions() {
        let src = RgbImage::from_pixel(8, 4, image::Rgb([10, 200, 30]));
        let mut jpeg = std::io::Cursor::new(Vec::new());
        src.write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();
        let img = mjpg_to_rgb(jpeg.get_ref()).unwrap();
        assert_eq!((img.width(), img.height()), (8, 4));
    }

    #[test]
    fn test_mjpg_garbage() {
        assert!(mjpg_to_rgb(b"definitely not a jpeg").is_err());
    }
}
