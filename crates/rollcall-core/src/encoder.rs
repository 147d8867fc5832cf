//! ArcFace face encoder via ONNX Runtime.
//!
//! Crops a square patch around a detected region, resizes it to 112×112 and
//! extracts an L2-normalized 512-dimensional encoding.

use crate::recognizer::RecognizerError;
use crate::types::{Embedding, Region};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Extra context around the detected box, as a fraction of its longer side.
const CROP_MARGIN: f32 = 0.15;

pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Encode the face inside `region` of `image`.
    pub fn encode(&mut self, image: &RgbImage, region: &Region) -> Result<Embedding, RecognizerError> {
        let face = crop_square(image, region, CROP_MARGIN).ok_or_else(|| {
            RecognizerError::InferenceFailed(format!("empty face region {region:?}"))
        })?;
        let input = preprocess(&face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Square crop centred on the region, grown by `margin` and clipped to the image.
fn crop_square(image: &RgbImage, region: &Region, margin: f32) -> Option<RgbImage> {
    let (w, h) = (image.width(), image.height());
    if region.width() == 0 || region.height() == 0 || w == 0 || h == 0 {
        return None;
    }
    let side = region.width().max(region.height()) as f32 * (1.0 + 2.0 * margin);
    let cx = (region.left + region.right) as f32 / 2.0;
    let cy = (region.top + region.bottom) as f32 / 2.0;

    let x0 = (cx - side / 2.0).max(0.0) as u32;
    let y0 = (cy - side / 2.0).max(0.0) as u32;
    let x1 = ((cx + side / 2.0).ceil() as u32).min(w);
    let y1 = ((cy + side / 2.0).ceil() as u32).min(h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
}

fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let resized = imageops::resize(face, size, size, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_crop_square_is_square_inside_image() {
        let image = RgbImage::new(200, 200);
        let region = Region { top: 50, right: 120, bottom: 150, left: 80 };
        let crop = crop_square(&image, &region, 0.0).unwrap();
        assert_eq!((crop.width(), crop.height()), (100, 100));
    }

    #[test]
    fn test_crop_square_clipped_at_border() {
        let image = RgbImage::new(100, 100);
        let region = Region { top: 0, right: 20, bottom: 20, left: 0 };
        let crop = crop_square(&image, &region, 0.5).unwrap();
        assert!(crop.width() <= 100 && crop.height() <= 100);
        assert_eq!((crop.width(), crop.height()), (30, 30));
    }

    #[test]
    fn test_crop_square_empty_region() {
        let image = RgbImage::new(10, 10);
        let region = Region { top: 5, right: 5, bottom: 5, left: 5 };
        assert!(crop_square(&image, &region, 0.1).is_none());
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let face = RgbImage::from_pixel(40, 40, Rgb([255, 0, 128]));
        let tensor = preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - (0.5 / 127.5)).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
