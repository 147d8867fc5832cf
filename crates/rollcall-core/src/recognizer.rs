//! Detection + encoding seam, and its ONNX Runtime implementation.

use crate::detector::FaceDetector;
use crate::encoder::FaceEncoder;
use crate::error::ErrorKind;
use crate::types::Detection;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ENCODER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl RecognizerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DetectionFailure
    }
}

/// Finds faces in an image and encodes each one.
///
/// Zero faces is an empty vector, not an error.
pub trait Recognizer {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<Detection>, RecognizerError>;
}

/// SCRFD detector + ArcFace encoder, both on CPU.
pub struct OnnxRecognizer {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxRecognizer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, RecognizerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let encoder = FaceEncoder::load(&model_dir.join(ENCODER_MODEL_FILE))?;
        Ok(Self { detector, encoder })
    }
}

impl Recognizer for OnnxRecognizer {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<Detection>, RecognizerError> {
        let faces = self.detector.detect(image)?;
        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            let encoding = self.encoder.encode(image, &face.region)?;
            detections.push(Detection {
                region: face.region,
                encoding,
                confidence: face.confidence,
            });
        }
        tracing::trace!(count = detections.len(), "faces encoded");
        Ok(detections)
    }
}
