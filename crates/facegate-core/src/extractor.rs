//! Face embedding extraction seam.
//!
//! The gallery only needs two calls from a face model: where are the faces,
//! and what is the embedding of each. [`OnnxExtractor`] answers both with
//! SCRFD + ArcFace; tests substitute their own implementation.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("extractor returned {embeddings} embeddings for {boxes} faces")]
    CountMismatch { boxes: usize, embeddings: usize },
    #[error("{0}")]
    Other(String),
}

/// Produces face boxes and per-face embeddings for an image.
///
/// `&mut self` because inference sessions are stateful.
pub trait EmbeddingExtractor: Send {
    /// Locate faces, ordered as the model reports them.
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ExtractError>;

    /// One embedding per box, in the same order as `boxes`.
    fn extract_embeddings(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractError>;

    /// Locate faces and pair every box with its embedding.
    fn faces(&mut self, image: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, ExtractError> {
        let boxes = self.locate_faces(image)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.extract_embeddings(image, &boxes)?;
        if embeddings.len() != boxes.len() {
            return Err(ExtractError::CountMismatch {
                boxes: boxes.len(),
                embeddings: embeddings.len(),
            });
        }
        Ok(boxes.into_iter().zip(embeddings).collect())
    }
}

/// SCRFD detector + ArcFace recogniser running on ONNX Runtime.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let scrfd = model_dir.join(SCRFD_MODEL_FILE);
        let arcface = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd)?;
        tracing::info!(path = %scrfd.display(), "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(&arcface)?;
        tracing::info!(path = %arcface.display(), "ArcFace recognizer loaded");

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ExtractError> {
        Ok(self.detector.detect(image)?)
    }

    fn extract_embeddings(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractError> {
        boxes
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(ExtractError::from))
            .collect()
    }
}
