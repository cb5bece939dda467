//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB image to 640x640, decodes the three anchor-free stride
//! heads (scores, box distances, keypoints) and applies NMS.

use crate::geometry::{iou_xywh, Letterbox};
use crate::types::BoundingBox;
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("SCRFD model missing at {0}")]
    ModelNotFound(String),
    #[error("SCRFD inference: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Raw outputs of one stride head.
struct StrideOutput<'a> {
    stride: usize,
    scores: &'a [f32],
    distances: &'a [f32],
    keypoints: &'a [f32],
}

/// Finds faces and their five landmarks in an RGB image.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Fails unless the model exposes all nine stride heads.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        // scores 8/16/32, then box distances 8/16/32, then keypoints 8/16/32
        let heads = session.outputs().len();
        if heads < 3 * SCRFD_STRIDES.len() {
            return Err(DetectorError::InferenceFailed(format!(
                "{} has {heads} outputs, want 9 stride heads",
                model_path.display()
            )));
        }
        tracing::debug!(path = %model_path.display(), heads, "SCRFD session ready");

        Ok(Self { session })
    }

    /// Detect faces, returning bounding boxes sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let letterbox = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
        let input = letterbox.to_tensor(image, SCRFD_MEAN, 1.0 / SCRFD_STD, SCRFD_MEAN);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let head = StrideOutput {
                stride,
                scores: extract(pos, "scores")?,
                distances: extract(pos + 3, "bboxes")?,
                keypoints: extract(pos + 6, "kps")?,
            };
            candidates.extend(decode_stride(
                &head,
                SCRFD_INPUT_SIZE as usize,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Decode one stride head into boxes in original image coordinates.
fn decode_stride(
    head: &StrideOutput<'_>,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / head.stride;
    let stride = head.stride as f32;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    (0..num_anchors)
        .filter_map(|idx| {
            let score = head.scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                return None;
            }
            let d = head.distances.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * stride;
            let ay = (cell / grid) as f32 * stride;

            let (x1, y1) = letterbox.unmap(ax - d[0] * stride, ay - d[1] * stride);
            let (x2, y2) = letterbox.unmap(ax + d[2] * stride, ay + d[3] * stride);

            let landmarks = head.keypoints.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.unmap(ax + k[i * 2] * stride, ay + k[i * 2 + 1] * stride)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Non-maximum suppression; output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        let overlaps = keep.iter().any(|k| {
            iou_xywh(
                (k.x, k.y, k.width, k.height),
                (det.x, det.y, det.width, det.height),
            ) > iou_threshold
        });
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}
