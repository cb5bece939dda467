//! General object detection (YOLOv8, COCO classes) via ONNX Runtime.
//!
//! Runs independently of the face gallery; its results are only merged
//! with face matches in the final response.

use crate::geometry::{iou_xywh, Letterbox};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Detections at or below this confidence are dropped.
pub const DEFAULT_OBJECT_CONFIDENCE: f32 = 0.5;

const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_PAD_PIXEL: f32 = 114.0;
const YOLO_NMS_IOU: f32 = 0.45;
const YOLO_BOX_VALUES: usize = 4;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

#[derive(Error, Debug)]
pub enum ObjectDetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One detected object. Serialises as `{"class", "confidence", "bbox": [x1, y1, x2, y2]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDetection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    pub bbox: [i32; 4],
}

pub trait ObjectDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<ObjectDetection>, ObjectDetectorError>;
}

/// Pre-NMS detection in original image coordinates.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    class_id: usize,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl Candidate {
    fn xywh(&self) -> (f32, f32, f32, f32) {
        (self.x1, self.y1, self.x2 - self.x1, self.y2 - self.y1)
    }
}

pub struct YoloObjectDetector {
    session: Session,
    confidence: f32,
}

impl YoloObjectDetector {
    pub fn load(model_path: &Path, confidence: f32) -> Result<Self, ObjectDetectorError> {
        if !model_path.exists() {
            return Err(ObjectDetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), confidence, "loaded YOLO object model");
        Ok(Self { session, confidence })
    }
}

impl ObjectDetector for YoloObjectDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<ObjectDetection>, ObjectDetectorError> {
        let letterbox = Letterbox::fit(image.width(), image.height(), YOLO_INPUT_SIZE);
        let input = letterbox.to_tensor(image, 0.0, 1.0 / 255.0, YOLO_PAD_PIXEL);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ObjectDetectorError::InferenceFailed(format!("predictions: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let candidates = decode_predictions(data, &dims, &letterbox, self.confidence)?;
        let kept = nms_per_class(candidates, YOLO_NMS_IOU);

        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(kept
            .into_iter()
            .map(|c| ObjectDetection {
                class_name: class_name(c.class_id),
                confidence: c.confidence,
                bbox: [
                    c.x1.clamp(0.0, w) as i32,
                    c.y1.clamp(0.0, h) as i32,
                    c.x2.clamp(0.0, w) as i32,
                    c.y2.clamp(0.0, h) as i32,
                ],
            })
            .collect())
    }
}

fn class_name(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("class_{class_id}"))
}

/// Decode a `[1, 4 + classes, anchors]` (or `[1, anchors, 4 + classes]`)
/// prediction tensor into candidates above `threshold`.
fn decode_predictions(
    data: &[f32],
    dims: &[usize],
    letterbox: &Letterbox,
    threshold: f32,
) -> Result<Vec<Candidate>, ObjectDetectorError> {
    let &[_, a, b] = dims else {
        return Err(ObjectDetectorError::InferenceFailed(format!(
            "unexpected output shape {dims:?}"
        )));
    };
    // Anchors always outnumber features for YOLOv8 exports.
    let transposed = a < b;
    let (features, anchors) = if transposed { (a, b) } else { (b, a) };
    if features <= YOLO_BOX_VALUES || data.len() < features * anchors {
        return Err(ObjectDetectorError::InferenceFailed(format!(
            "output shape {dims:?} does not fit {} values",
            data.len()
        )));
    }

    let at = |anchor: usize, feature: usize| {
        if transposed {
            data[feature * anchors + anchor]
        } else {
            data[anchor * features + feature]
        }
    };

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (YOLO_BOX_VALUES..features)
            .map(|f| (f - YOLO_BOX_VALUES, at(i, f)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        if confidence <= threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
        candidates.push(Candidate { class_id, confidence, x1, y1, x2, y2 });
    }
    Ok(candidates)
}

fn nms_per_class(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == c.class_id && iou_xywh(k.xywh(), c.xywh()) > iou_threshold);
        if !suppressed {
            keep.push(c);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a transposed `[1, 4 + classes, anchors]` tensor from per-anchor rows.
    fn transposed(rows: &[Vec<f32>]) -> (Vec<f32>, Vec<usize>) {
        let features = rows[0].len();
        let anchors = rows.len();
        let mut data = vec![0.0; features * anchors];
        for (i, row) in rows.iter().enumerate() {
            for (f, v) in row.iter().enumerate() {
                data[f * anchors + i] = *v;
            }
        }
        (data, vec![1, features, anchors])
    }

    fn row(cx: f32, cy: f32, w: f32, h: f32, scores: &[f32]) -> Vec<f32> {
        let mut r = vec![cx, cy, w, h];
        r.extend_from_slice(scores);
        r
    }

    fn candidate(class_id: usize, confidence: f32, x1: f32) -> Candidate {
        Candidate { class_id, confidence, x1, y1: 0.0, x2: x1 + 10.0, y2: 10.0 }
    }

    #[test]
    fn test_decode_transposed_output() {
        // 2 classes: 6 features over 7 anchors.
        let rows = vec![
            row(50.0, 50.0, 20.0, 40.0, &[0.1, 0.9]),
            row(10.0, 10.0, 4.0, 4.0, &[0.5, 0.2]),
            row(0.0, 0.0, 0.0, 0.0, &[0.0, 0.0]),
            row(0.0, 0.0, 0.0, 0.0, &[0.0, 0.0]),
            row(0.0, 0.0, 0.0, 0.0, &[0.0, 0.0]),
            row(0.0, 0.0, 0.0, 0.0, &[0.0, 0.0]),
            row(0.0, 0.0, 0.0, 0.0, &[0.0, 0.0]),
        ];
        let (data, dims) = transposed(&rows);
        let lb = Letterbox::fit(100, 100, 100);

        let found = decode_predictions(&data, &dims, &lb, 0.5).unwrap();
        assert_eq!(found.len(), 1, "0.5 is not above the threshold");
        let c = &found[0];
        assert_eq!(c.class_id, 1);
        assert!((c.confidence - 0.9).abs() < 1e-6);
        assert!((c.x1 - 40.0).abs() < 1e-4 && (c.y1 - 30.0).abs() < 1e-4);
        assert!((c.x2 - 60.0).abs() < 1e-4 && (c.y2 - 70.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_row_major_output() {
        // [1, anchors=6, features=5]
        let mut data = vec![10.0, 10.0, 4.0, 4.0, 0.8];
        for _ in 0..5 {
            data.extend_from_slice(&[20.0, 20.0, 4.0, 4.0, 0.3]);
        }
        let found = decode_predictions(&data, &[1, 6, 5], &Letterbox::fit(32, 32, 32), 0.5).unwrap();
        assert_eq!(found.len(), 1);
        assert!((found[0].x1 - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let lb = Letterbox::fit(32, 32, 32);
        assert!(decode_predictions(&[0.0; 4], &[4], &lb, 0.5).is_err());
        assert!(decode_predictions(&[0.0; 8], &[1, 4, 2], &lb, 0.5).is_err());
    }

    #[test]
    fn test_nms_is_per_class() {
        let kept = nms_per_class(
            vec![
                candidate(0, 0.7, 1.0),
                candidate(0, 0.9, 0.0),
                candidate(1, 0.8, 0.0),
                candidate(0, 0.6, 100.0),
            ],
            0.45,
        );
        let summary: Vec<(usize, f32)> = kept.iter().map(|c| (c.class_id, c.confidence)).collect();
        assert_eq!(summary, vec![(0, 0.9), (1, 0.8), (0, 0.6)]);
    }

    #[test]
    fn test_class_names() {
        assert_eq!(class_name(0), "person");
        assert_eq!(class_name(79), "toothbrush");
        assert_eq!(class_name(80), "class_80");
    }

    #[test]
    fn test_detection_wire_format() {
        let d = ObjectDetection { class_name: "dog".into(), confidence: 0.75, bbox: [1, 2, 3, 4] };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json, serde_json::json!({"class": "dog", "confidence": 0.75, "bbox": [1, 2, 3, 4]}));
    }

    #[test]
    fn test_load_missing_model() {
        let err = YoloObjectDetector::load(Path::new("/nonexistent/yolov8n.onnx"), 0.5).err().unwrap();
        assert!(matches!(err, ObjectDetectorError::ModelNotFound(_)));
    }
}
