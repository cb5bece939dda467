use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Label reported for a face that matched nothing in the gallery.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer `[left, top, right, bottom]` corners, the wire format for face boxes.
    pub fn to_ltrb(&self) -> [i32; 4] {
        [
            self.x.round() as i32,
            self.y.round() as i32,
            (self.x + self.width).round() as i32,
            (self.y + self.height).round() as i32,
        ]
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings of the same dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("identity label is empty")]
    Empty,
    #[error("identity label {0:?} is not a single path component")]
    NotAPathComponent(String),
    #[error("identity label {0:?} is reserved")]
    Reserved(String),
}

/// Name of an enrolled person. Derived from the gallery directory layout;
/// there is no separate identity record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(String);

impl Identity {
    /// Validate a label supplied by a caller (e.g. at enrollment).
    ///
    /// The label becomes a directory name, so it must be one path component.
    pub fn parse(label: &str) -> Result<Self, LabelError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(LabelError::Empty);
        }
        if label == "."
            || label == ".."
            || label.contains(['/', '\\', '\0'])
        {
            return Err(LabelError::NotAPathComponent(label.to_string()));
        }
        if label == UNKNOWN_LABEL {
            return Err(LabelError::Reserved(label.to_string()));
        }
        Ok(Self(label.to_string()))
    }

    /// Wrap a label read back from the gallery store without validation.
    pub(crate) fn from_store(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity decision for one query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, `None` when the query is unknown.
    pub identity: Option<Identity>,
    /// Distance to the closest gallery sample, `None` for an empty gallery.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn unknown(distance: Option<f32>) -> Self {
        Self {
            identity: None,
            distance,
        }
    }

    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }

    /// The matched label, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        self.identity
            .as_ref()
            .map(Identity::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }
}

/// A recognised (or unrecognised) face in a query image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub name: String,
    /// `[left, top, right, bottom]` in image pixels.
    pub bbox: [i32; 4],
    pub is_known: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl FaceMatch {
    pub fn new(face: &BoundingBox, result: &MatchResult) -> Self {
        Self {
            name: result.label().to_string(),
            bbox: face.to_ltrb(),
            is_known: result.is_known(),
            distance: result.distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_identity_parse_trims() {
        let id = Identity::parse("  Alice ").unwrap();
        assert_eq!(id.as_str(), "Alice");
    }

    #[test]
    fn test_identity_parse_rejects_bad_labels() {
        assert_eq!(Identity::parse("   "), Err(LabelError::Empty));
        assert!(matches!(Identity::parse("a/b"), Err(LabelError::NotAPathComponent(_))));
        assert!(matches!(Identity::parse("..\\x"), Err(LabelError::NotAPathComponent(_))));
        assert!(matches!(Identity::parse(".."), Err(LabelError::NotAPathComponent(_))));
        assert!(matches!(Identity::parse("unknown"), Err(LabelError::Reserved(_))));
    }

    #[test]
    fn test_match_result_labels() {
        let unknown = MatchResult::unknown(None);
        assert!(!unknown.is_known());
        assert_eq!(unknown.label(), UNKNOWN_LABEL);

        let known = MatchResult {
            identity: Some(Identity::parse("Bob").unwrap()),
            distance: Some(0.1),
        };
        assert!(known.is_known());
        assert_eq!(known.label(), "Bob");
    }

    #[test]
    fn test_face_match_wire_format() {
        let face = BoundingBox {
            x: 10.2, y: 20.0, width: 30.0, height: 40.6,
            confidence: 0.9, landmarks: None,
        };
        let m = FaceMatch::new(&face, &MatchResult::unknown(None));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["name"], "unknown");
        assert_eq!(json["bbox"], serde_json::json!([10, 20, 40, 61]));
        assert_eq!(json["is_known"], false);
        assert!(json.get("distance").is_none());
    }
}
