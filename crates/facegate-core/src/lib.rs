//! facegate-core: face gallery, matching, and detection engine.
//!
//! Known faces live as image files in a [`GalleryStore`]; a [`FaceService`]
//! rebuilds an in-memory [`GalleryIndex`] of their embeddings and resolves
//! query faces against it by nearest Euclidean distance. Face and object
//! models run through ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod geometry;
pub mod index;
pub mod matcher;
pub mod objects;
pub mod recognizer;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use extractor::{EmbeddingExtractor, ExtractError, OnnxExtractor};
pub use index::{FileOutcome, GalleryIndex, RebuildReport};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_TOLERANCE};
pub use objects::{ObjectDetection, ObjectDetector, YoloObjectDetector};
pub use service::{EnrollError, EnrollReceipt, FaceService};
pub use store::{GalleryStore, Layout, StoreError};
pub use types::{BoundingBox, Embedding, FaceMatch, Identity, MatchResult, UNKNOWN_LABEL};

use std::path::PathBuf;

/// Where ONNX models are looked up when no directory is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facegate/models")
}

/// `$XDG_DATA_HOME/facegate`, or `~/.local/share/facegate` when unset.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}
