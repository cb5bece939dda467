//! In-memory gallery index: parallel (embedding, identity) lists derived
//! from the gallery store.
//!
//! An index is immutable once built. Changes to the store produce a whole
//! new index through [`GalleryIndex::build`]; there is no way to add or
//! remove a single sample.

use crate::extractor::EmbeddingExtractor;
use crate::store::{GalleryStore, Layout, StoreError};
use crate::types::{Embedding, Identity, UNKNOWN_LABEL};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What happened to one gallery image during a rebuild.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Decoded and contributed `samples` embeddings (one per face).
    Loaded { samples: usize },
    /// Decoded, but no face was found. Not an error.
    NoFace,
    /// Unreadable, undecodable, extraction failed, or filed under the
    /// reserved `unknown` label.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub path: PathBuf,
    pub identity: Identity,
    pub layout: Layout,
    pub outcome: FileOutcome,
}

/// Per-file account of a rebuild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport {
    pub files: Vec<FileReport>,
}

impl RebuildReport {
    /// Total samples added across all files.
    pub fn samples(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f.outcome {
                FileOutcome::Loaded { samples } => samples,
                _ => 0,
            })
            .sum()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Skipped { .. }))
    }

    pub fn without_faces(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.outcome == FileOutcome::NoFace)
    }

    pub fn outcome_for(&self, path: &Path) -> Option<&FileOutcome> {
        self.files.iter().find(|f| f.path == path).map(|f| &f.outcome)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GalleryIndex {
    embeddings: Vec<Embedding>,
    labels: Vec<Identity>,
}

impl GalleryIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index directly from samples, bypassing the store.
    ///
    /// Samples whose dimension differs from the first one are dropped.
    pub fn from_samples(samples: impl IntoIterator<Item = (Embedding, Identity)>) -> Self {
        let mut index = Self::empty();
        for (embedding, identity) in samples {
            if index.accepts(&embedding) {
                index.embeddings.push(embedding);
                index.labels.push(identity);
            }
        }
        index
    }

    /// Scan the store and extract every face of every accepted image.
    ///
    /// Per-image failures are recorded in the report and skipped. Only a
    /// failure to list the store root aborts the build.
    pub fn build<E>(store: &GalleryStore, extractor: &mut E) -> Result<(Self, RebuildReport), StoreError>
    where
        E: EmbeddingExtractor + ?Sized,
    {
        let entries = store.scan()?;
        let mut index = Self::empty();
        let mut report = RebuildReport::default();

        for entry in entries {
            let outcome = if entry.identity.as_str() == UNKNOWN_LABEL {
                FileOutcome::Skipped {
                    reason: format!("label {UNKNOWN_LABEL:?} is reserved for unmatched faces"),
                }
            } else {
                index.load_image(&entry.path, &entry.identity, extractor)
            };
            if let FileOutcome::Skipped { reason } = &outcome {
                tracing::warn!(path = %entry.path.display(), %reason, "skipping gallery image");
            }
            report.files.push(FileReport {
                path: entry.path,
                identity: entry.identity,
                layout: entry.layout,
                outcome,
            });
        }

        tracing::info!(
            root = %store.root().display(),
            files = report.files.len(),
            samples = index.len(),
            identities = index.identity_counts().len(),
            skipped = report.skipped().count(),
            "gallery index built"
        );

        Ok((index, report))
    }

    fn load_image<E>(&mut self, path: &Path, identity: &Identity, extractor: &mut E) -> FileOutcome
    where
        E: EmbeddingExtractor + ?Sized,
    {
        let image = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => return FileOutcome::Skipped { reason: format!("decode: {e}") },
        };

        let faces = match extractor.faces(&image) {
            Ok(faces) => faces,
            Err(e) => return FileOutcome::Skipped { reason: format!("extract: {e}") },
        };
        if faces.is_empty() {
            tracing::debug!(path = %path.display(), "no face in gallery image");
            return FileOutcome::NoFace;
        }

        if let Some(bad) = faces.iter().find(|(_, e)| !self.accepts(e)) {
            return FileOutcome::Skipped {
                reason: format!(
                    "embedding dimension {} does not match gallery dimension {}",
                    bad.1.dim(),
                    self.dim().unwrap_or_default()
                ),
            };
        }

        let samples = faces.len();
        for (_, embedding) in faces {
            self.embeddings.push(embedding);
            self.labels.push(identity.clone());
        }
        FileOutcome::Loaded { samples }
    }

    fn accepts(&self, embedding: &Embedding) -> bool {
        self.dim().map_or(true, |d| d == embedding.dim())
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Embedding dimension, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.embeddings.first().map(Embedding::dim)
    }

    /// Samples in index order.
    pub fn samples(&self) -> impl Iterator<Item = (&Embedding, &Identity)> {
        self.embeddings.iter().zip(self.labels.iter())
    }

    pub fn identity_at(&self, position: usize) -> Option<&Identity> {
        self.labels.get(position)
    }

    /// Number of samples per identity.
    pub fn identity_counts(&self) -> BTreeMap<&Identity, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }

    pub fn sample_count(&self, identity: &str) -> usize {
        self.labels.iter().filter(|l| l.as_str() == identity).count()
    }
}
