//! Face gallery service: owns the store, the extractor and the current
//! index snapshot.
//!
//! Every structural change (enroll, remove, explicit rebuild) runs under one
//! writer lock as "mutate store → rebuild whole index → swap snapshot".
//! Readers clone the current `Arc<GalleryIndex>` and match against it
//! without holding any lock, so they see either the old index or the new
//! one, never a partial build.

use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::index::{FileOutcome, GalleryIndex, RebuildReport};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::store::{GalleryStore, StoreError, IMAGE_EXTENSIONS};
use crate::types::{BoundingBox, Embedding, FaceMatch, Identity, LabelError, MatchResult};
use image::{ImageFormat, RgbImage};
use std::borrow::Cow;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid label: {0}")]
    Label(#[from] LabelError),
    #[error("reading {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollReceipt {
    pub identity: Identity,
    /// Where the sample was written in the store.
    pub path: PathBuf,
    /// Faces the new image contributed to the index (0 if none was found).
    pub samples: usize,
}

pub struct FaceService<E> {
    store: GalleryStore,
    extractor: Mutex<E>,
    matcher: EuclideanMatcher,
    index: RwLock<Arc<GalleryIndex>>,
    writer: Mutex<()>,
}

impl<E: EmbeddingExtractor> FaceService<E> {
    /// Create the service with an empty index. Call [`rebuild`](Self::rebuild)
    /// to load the gallery.
    pub fn new(store: GalleryStore, extractor: E, matcher: EuclideanMatcher) -> Self {
        Self {
            store,
            extractor: Mutex::new(extractor),
            matcher,
            index: RwLock::new(Arc::new(GalleryIndex::empty())),
            writer: Mutex::new(()),
        }
    }

    /// Create the service and load the gallery.
    pub fn open(
        store: GalleryStore,
        extractor: E,
        matcher: EuclideanMatcher,
    ) -> Result<(Self, RebuildReport), StoreError> {
        let service = Self::new(store, extractor, matcher);
        let report = service.rebuild()?;
        Ok((service, report))
    }

    pub fn store(&self) -> &GalleryStore {
        &self.store
    }

    pub fn tolerance(&self) -> f32 {
        self.matcher.tolerance
    }

    /// The index readers currently see.
    pub fn snapshot(&self) -> Arc<GalleryIndex> {
        Arc::clone(&self.index.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Rebuild the index from the store and swap it in.
    ///
    /// On error the previous index stays in place.
    pub fn rebuild(&self) -> Result<RebuildReport, StoreError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.rebuild_locked()
    }

    fn rebuild_locked(&self) -> Result<RebuildReport, StoreError> {
        let mut extractor = SharedExtractor(&self.extractor);
        let (index, report) = GalleryIndex::build(&self.store, &mut extractor)?;
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
        Ok(report)
    }

    /// Resolve one query embedding against the current snapshot.
    pub fn resolve(&self, query: &Embedding) -> MatchResult {
        self.matcher.resolve(query, &self.snapshot())
    }

    /// Find every face in `image` and resolve each one.
    pub fn recognize(&self, image: &RgbImage) -> Result<Vec<FaceMatch>, ExtractError> {
        let faces = SharedExtractor(&self.extractor).faces(image)?;
        let index = self.snapshot();
        Ok(faces
            .iter()
            .map(|(face, embedding)| FaceMatch::new(face, &self.matcher.resolve(embedding, &index)))
            .collect())
    }

    /// Labels present in the store.
    pub fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.store.identities()
    }

    /// Enroll an encoded image (any format `image` can decode).
    ///
    /// JPEG, PNG and BMP are stored as-is; other formats are re-encoded as
    /// PNG so the gallery scan will pick them up.
    pub fn try_enroll_bytes(&self, bytes: &[u8], label: &str) -> Result<EnrollReceipt, EnrollError> {
        let identity = Identity::parse(label)?;
        let (bytes, extension) = prepare_sample(bytes, None)?;
        self.commit_sample(identity, &bytes, extension)
    }

    /// Enroll an image file, keeping its extension when the gallery accepts it.
    pub fn try_enroll_file(&self, path: &Path, label: &str) -> Result<EnrollReceipt, EnrollError> {
        let identity = Identity::parse(label)?;
        let bytes = std::fs::read(path).map_err(|source| EnrollError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let preferred = path.extension().and_then(|e| e.to_str());
        let (bytes, extension) = prepare_sample(&bytes, preferred)?;
        self.commit_sample(identity, &bytes, extension)
    }

    /// [`try_enroll_file`](Self::try_enroll_file), reporting only success.
    /// Failures are logged.
    pub fn enroll(&self, path: &Path, label: &str) -> bool {
        log_enroll(label, self.try_enroll_file(path, label))
    }

    /// [`try_enroll_bytes`](Self::try_enroll_bytes), reporting only success.
    /// Failures are logged.
    pub fn enroll_bytes(&self, bytes: &[u8], label: &str) -> bool {
        log_enroll(label, self.try_enroll_bytes(bytes, label))
    }

    fn commit_sample(
        &self,
        identity: Identity,
        bytes: &[u8],
        extension: &str,
    ) -> Result<EnrollReceipt, EnrollError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.store.write_sample(&identity, bytes, extension)?;
        let report = self.rebuild_locked()?;

        let samples = match report.outcome_for(&path) {
            Some(FileOutcome::Loaded { samples }) => *samples,
            _ => 0,
        };
        if samples == 0 {
            tracing::warn!(identity = %identity, path = %path.display(), "enrolled image has no usable face");
        }

        Ok(EnrollReceipt {
            identity,
            path,
            samples,
        })
    }

    /// Delete every sample in an identity's folder and rebuild.
    ///
    /// Returns whether the identity had a folder. A missing folder is not an
    /// error. Legacy flat files (`<root>/<label>.<ext>`) are left on disk, so
    /// an identity that has one keeps that sample after removal.
    pub fn try_remove(&self, label: &str) -> Result<bool, EnrollError> {
        let identity = Identity::parse(label)?;
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let existed = self.store.remove_identity(&identity)?;
        self.rebuild_locked()?;
        tracing::info!(identity = %identity, existed, "identity removed");
        Ok(existed)
    }

    /// [`try_remove`](Self::try_remove), reporting only success. Failures
    /// are logged. Legacy flat files survive, as with `try_remove`.
    pub fn remove(&self, label: &str) -> bool {
        match self.try_remove(label) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(label, error = %e, "remove failed");
                false
            }
        }
    }
}

fn log_enroll(label: &str, result: Result<EnrollReceipt, EnrollError>) -> bool {
    match result {
        Ok(receipt) => {
            tracing::info!(
                identity = %receipt.identity,
                samples = receipt.samples,
                path = %receipt.path.display(),
                "enrolled"
            );
            true
        }
        Err(e) => {
            tracing::warn!(label, error = %e, "enroll failed");
            false
        }
    }
}

/// Check the bytes decode and pick the file extension to store them under.
fn prepare_sample<'a>(
    bytes: &'a [u8],
    preferred: Option<&str>,
) -> Result<(Cow<'a, [u8]>, &'static str), EnrollError> {
    let format = image::guess_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format)?;

    let preferred = preferred.and_then(|ext| {
        IMAGE_EXTENSIONS
            .iter()
            .copied()
            .find(|ok| ext.eq_ignore_ascii_case(ok))
            .filter(|ok| ImageFormat::from_extension(ok) == Some(format))
    });

    let stored = match format {
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Bmp => Some("bmp"),
        _ => None,
    };

    match preferred.or(stored) {
        Some(ext) => Ok((Cow::Borrowed(bytes), ext)),
        None => {
            let mut png = Vec::new();
            decoded.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
            Ok((Cow::Owned(png), "png"))
        }
    }
}

/// Per-call locking view of the service's extractor.
struct SharedExtractor<'a, E>(&'a Mutex<E>);

impl<E: EmbeddingExtractor> SharedExtractor<'_, E> {
    fn lock(&self) -> std::sync::MutexGuard<'_, E> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: EmbeddingExtractor> EmbeddingExtractor for SharedExtractor<'_, E> {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ExtractError> {
        self.lock().locate_faces(image)
    }

    fn extract_embeddings(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractError> {
        self.lock().extract_embeddings(image, boxes)
    }

    fn faces(&mut self, image: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, ExtractError> {
        self.lock().faces(image)
    }
}
