use crate::config::Config;
use crate::persons::{Person, PersonStore, RecordError};
use facegate_core::{
    EmbeddingExtractor, EnrollError, EuclideanMatcher, ExtractError, FaceMatch, FaceService,
    GalleryStore, ObjectDetection, ObjectDetector, OnnxExtractor, RebuildReport, StoreError,
    YoloObjectDetector,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    InvalidImage(#[source] image::ImageError),
    #[error("name is required")]
    NameRequired,
    #[error("enroll failed: {0}")]
    Enroll(#[from] EnrollError),
    #[error("face extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("gallery store: {0}")]
    Store(#[from] StoreError),
    #[error("person records: {0}")]
    Records(#[from] RecordError),
    #[error("person not found")]
    PersonNotFound(i64),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Faces and objects found in one query image.
#[derive(Debug, Serialize)]
pub struct Detection {
    pub faces: Vec<FaceMatch>,
    pub objects: Vec<ObjectDetection>,
}

/// Result of uploading a person image.
#[derive(Debug)]
pub struct Upload {
    pub person: Person,
    /// Faces the image contributed to the index.
    pub samples: usize,
}

#[derive(Debug, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Summary of a gallery rebuild.
#[derive(Debug, Serialize)]
pub struct ReloadSummary {
    pub files: usize,
    pub samples: usize,
    pub identities: usize,
    pub without_faces: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub version: &'static str,
    pub gallery: String,
    pub samples: usize,
    pub identities: usize,
    pub tolerance: f32,
    pub objects_enabled: bool,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Detect { image: Vec<u8>, reply: Reply<Detection> },
    UploadPerson { name: String, image: Vec<u8>, reply: Reply<Upload> },
    ListPersons { reply: Reply<Vec<Person>> },
    DeletePerson { id: i64, reply: Reply<Person> },
    Reload { reply: Reply<ReloadSummary> },
    Status { reply: Reply<Status> },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Recognise faces and detect objects in an encoded image.
    pub async fn detect(&self, image: Vec<u8>) -> Result<Detection, EngineError> {
        self.request(|reply| EngineRequest::Detect { image, reply }).await
    }

    /// Enroll an image under `name` and record the person.
    pub async fn upload_person(&self, name: String, image: Vec<u8>) -> Result<Upload, EngineError> {
        self.request(|reply| EngineRequest::UploadPerson { name, image, reply })
            .await
    }

    pub async fn list_persons(&self) -> Result<Vec<Person>, EngineError> {
        self.request(|reply| EngineRequest::ListPersons { reply }).await
    }

    /// Remove a person's samples and record.
    pub async fn delete_person(&self, id: i64) -> Result<Person, EngineError> {
        self.request(|reply| EngineRequest::DeletePerson { id, reply }).await
    }

    pub async fn reload(&self) -> Result<ReloadSummary, EngineError> {
        self.request(|reply| EngineRequest::Reload { reply }).await
    }

    pub async fn status(&self) -> Result<Status, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Everything the engine thread owns.
pub struct Engine<E> {
    service: FaceService<E>,
    persons: PersonStore,
    objects: Option<Box<dyn ObjectDetector>>,
}

impl<E: EmbeddingExtractor> Engine<E> {
    pub fn new(
        service: FaceService<E>,
        persons: PersonStore,
        objects: Option<Box<dyn ObjectDetector>>,
    ) -> Self {
        Self {
            service,
            persons,
            objects,
        }
    }

    fn handle(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Detect { image, reply } => {
                let _ = reply.send(self.detect(&image));
            }
            EngineRequest::UploadPerson { name, image, reply } => {
                let _ = reply.send(self.upload_person(&name, &image));
            }
            EngineRequest::ListPersons { reply } => {
                let _ = reply.send(self.persons.list().map_err(EngineError::from));
            }
            EngineRequest::DeletePerson { id, reply } => {
                let _ = reply.send(self.delete_person(id));
            }
            EngineRequest::Reload { reply } => {
                let _ = reply.send(self.reload());
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
        }
    }

    fn detect(&mut self, bytes: &[u8]) -> Result<Detection, EngineError> {
        let image = image::load_from_memory(bytes)
            .map_err(EngineError::InvalidImage)?
            .to_rgb8();

        let faces = self.service.recognize(&image)?;

        let objects = match self.objects.as_mut() {
            Some(detector) => detector.detect(&image).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "object detection failed");
                Vec::new()
            }),
            None => Vec::new(),
        };

        tracing::debug!(
            width = image.width(),
            height = image.height(),
            faces = faces.len(),
            known = faces.iter().filter(|f| f.is_known).count(),
            objects = objects.len(),
            "detect"
        );
        Ok(Detection { faces, objects })
    }

    fn upload_person(&mut self, name: &str, bytes: &[u8]) -> Result<Upload, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::NameRequired);
        }

        let receipt = self.service.try_enroll_bytes(bytes, name)?;
        let person = self.persons.ensure(receipt.identity.as_str())?;

        tracing::info!(
            id = person.id,
            name = %person.name,
            samples = receipt.samples,
            "person uploaded"
        );
        Ok(Upload {
            person,
            samples: receipt.samples,
        })
    }

    fn delete_person(&mut self, id: i64) -> Result<Person, EngineError> {
        let person = self
            .persons
            .get(id)?
            .ok_or(EngineError::PersonNotFound(id))?;

        self.service.try_remove(&person.name)?;
        self.persons.delete(id)?;

        tracing::info!(id, name = %person.name, "person deleted");
        Ok(person)
    }

    fn reload(&self) -> Result<ReloadSummary, EngineError> {
        let report = self.service.rebuild()?;
        Ok(self.summarize(&report))
    }

    fn summarize(&self, report: &RebuildReport) -> ReloadSummary {
        ReloadSummary {
            files: report.files.len(),
            samples: report.samples(),
            identities: self.service.snapshot().identity_counts().len(),
            without_faces: report.without_faces().count(),
            skipped: report
                .skipped()
                .map(|f| SkippedFile {
                    path: f.path.display().to_string(),
                    reason: match &f.outcome {
                        facegate_core::FileOutcome::Skipped { reason } => reason.clone(),
                        _ => String::new(),
                    },
                })
                .collect(),
        }
    }

    fn status(&self) -> Status {
        let index = self.service.snapshot();
        Status {
            version: env!("CARGO_PKG_VERSION"),
            gallery: self.service.store().root().display().to_string(),
            samples: index.len(),
            identities: index.identity_counts().len(),
            tolerance: self.service.tolerance(),
            objects_enabled: self.objects.is_some(),
        }
    }
}

/// Load the models, open both stores, build the gallery index, then start
/// the engine thread. Fails fast if a face model or store is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let store = GalleryStore::open(&config.gallery_dir)?;

    let extractor = OnnxExtractor::load(&config.model_dir)?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");

    let persons = PersonStore::open(&config.db_path)?;
    tracing::info!(path = %config.db_path.display(), "person table opened");

    let objects = load_object_detector(config);

    let (service, report) =
        FaceService::open(store, extractor, EuclideanMatcher::new(config.tolerance))?;
    tracing::info!(
        gallery = %config.gallery_dir.display(),
        samples = report.samples(),
        skipped = report.skipped().count(),
        tolerance = config.tolerance,
        "gallery loaded"
    );

    Ok(spawn(Engine::new(service, persons, objects)))
}

fn load_object_detector(config: &Config) -> Option<Box<dyn ObjectDetector>> {
    if !config.objects_enabled {
        tracing::info!("object detection disabled via FACEGATE_OBJECTS_ENABLED=0");
        return None;
    }
    match YoloObjectDetector::load(&config.object_model_path(), config.object_confidence) {
        Ok(detector) => Some(Box::new(detector)),
        Err(e) => {
            tracing::warn!(error = %e, "object model unavailable; object detection disabled");
            None
        }
    }
}

/// Run `engine` on a dedicated OS thread and return a handle to it.
pub fn spawn<E>(mut engine: Engine<E>) -> EngineHandle
where
    E: EmbeddingExtractor + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                engine.handle(request);
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}
