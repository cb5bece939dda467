use crate::engine::{EngineError, EngineHandle};
use facegate_core::EnrollError;
use zbus::interface;

pub const BUS_NAME: &str = "org.facegate.Facegate1";
pub const OBJECT_PATH: &str = "/org/facegate/Facegate1";

/// D-Bus interface for the Facegate daemon.
///
/// Bus name: org.facegate.Facegate1
/// Object path: /org/facegate/Facegate1
pub struct FacegateService {
    engine: EngineHandle,
}

impl FacegateService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.facegate.Facegate1")]
impl FacegateService {
    /// Recognise faces and detect objects in an encoded image.
    /// Returns JSON `{"faces": [...], "objects": [...]}`.
    async fn detect(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::debug!(bytes = image.len(), "detect requested");
        let detection = self.engine.detect(image).await.map_err(to_fdo)?;
        to_json(&detection)
    }

    /// Enroll an image under `name`, recording the person if new.
    async fn upload_person(&self, name: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(name, bytes = image.len(), "upload_person requested");
        let upload = self
            .engine
            .upload_person(name.to_string(), image)
            .await
            .map_err(to_fdo)?;
        Ok(serde_json::json!({
            "message": format!("Person {} added successfully", upload.person.name),
            "id": upload.person.id,
            "samples": upload.samples,
        })
        .to_string())
    }

    /// Returns JSON `[{"id", "name"}]`.
    async fn list_persons(&self) -> zbus::fdo::Result<String> {
        let persons = self.engine.list_persons().await.map_err(to_fdo)?;
        to_json(&persons)
    }

    /// Delete a person's samples and record by id.
    async fn delete_person(&self, id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(id, "delete_person requested");
        let person = self.engine.delete_person(id).await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "message": format!("Person {} deleted successfully", person.name),
        })
        .to_string())
    }

    /// Rebuild the gallery index from disk.
    async fn reload(&self) -> zbus::fdo::Result<String> {
        tracing::info!("reload requested");
        let summary = self.engine.reload().await.map_err(to_fdo)?;
        to_json(&summary)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        to_json(&status)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("encoding reply: {e}")))
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::InvalidImage(_)
        | EngineError::NameRequired
        | EngineError::Enroll(EnrollError::Label(_)) => {
            tracing::debug!(error = %err, "rejecting request");
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        other => {
            tracing::warn!(error = %other, "request failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}
