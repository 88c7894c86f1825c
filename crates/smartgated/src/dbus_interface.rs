use std::sync::Arc;

use serde::Serialize;
use smartgate_core::envelope::Envelope;
use smartgate_core::ImagePayload;
use zbus::interface;

use crate::service::FaceService;

pub const BUS_NAME: &str = "io.smartgate.Gate1";
pub const OBJECT_PATH: &str = "/io/smartgate/Gate1";

/// D-Bus interface for the SmartGate attendance daemon.
///
/// Bus name: io.smartgate.Gate1
/// Object path: /io/smartgate/Gate1
///
/// Every method returns its JSON envelope as a string; operation failures
/// are carried inside the envelope, not as D-Bus errors.
pub struct GateService {
    service: Arc<FaceService>,
}

impl GateService {
    pub fn new(service: Arc<FaceService>) -> Self {
        Self { service }
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn reply<T: Envelope>(method: &str, envelope: &T) -> zbus::fdo::Result<String> {
    tracing::debug!(method, status = envelope.status_code(), "reply");
    to_json(envelope)
}

#[interface(name = "io.smartgate.Gate1")]
impl GateService {
    /// Enroll a new face under `name`.
    async fn add_face(&self, img: &str, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "add_face requested");
        reply("AddFace", &self.service.add_face(&ImagePayload::new(img), name).await)
    }

    /// Match a face against every enrolled identity.
    async fn verify_face(&self, img: &str) -> zbus::fdo::Result<String> {
        tracing::info!("verify_face requested");
        reply("VerifyFace", &self.service.verify_face(&ImagePayload::new(img)).await)
    }

    async fn replace_face(&self, id: &str, img: &str, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(face_id = id, name, "replace_face requested");
        reply(
            "ReplaceFace",
            &self
                .service
                .replace_face(id, &ImagePayload::new(img), name)
                .await,
        )
    }

    /// Remove a face and its attendance history.
    async fn delete_face(&self, id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(face_id = id, "delete_face requested");
        reply("DeleteFace", &self.service.delete_face(id).await)
    }

    /// Verify and record attendance for the matched face.
    async fn sign_in(&self, img: &str) -> zbus::fdo::Result<String> {
        tracing::info!("sign_in requested");
        reply("SignIn", &self.service.sign_in(&ImagePayload::new(img)).await)
    }

    async fn list_faces(&self) -> zbus::fdo::Result<String> {
        to_json(&self.service.list_faces().await)
    }

    /// Attendance history for one face, or for everyone when `face_id` is empty.
    async fn attendance(&self, face_id: &str) -> zbus::fdo::Result<String> {
        to_json(&self.service.attendance(face_id).await)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.service.status().await)
    }
}
