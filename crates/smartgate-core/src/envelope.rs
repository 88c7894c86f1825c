//! Uniform `{success, ..., message}` response envelopes.
//!
//! Every operation outcome, including failures, is rendered into one of
//! these; callers never see a raw [`CoreError`]. The JSON shapes match the
//! HTTP surface (`POST /faces`, `POST /faces/verify`, `PUT /faces/{id}`,
//! `DELETE /faces/{id}`).

use serde::{Deserialize, Serialize};

use crate::coordinator::DeleteOutcome;
use crate::error::CoreError;
use crate::types::{AttendanceId, FaceId, FaceMatch, MatchResult};

pub const MSG_ADDED: &str = "Face added successfully";
pub const MSG_UPDATED: &str = "Face updated successfully";
pub const MSG_NO_MATCH: &str = "No matching face found";
pub const MSG_NOT_FOUND: &str = "Face not found";
pub const MSG_UPDATE_FAILED: &str = "Failed to update face";
pub const MSG_NOT_RECOGNIZED: &str = "Face not recognized";

/// Message shown for a failed operation. Not-found and update-failed keep
/// their own wording; everything else is prefixed with `Error:`.
pub fn failure_message(err: &CoreError) -> String {
    match err {
        CoreError::NotFound(_) => MSG_NOT_FOUND.to_string(),
        CoreError::UpdateFailed(_) => MSG_UPDATE_FAILED.to_string(),
        other => format!("Error: {other}"),
    }
}

/// Status a transport reports alongside an envelope. The `success` flag
/// carries the outcome; the status is fixed per operation.
pub trait Envelope: Serialize {
    fn status_code(&self) -> u16 {
        200
    }
}

/// Response to add (`201`) and replace (`200`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    pub message: String,
    /// Set for add, which creates a resource.
    #[serde(skip)]
    pub created: bool,
}

impl FaceResponse {
    pub fn added(id: FaceId) -> Self {
        Self {
            success: true,
            face_id: Some(id.to_string()),
            message: MSG_ADDED.to_string(),
            created: true,
        }
    }

    pub fn updated(id: FaceId) -> Self {
        Self {
            success: true,
            face_id: Some(id.to_string()),
            message: MSG_UPDATED.to_string(),
            created: false,
        }
    }

    /// Failed add; keeps the add status.
    pub fn add_failure(err: &CoreError) -> Self {
        Self {
            created: true,
            ..Self::failure(err)
        }
    }

    /// Failed replace.
    pub fn failure(err: &CoreError) -> Self {
        Self {
            success: false,
            face_id: None,
            message: failure_message(err),
            created: false,
        }
    }
}

impl Envelope for FaceResponse {
    fn status_code(&self) -> u16 {
        if self.created {
            201
        } else {
            200
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub verified: bool,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub face_match: Option<FaceMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerifyResponse {
    pub fn from_match(result: MatchResult) -> Self {
        match result.face {
            Some(face) => Self {
                success: true,
                verified: true,
                face_match: Some(face),
                message: None,
            },
            None => Self {
                success: true,
                verified: false,
                face_match: None,
                message: Some(MSG_NO_MATCH.to_string()),
            },
        }
    }

    pub fn failure(err: &CoreError) -> Self {
        Self {
            success: false,
            verified: false,
            face_match: None,
            message: Some(failure_message(err)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    /// Attendance records removed with the face. Reported in `message` only.
    #[serde(skip)]
    pub cascaded: Option<u64>,
}

impl DeleteResponse {
    pub fn deleted(outcome: DeleteOutcome) -> Self {
        Self {
            success: true,
            message: format!(
                "Face and {} attendance records deleted successfully",
                outcome.cascaded
            ),
            cascaded: Some(outcome.cascaded),
        }
    }

    pub fn failure(err: &CoreError) -> Self {
        Self {
            success: false,
            message: failure_message(err),
            cascaded: None,
        }
    }
}

/// Response to a sign-in: a verification that, on a match, also appended an
/// attendance event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance_id: Option<String>,
    pub message: String,
}

impl SignInResponse {
    pub fn signed_in(face: &FaceMatch, attendance_id: AttendanceId) -> Self {
        Self {
            success: true,
            face_id: Some(face.id.to_string()),
            name: Some(face.name.clone()),
            attendance_id: Some(attendance_id.to_string()),
            message: format!("Welcome, {}", face.name),
        }
    }

    pub fn not_recognized() -> Self {
        Self {
            success: false,
            face_id: None,
            name: None,
            attendance_id: None,
            message: MSG_NOT_RECOGNIZED.to_string(),
        }
    }

    pub fn failure(err: &CoreError) -> Self {
        Self {
            message: failure_message(err),
            ..Self::not_recognized()
        }
    }
}

impl Envelope for VerifyResponse {}
impl Envelope for DeleteResponse {}
impl Envelope for SignInResponse {}
