use serde_json::json;
use thiserror::Error;

use crate::publication::PublicationStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradeError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    InvariantViolation(String),

    #[error("cannot {action} while {from}")]
    InvalidTransition {
        action: &'static str,
        from: PublicationStatus,
    },

    #[error("grades are locked: the edit window closed after publication")]
    EditLocked,

    #[error("{0} requires an administrator")]
    PermissionDenied(&'static str),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl GradeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable wire code, used as `error.code` in IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_failed",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::EditLocked => "edit_locked",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound { .. } => "not_found",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { details, .. } => details.clone(),
            Self::InvalidTransition { action, from } => Some(json!({
                "action": action,
                "status": from,
            })),
            Self::EditLocked => Some(json!({ "timeRemainingSeconds": null })),
            Self::NotFound { kind, id } => Some(json!({ "kind": kind, "id": id })),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;
