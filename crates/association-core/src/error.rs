//! Error types for association operations
//!
//! Every terminal error carries a [`ErrorKind`] plus a message so that an
//! outer HTTP layer can map it to a status code with [`AssociationError::http_status`].

use crate::notify::NotificationError;
use crate::store::StoreError;
use crate::types::WipeItemFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for association operations
pub type Result<T> = std::result::Result<T, AssociationError>;

/// Flat classification of [`AssociationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationFailed,
    NotFound,
    Conflict,
    PreconditionFailed,
    Unauthorized,
    ReplaceFailed,
    WipeFailed,
    NotificationError,
    Timeout,
    Technical,
}

/// Step of the replacement workflow that rejected the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStep {
    Validate,
    ResolveCurrent,
    ResolveReplacement,
    Ownership,
    CurrentDeviceState,
    ReplacementDeviceState,
    VehicleProfile,
    /// Vehicle attribute push to SWM
    VehicleUpdate,
    Commit,
}

impl fmt::Display for ReplaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplaceStep::Validate => "validate",
            ReplaceStep::ResolveCurrent => "resolve_current",
            ReplaceStep::ResolveReplacement => "resolve_replacement",
            ReplaceStep::Ownership => "ownership",
            ReplaceStep::CurrentDeviceState => "current_device_state",
            ReplaceStep::ReplacementDeviceState => "replacement_device_state",
            ReplaceStep::VehicleProfile => "vehicle_profile",
            ReplaceStep::VehicleUpdate => "vehicle_update",
            ReplaceStep::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while orchestrating associations
#[derive(Debug, Error)]
pub enum AssociationError {
    /// Malformed or empty required input
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Zero matches
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Ambiguous match or exclusivity violation
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Wrong lifecycle state or in-flight conflicting transaction
    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// Caller does not own the association
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Device replacement rejected or failed
    #[error("Device replace failed at {step}: {message}")]
    ReplaceFailed { step: ReplaceStep, message: String },

    /// Every item of a bulk wipe failed
    #[error("Wipe failed for {} device(s)", .failures.len())]
    WipeFailed { failures: Vec<WipeItemFailure> },

    /// Observer fan-out failed; the state change named by `association_id`
    /// stays committed
    #[error("Notification failed: {source}")]
    Notification {
        association_id: Option<String>,
        #[source]
        source: NotificationError,
    },

    /// External collaborator did not answer in time
    #[error("{collaborator} call timed out after {after_ms} ms")]
    Timeout { collaborator: String, after_ms: u64 },

    /// Unexpected downstream error
    #[error("Technical error: {message}")]
    Technical { message: String },
}

impl AssociationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed { message: message.into() }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn replace_failed(step: ReplaceStep, message: impl Into<String>) -> Self {
        Self::ReplaceFailed {
            step,
            message: message.into(),
        }
    }

    pub fn timeout(collaborator: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            collaborator: collaborator.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    pub fn technical(message: impl Into<String>) -> Self {
        Self::Technical { message: message.into() }
    }

    pub fn notification(association_id: Option<String>, source: NotificationError) -> Self {
        Self::Notification {
            association_id,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::ValidationFailed,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::ReplaceFailed { .. } => ErrorKind::ReplaceFailed,
            Self::WipeFailed { .. } => ErrorKind::WipeFailed,
            Self::Notification { .. } => ErrorKind::NotificationError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Technical { .. } => ErrorKind::Technical,
        }
    }

    /// Status code the REST layer answers with
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::ValidationFailed
            | ErrorKind::Conflict
            | ErrorKind::PreconditionFailed
            | ErrorKind::ReplaceFailed
            | ErrorKind::WipeFailed => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::NotificationError | ErrorKind::Timeout | ErrorKind::Technical => 500,
        }
    }

    /// Replace step that failed, for replace errors
    pub fn replace_step(&self) -> Option<ReplaceStep> {
        match self {
            Self::ReplaceFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<StoreError> for AssociationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => AssociationError::Conflict { message },
            StoreError::NotFound(message) => AssociationError::NotFound { message },
            StoreError::IllegalTransition { from, to, id } => AssociationError::PreconditionFailed {
                message: format!("association {} cannot move from {} to {}", id, from, to),
            },
            StoreError::Backend(message) => AssociationError::Technical { message },
        }
    }
}
