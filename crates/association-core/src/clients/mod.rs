//! External collaborator contracts
//!
//! Each collaborator is an object-safe async trait so embedders can plug in
//! HTTP clients while tests use in-process mocks. Calls are always made
//! through [`with_timeout`].

pub mod auth;
pub mod directory;
pub mod vehicle;

pub use auth::{AuthRevocationClient, ClientRegistration};
pub use directory::{DirectoryUser, UserDirectoryClient};
pub use vehicle::{VehicleAttributes, VehicleModel, VehicleProfile, VehicleProfileClient};

use crate::error::{AssociationError, Result};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure reported by an external collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{service}: {message}")]
pub struct ClientError {
    pub service: String,
    pub message: String,
}

impl ClientError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Await `call`, failing with [`AssociationError::Timeout`] once `limit` expires
pub async fn with_timeout<T, F>(collaborator: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AssociationError::technical(e.to_string())),
        Err(_) => {
            warn!("{} did not answer within {:?}", collaborator, limit);
            Err(AssociationError::timeout(collaborator, limit))
        }
    }
}
