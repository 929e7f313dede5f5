//! Device credential registration and revocation

use super::ClientResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Credential registration pushed for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub device_id: String,
    pub user_id: String,
    pub factory_record_id: String,
}

#[async_trait]
pub trait AuthRevocationClient: Send + Sync {
    /// Revoke the registered client of a device
    async fn delete_registered_client(
        &self,
        device_id: &str,
        passcode: Option<&str>,
    ) -> ClientResult<()>;

    /// Create or refresh the registered client of a device
    async fn update_registered_client(
        &self,
        device_id: &str,
        registration: &ClientRegistration,
    ) -> ClientResult<()>;
}
