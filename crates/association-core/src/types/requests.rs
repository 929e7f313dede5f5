//! Inbound request and outbound outcome types for orchestrator operations.

use super::identity::DeviceIdentity;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};

/// Request to bind a device to a user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociateDeviceRequest {
    pub user_id: String,
    pub identity: DeviceIdentity,
    /// Defaults to the configured owner type
    pub association_type: Option<String>,
    /// Defaults to `user_id`
    pub associated_by: Option<String>,
}

impl AssociateDeviceRequest {
    pub fn new(user_id: impl Into<String>, identity: DeviceIdentity) -> Self {
        Self {
            user_id: user_id.into(),
            identity,
            ..Default::default()
        }
    }
}

/// Association that also activates the device SIM for a vehicle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VinAssociateRequest {
    pub user_id: String,
    pub identity: DeviceIdentity,
    pub vin: String,
    pub associated_by: Option<String>,
}

/// Terminate, restore, suspend and resume all act on one existing row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationActionRequest {
    pub association_id: String,
    /// Caller performing the action
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Device passcode forwarded to credential revocation
    pub passcode: Option<String>,
}

impl AssociationActionRequest {
    pub fn by_owner(association_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            association_id: association_id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn by_admin(association_id: impl Into<String>, admin_id: impl Into<String>) -> Self {
        Self {
            association_id: association_id.into(),
            user_id: admin_id.into(),
            is_admin: true,
            passcode: None,
        }
    }
}

/// Grant of a time-boxed secondary (M2M) association
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateRequest {
    /// Owner (or admin) granting the delegation
    pub user_id: String,
    pub delegate_user_id: String,
    pub identity: DeviceIdentity,
    pub association_type: String,
    /// Epoch milliseconds
    pub start_timestamp: i64,
    /// Epoch milliseconds
    pub end_timestamp: i64,
    /// Internal delegates must resolve in the user directory
    #[serde(default)]
    pub internal: bool,
}

/// Early end of an M2M association
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeDelegationRequest {
    pub association_id: String,
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Swap the physical device behind an association
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceDeviceRequest {
    pub current_value: DeviceIdentity,
    pub replace_with: DeviceIdentity,
    /// Recorded on the stolen-or-faulty transition
    pub reason: Option<String>,
}

/// Per-serial failure collected by a wipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeItemFailure {
    pub serial_number: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate result of a best-effort bulk wipe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeOutcome {
    /// Serials whose owner slot was reassigned
    pub wiped: Vec<String>,
    pub failures: Vec<WipeItemFailure>,
}

impl WipeOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
