//! Association rows and their state machine.

use super::identity::DeviceIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of a user/device association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationStatus {
    AssociationInitiated,
    Associated,
    AssociationFailed,
    Suspended,
    Disassociated,
}

impl AssociationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationStatus::AssociationInitiated => "ASSOCIATION_INITIATED",
            AssociationStatus::Associated => "ASSOCIATED",
            AssociationStatus::AssociationFailed => "ASSOCIATION_FAILED",
            AssociationStatus::Suspended => "SUSPENDED",
            AssociationStatus::Disassociated => "DISASSOCIATED",
        }
    }

    /// Statuses that occupy a device's owner slot
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AssociationStatus::AssociationInitiated
                | AssociationStatus::Associated
                | AssociationStatus::Suspended
        )
    }

    /// Legal transitions of the association state machine.
    ///
    /// ```text
    /// INITIATED -> ASSOCIATED | ASSOCIATION_FAILED
    /// ASSOCIATED -> SUSPENDED | DISASSOCIATED
    /// SUSPENDED -> ASSOCIATED | DISASSOCIATED
    /// DISASSOCIATED -> ASSOCIATED            (restore)
    /// ```
    pub fn can_transition_to(&self, next: AssociationStatus) -> bool {
        use AssociationStatus::*;
        matches!(
            (self, next),
            (AssociationInitiated, Associated)
                | (AssociationInitiated, AssociationFailed)
                | (Associated, Suspended)
                | (Associated, Disassociated)
                | (Suspended, Associated)
                | (Suspended, Disassociated)
                | (Disassociated, Associated)
        )
    }
}

impl fmt::Display for AssociationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A binding between a user and a physical device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAssociation {
    pub id: String,
    pub user_id: String,
    pub factory_record_id: String,
    /// Identity of the backing device at the time of the last (re)pointing
    pub identity: DeviceIdentity,
    /// Platform-level device id used for credential registration
    pub device_id: String,
    pub association_type: String,
    pub association_status: AssociationStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub associated_by: String,
    pub associated_on: DateTime<Utc>,
    pub modified_by: String,
    pub modified_on: DateTime<Utc>,
}

impl DeviceAssociation {
    /// Create a new row in `ASSOCIATION_INITIATED`
    pub fn initiated(
        user_id: impl Into<String>,
        factory_record_id: impl Into<String>,
        identity: DeviceIdentity,
        association_type: impl Into<String>,
        associated_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let associated_by = associated_by.into();
        let factory_record_id = factory_record_id.into();
        Self {
            id: Self::new_id(),
            user_id: user_id.into(),
            device_id: Self::derive_device_id(&factory_record_id, &identity),
            factory_record_id,
            identity,
            association_type: association_type.into(),
            association_status: AssociationStatus::AssociationInitiated,
            start_time: now,
            end_time: None,
            associated_by: associated_by.clone(),
            associated_on: now,
            modified_by: associated_by,
            modified_on: now,
        }
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Platform device id: the IMEI when known, the serial otherwise, falling
    /// back to the factory record id.
    pub fn derive_device_id(factory_record_id: &str, identity: &DeviceIdentity) -> String {
        identity
            .imei
            .clone()
            .or_else(|| identity.serial_number.clone())
            .unwrap_or_else(|| factory_record_id.to_string())
    }

    pub fn is_active(&self) -> bool {
        self.association_status.is_active()
    }
}

/// Outcome returned by single-association operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationResult {
    pub association_id: String,
    pub user_id: String,
    pub device_id: String,
    pub factory_record_id: String,
    pub association_type: String,
    pub association_status: AssociationStatus,
    /// SIM transaction started by the operation, if any
    pub transaction_id: Option<String>,
    /// Vehicle model resolved from a VIN, if any
    pub model_code: Option<String>,
    pub model_name: Option<String>,
}

impl From<&DeviceAssociation> for AssociationResult {
    fn from(association: &DeviceAssociation) -> Self {
        Self {
            association_id: association.id.clone(),
            user_id: association.user_id.clone(),
            device_id: association.device_id.clone(),
            factory_record_id: association.factory_record_id.clone(),
            association_type: association.association_type.clone(),
            association_status: association.association_status,
            transaction_id: None,
            model_code: None,
            model_name: None,
        }
    }
}
