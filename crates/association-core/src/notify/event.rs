//! Association events delivered to notification handlers

use crate::types::{AssociationStatus, DeviceAssociation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// What happened to an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationEventKind {
    Associated,
    ActivationRequested,
    ActivationFailed,
    Terminated,
    Restored,
    Suspended,
    Resumed,
    Delegated,
    DelegationRevoked,
    Wiped,
    Replaced,
}

impl AssociationEventKind {
    /// Capability a handler must declare to receive this kind
    pub fn capability(&self) -> NotificationCapability {
        match self {
            AssociationEventKind::Associated
            | AssociationEventKind::Terminated
            | AssociationEventKind::Restored
            | AssociationEventKind::Suspended
            | AssociationEventKind::Resumed
            | AssociationEventKind::Wiped => NotificationCapability::Lifecycle,
            AssociationEventKind::ActivationRequested | AssociationEventKind::ActivationFailed => {
                NotificationCapability::Activation
            }
            AssociationEventKind::Delegated | AssociationEventKind::DelegationRevoked => {
                NotificationCapability::Delegation
            }
            AssociationEventKind::Replaced => NotificationCapability::Replacement,
        }
    }
}

impl fmt::Display for AssociationEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssociationEventKind::Associated => "associated",
            AssociationEventKind::ActivationRequested => "activation_requested",
            AssociationEventKind::ActivationFailed => "activation_failed",
            AssociationEventKind::Terminated => "terminated",
            AssociationEventKind::Restored => "restored",
            AssociationEventKind::Suspended => "suspended",
            AssociationEventKind::Resumed => "resumed",
            AssociationEventKind::Delegated => "delegated",
            AssociationEventKind::DelegationRevoked => "delegation_revoked",
            AssociationEventKind::Wiped => "wiped",
            AssociationEventKind::Replaced => "replaced",
        };
        f.write_str(s)
    }
}

/// Coarse event families handlers subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCapability {
    Lifecycle,
    Activation,
    Delegation,
    Replacement,
}

impl NotificationCapability {
    pub const ALL: [NotificationCapability; 4] = [
        NotificationCapability::Lifecycle,
        NotificationCapability::Activation,
        NotificationCapability::Delegation,
        NotificationCapability::Replacement,
    ];
}

/// Snapshot of an association at the moment a transition committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationEvent {
    pub id: String,
    pub kind: AssociationEventKind,
    pub association_id: String,
    pub user_id: String,
    pub factory_record_id: String,
    pub device_id: String,
    pub association_type: String,
    pub status: AssociationStatus,
    pub occurred_at: DateTime<Utc>,
    /// Operation specific extras, e.g. the previous device on replace
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl AssociationEvent {
    pub fn new(kind: AssociationEventKind, association: &DeviceAssociation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            association_id: association.id.clone(),
            user_id: association.user_id.clone(),
            factory_record_id: association.factory_record_id.clone(),
            device_id: association.device_id.clone(),
            association_type: association.association_type.clone(),
            status: association.association_status,
            occurred_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
