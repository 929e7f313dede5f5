use super::association::{AssociationStatus, DeviceAssociation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What caused a history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Associate,
    Activate,
    ActivationFailed,
    Terminate,
    Restore,
    Suspend,
    Resume,
    Delegate,
    RevokeDelegation,
    Wipe,
    Replace,
}

/// Append-only audit row, one per committed transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAssociationHistory {
    pub id: String,
    pub association_id: String,
    pub factory_record_id: String,
    pub user_id: String,
    pub from_status: Option<AssociationStatus>,
    pub to_status: AssociationStatus,
    pub action: HistoryAction,
    pub performed_by: String,
    pub performed_on: DateTime<Utc>,
}

impl DeviceAssociationHistory {
    /// Audit row for `association` as it stands after the transition
    pub fn record(
        association: &DeviceAssociation,
        from_status: Option<AssociationStatus>,
        action: HistoryAction,
        performed_by: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            association_id: association.id.clone(),
            factory_record_id: association.factory_record_id.clone(),
            user_id: association.user_id.clone(),
            from_status,
            to_status: association.association_status,
            action,
            performed_by: performed_by.to_string(),
            performed_on: Utc::now(),
        }
    }
}
