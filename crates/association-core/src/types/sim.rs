//! SIM transaction records and the operation gate table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimTransactionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl SimTransactionStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SimTransactionStatus::Pending | SimTransactionStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }
}

impl fmt::Display for SimTransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SimTransactionStatus::Pending => "PENDING",
            SimTransactionStatus::InProgress => "IN_PROGRESS",
            SimTransactionStatus::Completed => "COMPLETED",
            SimTransactionStatus::Failed => "FAILED",
            SimTransactionStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimTransactionKind {
    Activate,
    Terminate,
    Suspend,
}

impl fmt::Display for SimTransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SimTransactionKind::Activate => "ACTIVATE",
            SimTransactionKind::Terminate => "TERMINATE",
            SimTransactionKind::Suspend => "SUSPEND",
        };
        f.write_str(s)
    }
}

/// Target telecom state requested from the SIM service. Only activation is
/// requested from here; terminate and suspend transactions are opened by the
/// SIM platform itself and only show up through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimTargetState {
    Active,
}

impl SimTargetState {
    pub fn kind(&self) -> SimTransactionKind {
        match self {
            SimTargetState::Active => SimTransactionKind::Activate,
        }
    }
}

/// A recorded SIM state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimTransaction {
    pub id: String,
    pub factory_record_id: String,
    pub transaction_id: String,
    /// Association waiting on this transaction, if any
    pub association_id: Option<String>,
    pub status: SimTransactionStatus,
    pub kind: SimTransactionKind,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl SimTransaction {
    pub fn pending(
        factory_record_id: impl Into<String>,
        transaction_id: impl Into<String>,
        kind: SimTransactionKind,
        association_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            factory_record_id: factory_record_id.into(),
            transaction_id: transaction_id.into(),
            association_id,
            status: SimTransactionStatus::Pending,
            kind,
            created_on: now,
            updated_on: now,
        }
    }
}

/// State-changing operations subject to the SIM gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedOperation {
    Associate,
    Terminate,
    Restore,
    Suspend,
    Resume,
    Replace,
}

impl GatedOperation {
    /// In-flight transaction kinds that block this operation
    pub fn conflicting_kinds(&self) -> &'static [SimTransactionKind] {
        use SimTransactionKind::*;
        match self {
            GatedOperation::Associate | GatedOperation::Terminate | GatedOperation::Restore => {
                &[Activate, Terminate]
            }
            GatedOperation::Suspend | GatedOperation::Resume => &[Suspend, Terminate],
            // Pending activations are canceled by the replacement itself
            GatedOperation::Replace => &[Terminate, Suspend],
        }
    }

    pub fn conflicts_with(&self, kind: SimTransactionKind) -> bool {
        self.conflicting_kinds().contains(&kind)
    }
}

impl fmt::Display for GatedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_blocked_by_activation_but_not_suspension() {
        assert!(GatedOperation::Terminate.conflicts_with(SimTransactionKind::Activate));
        assert!(!GatedOperation::Terminate.conflicts_with(SimTransactionKind::Suspend));
    }

    #[test]
    fn replace_not_blocked_by_pending_activation() {
        assert!(!GatedOperation::Replace.conflicts_with(SimTransactionKind::Activate));
        assert!(GatedOperation::Replace.conflicts_with(SimTransactionKind::Terminate));
        assert!(GatedOperation::Replace.conflicts_with(SimTransactionKind::Suspend));
    }

    #[test]
    fn in_flight_statuses() {
        assert!(SimTransactionStatus::Pending.is_in_flight());
        assert!(SimTransactionStatus::InProgress.is_in_flight());
        assert!(SimTransactionStatus::Canceled.is_terminal());
    }

    #[test]
    fn activation_target_opens_activate_transaction() {
        assert_eq!(SimTargetState::Active.kind(), SimTransactionKind::Activate);
        assert_eq!(serde_json::to_string(&SimTargetState::Active).unwrap(), "\"ACTIVE\"");
    }
}
