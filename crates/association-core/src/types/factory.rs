//! Inventory-level device records.

use super::identity::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provisioning lifecycle of a physical device.
///
/// Serialized as the exact upper-case strings used by the inventory service.
/// Values this crate does not know are preserved in [`LifecycleState::Legacy`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LifecycleState {
    Provisioned,
    ProvisionedAlive,
    ReadyToActivate,
    Active,
    Faulty,
    Stolen,
    Legacy(String),
}

impl LifecycleState {
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleState::Provisioned => "PROVISIONED",
            LifecycleState::ProvisionedAlive => "PROVISIONED_ALIVE",
            LifecycleState::ReadyToActivate => "READY_TO_ACTIVATE",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Faulty => "FAULTY",
            LifecycleState::Stolen => "STOLEN",
            LifecycleState::Legacy(raw) => raw.as_str(),
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PROVISIONED" => LifecycleState::Provisioned,
            "PROVISIONED_ALIVE" => LifecycleState::ProvisionedAlive,
            "READY_TO_ACTIVATE" => LifecycleState::ReadyToActivate,
            "ACTIVE" => LifecycleState::Active,
            "FAULTY" => LifecycleState::Faulty,
            "STOLEN" => LifecycleState::Stolen,
            _ => LifecycleState::Legacy(raw.to_string()),
        }
    }

    pub fn is_stolen_or_faulty(&self) -> bool {
        matches!(self, LifecycleState::Faulty | LifecycleState::Stolen)
    }

    /// States that represent a device serving a customer
    pub fn is_in_service(&self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::ReadyToActivate)
    }
}

impl From<String> for LifecycleState {
    fn from(raw: String) -> Self {
        LifecycleState::parse(&raw)
    }
}

impl From<LifecycleState> for String {
    fn from(state: LifecycleState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named inventory transition used when a device changes hands.
///
/// The serialized names are the ones the inventory service records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionPath {
    #[serde(rename = "ACTIVE_TO_PROVISIONED")]
    ActiveToProvisioned,
    #[serde(rename = "STOLEN_OR_FAULTY")]
    StolenOrFaultyToProvisioned,
    #[serde(rename = "PROVISIONED_TO_ACTIVE_ROLE")]
    ProvisionedToActiveRole,
}

impl TransitionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionPath::ActiveToProvisioned => "ACTIVE_TO_PROVISIONED",
            TransitionPath::StolenOrFaultyToProvisioned => "STOLEN_OR_FAULTY",
            TransitionPath::ProvisionedToActiveRole => "PROVISIONED_TO_ACTIVE_ROLE",
        }
    }
}

impl fmt::Display for TransitionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected-state guarded lifecycle change of one factory record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTransition {
    pub factory_record_id: String,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub path: TransitionPath,
    pub reason: Option<String>,
}

/// Inventory record of a physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryRecord {
    pub id: String,
    pub identity: DeviceIdentity,
    pub lifecycle_state: LifecycleState,
    pub faulty: bool,
    pub stolen: bool,
}

impl FactoryRecord {
    pub fn new(id: impl Into<String>, identity: DeviceIdentity, lifecycle_state: LifecycleState) -> Self {
        Self {
            id: id.into(),
            identity,
            lifecycle_state,
            faulty: false,
            stolen: false,
        }
    }

    pub fn faulty(mut self) -> Self {
        self.faulty = true;
        self
    }

    pub fn stolen(mut self) -> Self {
        self.stolen = true;
        self
    }

    /// Faulty or stolen by flag or by lifecycle state
    pub fn is_faulty_or_stolen(&self) -> bool {
        self.faulty || self.stolen || self.lifecycle_state.is_stolen_or_faulty()
    }

    pub fn is_eligible_for_association(&self) -> bool {
        !self.is_faulty_or_stolen()
    }

    /// Serial number when present, otherwise the record id
    pub fn display_key(&self) -> &str {
        self.identity.serial_number.as_deref().unwrap_or(&self.id)
    }
}
