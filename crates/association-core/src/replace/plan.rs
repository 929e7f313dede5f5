//! Lifecycle planning for a device swap

use crate::error::{AssociationError, ReplaceStep, Result};
use crate::types::{
    AssociationStatus, FactoryRecord, LifecycleState, LifecycleTransition, TransitionPath,
};

/// Transition taking the outgoing device back to `PROVISIONED`
pub fn current_device_transition(
    current: &FactoryRecord,
    reason: Option<&str>,
) -> Result<LifecycleTransition> {
    let path = if current.is_faulty_or_stolen() {
        TransitionPath::StolenOrFaultyToProvisioned
    } else {
        match current.lifecycle_state {
            LifecycleState::Active
            | LifecycleState::ReadyToActivate
            | LifecycleState::ProvisionedAlive => TransitionPath::ActiveToProvisioned,
            ref other => {
                return Err(AssociationError::replace_failed(
                    ReplaceStep::CurrentDeviceState,
                    format!("device {} cannot leave state {}", current.display_key(), other),
                ))
            }
        }
    };

    Ok(LifecycleTransition {
        factory_record_id: current.id.clone(),
        from: current.lifecycle_state.clone(),
        to: LifecycleState::Provisioned,
        path,
        reason: match path {
            TransitionPath::StolenOrFaultyToProvisioned => reason.map(str::to_string),
            _ => None,
        },
    })
}

/// Transition giving the incoming device the role the outgoing one had
pub fn replacement_device_transition(
    current: &FactoryRecord,
    replacement: &FactoryRecord,
    association_status: AssociationStatus,
) -> LifecycleTransition {
    let to = if current.lifecycle_state.is_in_service() {
        current.lifecycle_state.clone()
    } else if association_status == AssociationStatus::Associated {
        LifecycleState::Active
    } else {
        LifecycleState::ReadyToActivate
    };

    LifecycleTransition {
        factory_record_id: replacement.id.clone(),
        from: replacement.lifecycle_state.clone(),
        to,
        path: TransitionPath::ProvisionedToActiveRole,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceIdentity;

    fn record(id: &str, state: LifecycleState) -> FactoryRecord {
        FactoryRecord::new(id, DeviceIdentity::with_serial(id), state)
    }

    #[test]
    fn stolen_device_takes_stolen_or_faulty_path_with_reason() {
        let current = record("old", LifecycleState::Stolen);
        let transition = current_device_transition(&current, Some("reported stolen")).unwrap();
        assert_eq!(transition.path, TransitionPath::StolenOrFaultyToProvisioned);
        assert_eq!(transition.reason.as_deref(), Some("reported stolen"));
        assert_eq!(transition.to, LifecycleState::Provisioned);
    }

    #[test]
    fn flagged_active_device_is_stolen_or_faulty() {
        let current = record("old", LifecycleState::Active).faulty();
        let transition = current_device_transition(&current, None).unwrap();
        assert_eq!(transition.path, TransitionPath::StolenOrFaultyToProvisioned);
        assert_eq!(transition.from, LifecycleState::Active);
    }

    #[test]
    fn healthy_alive_device_uses_active_path() {
        let current = record("old", LifecycleState::ProvisionedAlive);
        let transition = current_device_transition(&current, Some("ignored")).unwrap();
        assert_eq!(transition.path, TransitionPath::ActiveToProvisioned);
        assert_eq!(transition.reason, None);
    }

    #[test]
    fn legacy_state_cannot_be_replaced_when_healthy() {
        let current = record("old", LifecycleState::Legacy("SHIPPED".into()));
        let err = current_device_transition(&current, None).unwrap_err();
        assert_eq!(err.replace_step(), Some(ReplaceStep::CurrentDeviceState));
    }

    #[test]
    fn replacement_inherits_in_service_state() {
        let current = record("old", LifecycleState::ReadyToActivate);
        let replacement = record("new", LifecycleState::Provisioned);
        let transition =
            replacement_device_transition(&current, &replacement, AssociationStatus::Associated);
        assert_eq!(transition.to, LifecycleState::ReadyToActivate);
    }

    #[test]
    fn replacement_of_stolen_device_becomes_active_for_associated_owner() {
        let current = record("old", LifecycleState::Stolen);
        let replacement = record("new", LifecycleState::Provisioned);
        let transition =
            replacement_device_transition(&current, &replacement, AssociationStatus::Associated);
        assert_eq!(transition.to, LifecycleState::Active);

        let suspended =
            replacement_device_transition(&current, &replacement, AssociationStatus::Suspended);
        assert_eq!(suspended.to, LifecycleState::ReadyToActivate);
    }
}
