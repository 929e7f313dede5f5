//! Replacement orchestrator
//!
//! Swaps the physical device behind an active association. The flow is a
//! chain of validation steps, each failing with its own [`ReplaceStep`],
//! followed by the external vehicle update and a single atomic store commit:
//!
//! 1. Resolve the current and the replacement device (exactly one each)
//! 2. Check the caller actively owns the current device
//! 3. Check both device states and the active vehicle profile
//! 4. Check the SIM gate and build the [`ReplacementPlan`]
//! 5. Push vehicle attributes to SWM (when enabled; IVI units also decode the VIN)
//! 6. Apply the plan; re-register credentials; history; notify

pub mod plan;

use crate::clients::{with_timeout, VehicleAttributes, VehicleProfile};
use crate::config::AssociationConfig;
use crate::context::{Collaborators, OrchestratorContext};
use crate::error::{AssociationError, ReplaceStep, Result};
use crate::notify::{AssociationEvent, AssociationEventKind};
use crate::store::ReplacementPlan;
use crate::types::{
    AssociationResult, AssociationStatus, DeviceAssociation, DeviceIdentity, FactoryRecord,
    GatedOperation, HistoryAction, IdentityField, LifecycleState, ReplaceDeviceRequest,
    SimTransactionKind,
};
use devassoc_infra_common::LogContext;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplaceFlavor {
    Standard,
    /// In-vehicle infotainment unit: serial numbers required, VIN decoded
    Ivi,
}

pub struct ReplacementOrchestrator {
    ctx: OrchestratorContext,
}

impl ReplacementOrchestrator {
    pub fn new(collaborators: Collaborators, config: Arc<AssociationConfig>) -> Self {
        Self {
            ctx: OrchestratorContext::new(collaborators, config),
        }
    }

    /// Replace the device behind the caller's association
    pub async fn replace_device(
        &self,
        request: ReplaceDeviceRequest,
        user_id: &str,
    ) -> Result<AssociationResult> {
        let span = LogContext::with_operation("replace", "replace_device")
            .with_field("user_id", user_id)
            .span(Level::INFO);
        self.replace(request, user_id, ReplaceFlavor::Standard)
            .instrument(span)
            .await
    }

    /// Replace an in-vehicle unit; both sides must be addressed by serial
    pub async fn replace_ivi_device(
        &self,
        request: ReplaceDeviceRequest,
        user_id: &str,
    ) -> Result<AssociationResult> {
        let span = LogContext::with_operation("replace", "replace_ivi_device")
            .with_field("user_id", user_id)
            .span(Level::INFO);
        self.replace(request, user_id, ReplaceFlavor::Ivi)
            .instrument(span)
            .await
    }

    async fn replace(
        &self,
        request: ReplaceDeviceRequest,
        user_id: &str,
        flavor: ReplaceFlavor,
    ) -> Result<AssociationResult> {
        let user_id = user_id.trim();
        Self::validate(&request, user_id, flavor)?;

        info!(
            "🔄 Replacing {} with {}",
            request.current_value.describe(),
            request.replace_with.describe()
        );

        // Steps 1-3: resolve and check both sides
        let current = self
            .resolve_single(&request.current_value, ReplaceStep::ResolveCurrent)
            .await?;
        let replacement = self
            .resolve_single(&request.replace_with, ReplaceStep::ResolveReplacement)
            .await?;
        if current.id == replacement.id {
            return Err(AssociationError::replace_failed(
                ReplaceStep::ResolveReplacement,
                "replacement is the current device",
            ));
        }

        let association = self.owned_association(&current, user_id).await?;
        self.check_current_state(&current)?;
        self.check_replacement_state(&replacement).await?;
        let profile = self.active_profile(&current).await?;

        // Step 4: gate and plan
        self.ctx
            .sim
            .ensure_no_conflict(&current.id, GatedOperation::Replace)
            .await?;
        let current_transition = plan::current_device_transition(&current, request.reason.as_deref())?;
        let replacement_transition = plan::replacement_device_transition(
            &current,
            &replacement,
            association.association_status,
        );
        let cancel_transaction_ids = self
            .ctx
            .store
            .in_flight_sim_transactions(&current.id)
            .await?
            .into_iter()
            .filter(|tx| tx.kind == SimTransactionKind::Activate)
            .map(|tx| tx.transaction_id)
            .collect();

        let plan = ReplacementPlan {
            association_id: association.id.clone(),
            expected_factory_record_id: current.id.clone(),
            replacement_factory_record_id: replacement.id.clone(),
            replacement_identity: replacement.identity.clone(),
            current_transition,
            replacement_transition,
            cancel_transaction_ids,
            modified_by: user_id.to_string(),
        };

        // Step 5: external update before anything is committed
        self.push_vehicle_update(&profile, &replacement, flavor).await?;

        // Step 6: commit
        let updated = match self.ctx.store.apply_replacement(&plan).await {
            Ok(updated) => updated,
            Err(e) => {
                if self.ctx.config.swm_integration_enabled {
                    error!(
                        "Vehicle {} already points at device {} but association {} stays on {}: {}",
                        profile.vin,
                        replacement.display_key(),
                        association.id,
                        current.display_key(),
                        e
                    );
                }
                return Err(AssociationError::replace_failed(ReplaceStep::Commit, e.to_string()));
            }
        };
        info!(
            "✅ Association {} moved from device {} to {} ({} -> {}, {} -> {})",
            updated.id,
            current.display_key(),
            replacement.display_key(),
            plan.current_transition.from,
            plan.current_transition.to,
            plan.replacement_transition.from,
            plan.replacement_transition.to
        );

        if self.ctx.config.platform_auth_integration_enabled {
            self.ctx.revoke_credentials(&association, None).await;
            self.ctx.register_credentials(&updated).await;
        }

        self.ctx
            .record_history(
                &updated,
                Some(association.association_status),
                HistoryAction::Replace,
                user_id,
            )
            .await;

        let event = AssociationEvent::new(AssociationEventKind::Replaced, &updated)
            .with_attribute("previousFactoryRecordId", current.id.as_str())
            .with_attribute("previousDevice", current.display_key())
            .with_attribute("transition", plan.current_transition.path.as_str());
        if let Err(e) = self.ctx.publish(event).await {
            warn!("Replacement notification for {} failed: {}", updated.id, e);
        }

        Ok(AssociationResult::from(&updated))
    }

    fn validate(request: &ReplaceDeviceRequest, user_id: &str, flavor: ReplaceFlavor) -> Result<()> {
        if user_id.is_empty() {
            return Err(AssociationError::replace_failed(
                ReplaceStep::Validate,
                "user id must not be empty",
            ));
        }
        if request.current_value.is_empty() || request.replace_with.is_empty() {
            return Err(AssociationError::replace_failed(
                ReplaceStep::Validate,
                "both current and replacement device must be identified",
            ));
        }
        if flavor == ReplaceFlavor::Ivi
            && (request.current_value.get(IdentityField::SerialNumber).is_none()
                || request.replace_with.get(IdentityField::SerialNumber).is_none())
        {
            return Err(AssociationError::replace_failed(
                ReplaceStep::Validate,
                "IVI replacement requires serial numbers on both devices",
            ));
        }
        Ok(())
    }

    async fn resolve_single(&self, identity: &DeviceIdentity, step: ReplaceStep) -> Result<FactoryRecord> {
        let mut candidates = self.ctx.device_candidates(identity).await?;
        if candidates.len() != 1 {
            return Err(AssociationError::replace_failed(
                step,
                format!(
                    "expected exactly one device for {}, found {}",
                    identity.describe(),
                    candidates.len()
                ),
            ));
        }
        Ok(candidates.remove(0))
    }

    async fn owned_association(&self, current: &FactoryRecord, user_id: &str) -> Result<DeviceAssociation> {
        self.ctx
            .store
            .active_associations_for_factory(&current.id)
            .await?
            .into_iter()
            .find(|a| {
                a.user_id == user_id
                    && self.ctx.config.is_owner_type(&a.association_type)
                    && matches!(
                        a.association_status,
                        AssociationStatus::Associated | AssociationStatus::Suspended
                    )
            })
            .ok_or_else(|| {
                AssociationError::replace_failed(
                    ReplaceStep::Ownership,
                    format!(
                        "device {} is not actively associated with {}",
                        current.display_key(),
                        user_id
                    ),
                )
            })
    }

    fn check_current_state(&self, current: &FactoryRecord) -> Result<()> {
        if !self.ctx.config.current_device_to_be_moved_to_provisioned {
            if !current.is_faulty_or_stolen() {
                return Err(AssociationError::replace_failed(
                    ReplaceStep::CurrentDeviceState,
                    format!("device {} is neither faulty nor stolen", current.display_key()),
                ));
            }
        } else if current.lifecycle_state == LifecycleState::Provisioned {
            return Err(AssociationError::replace_failed(
                ReplaceStep::CurrentDeviceState,
                format!("device {} is already PROVISIONED", current.display_key()),
            ));
        }
        Ok(())
    }

    async fn check_replacement_state(&self, replacement: &FactoryRecord) -> Result<()> {
        if replacement.lifecycle_state != LifecycleState::Provisioned {
            return Err(AssociationError::replace_failed(
                ReplaceStep::ReplacementDeviceState,
                format!(
                    "replacement {} is {}, expected PROVISIONED",
                    replacement.display_key(),
                    replacement.lifecycle_state
                ),
            ));
        }
        if replacement.is_faulty_or_stolen() {
            return Err(AssociationError::replace_failed(
                ReplaceStep::ReplacementDeviceState,
                format!("replacement {} is faulty or stolen", replacement.display_key()),
            ));
        }
        if !self
            .ctx
            .store
            .active_associations_for_factory(&replacement.id)
            .await?
            .is_empty()
        {
            return Err(AssociationError::replace_failed(
                ReplaceStep::ReplacementDeviceState,
                format!("replacement {} is already associated", replacement.display_key()),
            ));
        }
        Ok(())
    }

    async fn active_profile(&self, current: &FactoryRecord) -> Result<VehicleProfile> {
        with_timeout(
            "vehicle profile",
            self.ctx.config.external_call_timeout(),
            self.ctx.vehicles.find_active_profile(&current.id),
        )
        .await?
        .ok_or_else(|| {
            AssociationError::replace_failed(
                ReplaceStep::VehicleProfile,
                format!("no active vehicle profile for device {}", current.display_key()),
            )
        })
    }

    async fn push_vehicle_update(
        &self,
        profile: &VehicleProfile,
        replacement: &FactoryRecord,
        flavor: ReplaceFlavor,
    ) -> Result<()> {
        if !self.ctx.config.swm_integration_enabled {
            return Ok(());
        }

        let timeout = self.ctx.config.external_call_timeout();
        let mut attributes = VehicleAttributes::from_profile(
            profile,
            replacement.identity.serial_number.clone(),
        );

        if flavor == ReplaceFlavor::Ivi {
            let model = with_timeout("vehicle profile", timeout, self.ctx.vehicles.decode_vin(&profile.vin))
                .await
                .map_err(|e| AssociationError::replace_failed(ReplaceStep::VehicleProfile, e.to_string()))?;
            attributes = attributes.with_model(model);
        }

        let accepted = with_timeout("vehicle update", timeout, self.ctx.vehicles.update_vehicle(&attributes))
            .await
            .map_err(|e| AssociationError::replace_failed(ReplaceStep::VehicleUpdate, e.to_string()))?;
        if !accepted {
            return Err(AssociationError::replace_failed(
                ReplaceStep::VehicleUpdate,
                format!("vehicle service rejected the update for VIN {}", profile.vin),
            ));
        }
        info!("Vehicle {} updated with device {}", profile.vin, replacement.display_key());
        Ok(())
    }
}
