use super::LifecycleOrchestrator;
use crate::clients::with_timeout;
use crate::error::{AssociationError, Result};
use crate::notify::{AssociationEvent, AssociationEventKind};
use crate::types::{
    AssociateDeviceRequest, AssociationResult, AssociationStatus, DeviceAssociation,
    FactoryRecord, GatedOperation, HistoryAction, SimTargetState, SimTransactionStatus,
    VinAssociateRequest,
};
use devassoc_infra_common::LogContext;
use tracing::{error, info, warn, Instrument, Level};

impl LifecycleOrchestrator {
    /// Bind a device to a user as its owner.
    ///
    /// The row is inserted as `ASSOCIATION_INITIATED` and advanced to
    /// `ASSOCIATED` in the same call. A failed notification does not undo the
    /// association; it is reported as [`AssociationError::Notification`].
    pub async fn associate(&self, request: AssociateDeviceRequest) -> Result<AssociationResult> {
        let span = LogContext::with_operation("lifecycle", "associate")
            .with_field("user_id", request.user_id.as_str())
            .span(Level::INFO);
        self.associate_inner(request).instrument(span).await
    }

    async fn associate_inner(&self, request: AssociateDeviceRequest) -> Result<AssociationResult> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(AssociationError::validation("user id must not be empty"));
        }
        let association_type = request
            .association_type
            .clone()
            .unwrap_or_else(|| self.ctx.config.default_association_type.clone());
        if !self.ctx.config.is_owner_type(&association_type) {
            return Err(AssociationError::validation(format!(
                "'{}' is not an owner association type; use delegate",
                association_type
            )));
        }
        let associated_by = request
            .associated_by
            .clone()
            .unwrap_or_else(|| user_id.to_string());

        let device = self.ctx.resolve_device(&request.identity).await?;
        self.check_associable(&device).await?;

        let association = self
            .ctx
            .store
            .insert(DeviceAssociation::initiated(
                user_id,
                device.id.clone(),
                device.identity.clone(),
                association_type,
                associated_by.clone(),
            ))
            .await?;
        self.ctx
            .record_history(&association, None, HistoryAction::Associate, &associated_by)
            .await;

        let association = self
            .ctx
            .store
            .update_status(
                &association.id,
                AssociationStatus::AssociationInitiated,
                AssociationStatus::Associated,
                &associated_by,
            )
            .await?;
        self.ctx
            .record_history(
                &association,
                Some(AssociationStatus::AssociationInitiated),
                HistoryAction::Activate,
                &associated_by,
            )
            .await;

        info!(
            "✅ Device {} associated to user {} ({})",
            device.display_key(),
            association.user_id,
            association.id
        );

        self.ctx
            .publish(AssociationEvent::new(AssociationEventKind::Associated, &association))
            .await?;
        Ok(AssociationResult::from(&association))
    }

    /// Associate and request SIM activation for the vehicle identified by
    /// `vin`. The association stays `ASSOCIATION_INITIATED` until
    /// [`refresh_activation`](Self::refresh_activation) observes the outcome.
    pub async fn vin_associate(&self, request: VinAssociateRequest) -> Result<AssociationResult> {
        let span = LogContext::with_operation("lifecycle", "vin_associate")
            .with_field("user_id", request.user_id.as_str())
            .with_field("vin", request.vin.as_str())
            .span(Level::INFO);
        self.vin_associate_inner(request).instrument(span).await
    }

    async fn vin_associate_inner(&self, request: VinAssociateRequest) -> Result<AssociationResult> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(AssociationError::validation("user id must not be empty"));
        }
        let vin = request.vin.trim();
        if vin.is_empty() {
            return Err(AssociationError::validation("vin must not be empty"));
        }
        let associated_by = request
            .associated_by
            .clone()
            .unwrap_or_else(|| user_id.to_string());

        let device = self.ctx.resolve_device(&request.identity).await?;
        self.check_associable(&device).await?;

        let model = with_timeout(
            "vehicle profile",
            self.ctx.config.external_call_timeout(),
            self.ctx.vehicles.decode_vin(vin),
        )
        .await?;

        let association = self
            .ctx
            .store
            .insert(DeviceAssociation::initiated(
                user_id,
                device.id.clone(),
                device.identity.clone(),
                self.ctx.config.default_association_type.clone(),
                associated_by.clone(),
            ))
            .await?;
        self.ctx
            .record_history(&association, None, HistoryAction::Associate, &associated_by)
            .await;

        // SIM identifiers live on the inventory record; fall back to the caller's
        let mut sim_identity = device.identity.clone();
        if sim_identity.imsi.is_none() {
            sim_identity.imsi = request.identity.imsi.clone();
        }
        if sim_identity.iccid.is_none() {
            sim_identity.iccid = request.identity.iccid.clone();
        }

        let requested = self
            .ctx
            .sim
            .change_sim_state(&device.id, &sim_identity, SimTargetState::Active, Some(&association.id))
            .await;

        let transaction_id = match requested {
            Ok(Some(transaction_id)) => transaction_id,
            Ok(None) => {
                self.compensate_activation(&association, &associated_by).await;
                return Err(AssociationError::precondition(format!(
                    "SIM activation was rejected for device {}",
                    device.display_key()
                )));
            }
            Err(e) => {
                self.compensate_activation(&association, &associated_by).await;
                return Err(e);
            }
        };

        info!(
            "Device {} associated to user {} pending SIM activation {}",
            device.display_key(),
            association.user_id,
            transaction_id
        );
        self.ctx
            .publish_best_effort(AssociationEventKind::ActivationRequested, &association)
            .await;

        let mut result = AssociationResult::from(&association);
        result.transaction_id = Some(transaction_id);
        result.model_code = Some(model.model_code);
        result.model_name = Some(model.model_name);
        Ok(result)
    }

    /// Poll the SIM transaction behind a VIN association and apply its outcome
    pub async fn refresh_activation(&self, transaction_id: &str) -> Result<AssociationResult> {
        let span = LogContext::with_operation("lifecycle", "refresh_activation")
            .with_field("transaction_id", transaction_id)
            .span(Level::INFO);
        self.refresh_activation_inner(transaction_id).instrument(span).await
    }

    async fn refresh_activation_inner(&self, transaction_id: &str) -> Result<AssociationResult> {
        let status = self.ctx.sim.poll_transaction_status(transaction_id).await?;

        let transaction = self
            .ctx
            .store
            .find_sim_transaction(transaction_id)
            .await?
            .ok_or_else(|| AssociationError::not_found(format!("SIM transaction {}", transaction_id)))?;
        let association_id = transaction.association_id.ok_or_else(|| {
            AssociationError::precondition(format!(
                "SIM transaction {} is not linked to an association",
                transaction_id
            ))
        })?;
        let association = self
            .ctx
            .store
            .find_by_id(&association_id)
            .await?
            .ok_or_else(|| AssociationError::not_found(format!("association {}", association_id)))?;

        let pending = association.association_status == AssociationStatus::AssociationInitiated;
        let association = match status {
            SimTransactionStatus::Completed if pending => {
                let updated = self
                    .ctx
                    .store
                    .update_status(
                        &association.id,
                        AssociationStatus::AssociationInitiated,
                        AssociationStatus::Associated,
                        &association.associated_by,
                    )
                    .await?;
                self.ctx
                    .record_history(
                        &updated,
                        Some(AssociationStatus::AssociationInitiated),
                        HistoryAction::Activate,
                        &updated.associated_by,
                    )
                    .await;
                info!("✅ SIM activation {} completed, association {} active", transaction_id, updated.id);
                self.ctx
                    .publish_best_effort(AssociationEventKind::Associated, &updated)
                    .await;
                updated
            }
            SimTransactionStatus::Failed | SimTransactionStatus::Canceled if pending => {
                let updated = self
                    .ctx
                    .store
                    .update_status(
                        &association.id,
                        AssociationStatus::AssociationInitiated,
                        AssociationStatus::AssociationFailed,
                        &association.associated_by,
                    )
                    .await?;
                self.ctx
                    .record_history(
                        &updated,
                        Some(AssociationStatus::AssociationInitiated),
                        HistoryAction::ActivationFailed,
                        &updated.associated_by,
                    )
                    .await;
                warn!("SIM activation {} ended {}, association {} failed", transaction_id, status, updated.id);
                self.ctx
                    .publish_best_effort(AssociationEventKind::ActivationFailed, &updated)
                    .await;
                updated
            }
            _ => association,
        };

        let mut result = AssociationResult::from(&association);
        result.transaction_id = Some(transaction_id.to_string());
        Ok(result)
    }

    /// Rejections shared by both associate flows
    async fn check_associable(&self, device: &FactoryRecord) -> Result<()> {
        if !device.is_eligible_for_association() {
            warn!("Rejecting association of faulty/stolen device {}", device.display_key());
            return Err(AssociationError::precondition(format!(
                "device {} is faulty or stolen",
                device.display_key()
            )));
        }
        if self.ctx.config.forbid_association_after_terminate
            && self.ctx.store.has_terminated_association(&device.id).await?
        {
            return Err(AssociationError::precondition(format!(
                "device {} was terminated and cannot be associated again",
                device.display_key()
            )));
        }
        self.ensure_owner_slot_free(&device.id).await?;
        self.ctx
            .sim
            .ensure_no_conflict(&device.id, GatedOperation::Associate)
            .await
    }

    /// Move a tentative association to `ASSOCIATION_FAILED`. Errors here are
    /// logged; the caller returns the original failure.
    async fn compensate_activation(&self, association: &DeviceAssociation, performed_by: &str) {
        match self
            .ctx
            .store
            .update_status(
                &association.id,
                AssociationStatus::AssociationInitiated,
                AssociationStatus::AssociationFailed,
                performed_by,
            )
            .await
        {
            Ok(failed) => {
                self.ctx
                    .record_history(
                        &failed,
                        Some(AssociationStatus::AssociationInitiated),
                        HistoryAction::ActivationFailed,
                        performed_by,
                    )
                    .await;
                info!("Association {} compensated to ASSOCIATION_FAILED", failed.id);
            }
            Err(e) => error!(
                "Compensation of association {} failed, row may stay INITIATED: {}",
                association.id, e
            ),
        }
    }
}
