use super::LifecycleOrchestrator;
use crate::error::{AssociationError, Result};
use crate::notify::{AssociationEvent, AssociationEventKind};
use crate::types::{
    AssociationActionRequest, AssociationResult, AssociationStatus, DeviceAssociation,
    GatedOperation, HistoryAction,
};
use devassoc_infra_common::LogContext;
use tracing::{debug, info, warn, Instrument, Level};

fn action_span(operation: &str, request: &AssociationActionRequest) -> tracing::Span {
    LogContext::with_operation("lifecycle", operation)
        .with_field("association_id", request.association_id.as_str())
        .with_field("user_id", request.user_id.as_str())
        .span(Level::INFO)
}

impl LifecycleOrchestrator {
    /// End an association. Terminating an owner row also ends the active
    /// delegations on the same device; the returned count covers every row
    /// that moved to `DISASSOCIATED`.
    pub async fn terminate(&self, request: AssociationActionRequest) -> Result<usize> {
        let span = action_span("terminate", &request);
        self.terminate_inner(request).instrument(span).await
    }

    async fn terminate_inner(&self, request: AssociationActionRequest) -> Result<usize> {
        let association = self
            .load_authorized(&request.association_id, &request.user_id, request.is_admin)
            .await?;

        let from = association.association_status;
        if !matches!(from, AssociationStatus::Associated | AssociationStatus::Suspended) {
            return Err(AssociationError::precondition(format!(
                "association {} is {}; only ASSOCIATED or SUSPENDED can be terminated",
                association.id, from
            )));
        }
        self.ctx
            .sim
            .ensure_no_conflict(&association.factory_record_id, GatedOperation::Terminate)
            .await?;

        let terminated = self
            .ctx
            .store
            .update_status(&association.id, from, AssociationStatus::Disassociated, &request.user_id)
            .await?;
        self.ctx
            .record_history(&terminated, Some(from), HistoryAction::Terminate, &request.user_id)
            .await;
        let mut count = 1;

        if self.ctx.config.is_owner_type(&terminated.association_type) {
            count += self
                .end_delegations(&terminated.factory_record_id, &request.user_id)
                .await;
        }

        self.ctx
            .revoke_credentials(&terminated, request.passcode.as_deref())
            .await;

        info!("Association {} terminated ({} row(s))", terminated.id, count);
        self.ctx
            .publish(AssociationEvent::new(AssociationEventKind::Terminated, &terminated))
            .await?;
        Ok(count)
    }

    /// Disassociate the active delegate rows of a device, best effort
    async fn end_delegations(&self, factory_record_id: &str, performed_by: &str) -> usize {
        let delegations = match self
            .ctx
            .store
            .active_associations_for_factory(factory_record_id)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Could not list delegations of device {}: {}", factory_record_id, e);
                return 0;
            }
        };

        let mut ended = 0;
        for delegation in delegations
            .into_iter()
            .filter(|a| !self.ctx.config.is_owner_type(&a.association_type))
        {
            let from = delegation.association_status;
            if !from.can_transition_to(AssociationStatus::Disassociated) {
                debug!("Skipping delegation {} in {}", delegation.id, from);
                continue;
            }
            match self
                .ctx
                .store
                .update_status(&delegation.id, from, AssociationStatus::Disassociated, performed_by)
                .await
            {
                Ok(ended_row) => {
                    self.ctx
                        .record_history(&ended_row, Some(from), HistoryAction::Terminate, performed_by)
                        .await;
                    ended += 1;
                }
                Err(e) => warn!("Could not end delegation {}: {}", delegation.id, e),
            }
        }
        ended
    }

    /// Bring a `DISASSOCIATED` association back to `ASSOCIATED`
    pub async fn restore(&self, request: AssociationActionRequest) -> Result<usize> {
        let span = action_span("restore", &request);
        self.restore_inner(request).instrument(span).await
    }

    async fn restore_inner(&self, request: AssociationActionRequest) -> Result<usize> {
        let association = self
            .load_authorized(&request.association_id, &request.user_id, request.is_admin)
            .await?;

        if association.association_status != AssociationStatus::Disassociated {
            return Err(AssociationError::precondition(format!(
                "association {} is {}; only DISASSOCIATED can be restored",
                association.id, association.association_status
            )));
        }
        self.ensure_device_eligible(&association).await?;
        self.ctx
            .sim
            .ensure_no_conflict(&association.factory_record_id, GatedOperation::Restore)
            .await?;
        if self.ctx.config.is_owner_type(&association.association_type) {
            self.ensure_owner_slot_free(&association.factory_record_id).await?;
        }

        let restored = self
            .ctx
            .store
            .update_status(
                &association.id,
                AssociationStatus::Disassociated,
                AssociationStatus::Associated,
                &request.user_id,
            )
            .await?;
        self.ctx
            .record_history(
                &restored,
                Some(AssociationStatus::Disassociated),
                HistoryAction::Restore,
                &request.user_id,
            )
            .await;
        self.ctx.register_credentials(&restored).await;

        info!("♻️ Association {} restored", restored.id);
        self.ctx
            .publish(AssociationEvent::new(AssociationEventKind::Restored, &restored))
            .await?;
        Ok(1)
    }

    /// Temporarily disable an `ASSOCIATED` association
    pub async fn suspend(&self, request: AssociationActionRequest) -> Result<AssociationResult> {
        let span = action_span("suspend", &request);
        self.suspend_inner(request).instrument(span).await
    }

    async fn suspend_inner(&self, request: AssociationActionRequest) -> Result<AssociationResult> {
        let association = self
            .load_authorized(&request.association_id, &request.user_id, request.is_admin)
            .await?;

        if association.association_status != AssociationStatus::Associated {
            return Err(AssociationError::precondition(format!(
                "association {} is {}; only ASSOCIATED can be suspended",
                association.id, association.association_status
            )));
        }
        self.ctx
            .sim
            .ensure_no_conflict(&association.factory_record_id, GatedOperation::Suspend)
            .await?;

        let suspended = self
            .ctx
            .store
            .update_status(
                &association.id,
                AssociationStatus::Associated,
                AssociationStatus::Suspended,
                &request.user_id,
            )
            .await?;
        self.ctx
            .record_history(
                &suspended,
                Some(AssociationStatus::Associated),
                HistoryAction::Suspend,
                &request.user_id,
            )
            .await;
        self.ctx
            .revoke_credentials(&suspended, request.passcode.as_deref())
            .await;

        info!("Association {} suspended", suspended.id);
        self.ctx
            .publish(AssociationEvent::new(AssociationEventKind::Suspended, &suspended))
            .await?;
        Ok(AssociationResult::from(&suspended))
    }

    /// Re-enable a `SUSPENDED` association
    pub async fn resume(&self, request: AssociationActionRequest) -> Result<AssociationResult> {
        let span = action_span("resume", &request);
        self.resume_inner(request).instrument(span).await
    }

    async fn resume_inner(&self, request: AssociationActionRequest) -> Result<AssociationResult> {
        let association = self
            .load_authorized(&request.association_id, &request.user_id, request.is_admin)
            .await?;

        if association.association_status != AssociationStatus::Suspended {
            return Err(AssociationError::precondition(format!(
                "association {} is {}; only SUSPENDED can be resumed",
                association.id, association.association_status
            )));
        }
        self.ensure_device_eligible(&association).await?;
        self.ctx
            .sim
            .ensure_no_conflict(&association.factory_record_id, GatedOperation::Resume)
            .await?;

        let resumed = self
            .ctx
            .store
            .update_status(
                &association.id,
                AssociationStatus::Suspended,
                AssociationStatus::Associated,
                &request.user_id,
            )
            .await?;
        self.ctx
            .record_history(
                &resumed,
                Some(AssociationStatus::Suspended),
                HistoryAction::Resume,
                &request.user_id,
            )
            .await;
        self.ctx.register_credentials(&resumed).await;

        info!("Association {} resumed", resumed.id);
        self.ctx
            .publish(AssociationEvent::new(AssociationEventKind::Resumed, &resumed))
            .await?;
        Ok(AssociationResult::from(&resumed))
    }

    async fn ensure_device_eligible(&self, association: &DeviceAssociation) -> Result<()> {
        let device = self
            .ctx
            .store
            .get_factory_record(&association.factory_record_id)
            .await?
            .ok_or_else(|| {
                AssociationError::not_found(format!(
                    "device {} of association {}",
                    association.factory_record_id, association.id
                ))
            })?;
        if device.is_faulty_or_stolen() {
            return Err(AssociationError::precondition(format!(
                "device {} is faulty or stolen",
                device.display_key()
            )));
        }
        Ok(())
    }
}
