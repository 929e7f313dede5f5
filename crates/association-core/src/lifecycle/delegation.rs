use super::LifecycleOrchestrator;
use crate::clients::with_timeout;
use crate::error::{AssociationError, Result};
use crate::notify::AssociationEventKind;
use crate::types::{
    AssociationResult, AssociationStatus, DelegateRequest, DeviceAssociation, HistoryAction,
    RevokeDelegationRequest,
};
use chrono::{DateTime, TimeZone, Utc};
use devassoc_infra_common::LogContext;
use tracing::{info, Instrument, Level};

fn millis_to_utc(field: &str, millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| AssociationError::validation(format!("{} {} is out of range", field, millis)))
}

impl LifecycleOrchestrator {
    /// Grant a time-boxed secondary association on a device the caller owns.
    ///
    /// All checks run before the single insert, in this order: window,
    /// association type, self delegation, device resolution, ownership,
    /// internal directory lookup, duplicate.
    pub async fn delegate(&self, request: DelegateRequest, is_admin: bool) -> Result<AssociationResult> {
        let span = LogContext::with_operation("lifecycle", "delegate")
            .with_field("user_id", request.user_id.as_str())
            .with_field("delegate_user_id", request.delegate_user_id.as_str())
            .span(Level::INFO);
        self.delegate_inner(request, is_admin).instrument(span).await
    }

    async fn delegate_inner(&self, request: DelegateRequest, is_admin: bool) -> Result<AssociationResult> {
        if request.start_timestamp == 0 || request.start_timestamp >= request.end_timestamp {
            return Err(AssociationError::validation(format!(
                "delegation window [{}, {}) is empty or unset",
                request.start_timestamp, request.end_timestamp
            )));
        }
        let start = millis_to_utc("start timestamp", request.start_timestamp)?;
        let end = millis_to_utc("end timestamp", request.end_timestamp)?;

        let association_type = request.association_type.trim();
        if association_type.is_empty() || self.ctx.config.is_owner_type(association_type) {
            return Err(AssociationError::precondition(format!(
                "'{}' cannot be delegated",
                association_type
            )));
        }
        if !self.ctx.store.is_assoc_type_exist(association_type).await? {
            return Err(AssociationError::precondition(format!(
                "association type '{}' is not registered",
                association_type
            )));
        }

        let caller = request.user_id.trim();
        let delegate = request.delegate_user_id.trim();
        if caller.is_empty() || delegate.is_empty() {
            return Err(AssociationError::validation("user and delegate ids must not be empty"));
        }
        if caller == delegate {
            return Err(AssociationError::validation("cannot delegate a device to yourself"));
        }

        let device = self.ctx.resolve_device(&request.identity).await?;

        if !self.ctx.is_admin(caller, is_admin)
            && !self
                .ctx
                .store
                .check_associated_device_with_fact_data(&device.id, caller)
                .await?
        {
            return Err(AssociationError::unauthorized(format!(
                "user {} does not own device {}",
                caller,
                device.display_key()
            )));
        }

        if request.internal {
            let entry = with_timeout(
                "user directory",
                self.ctx.config.external_call_timeout(),
                self.ctx.directory.lookup(delegate),
            )
            .await?;
            if !entry.map_or(false, |user| user.is_complete()) {
                return Err(AssociationError::precondition(format!(
                    "internal delegate {} has no directory name and email",
                    delegate
                )));
            }
        }

        let duplicate = self
            .ctx
            .store
            .active_associations_for_factory(&device.id)
            .await?
            .into_iter()
            .any(|a| a.user_id == delegate && a.association_type.eq_ignore_ascii_case(association_type));
        if duplicate {
            return Err(AssociationError::conflict(format!(
                "{} already holds a '{}' delegation on device {}",
                delegate,
                association_type,
                device.display_key()
            )));
        }

        let mut row = DeviceAssociation::initiated(
            delegate,
            device.id.clone(),
            device.identity.clone(),
            association_type,
            caller,
        );
        row.association_status = AssociationStatus::Associated;
        row.start_time = start;
        row.end_time = Some(end);

        let delegation = self.ctx.store.insert(row).await?;
        self.ctx
            .record_history(&delegation, None, HistoryAction::Delegate, caller)
            .await;

        info!(
            "🤝 Device {} delegated to {} as '{}' until {}",
            device.display_key(),
            delegation.user_id,
            delegation.association_type,
            end
        );
        self.ctx
            .publish_best_effort(AssociationEventKind::Delegated, &delegation)
            .await;
        Ok(AssociationResult::from(&delegation))
    }

    /// End a delegation before its window closes. Allowed for the device
    /// owner and administrators.
    pub async fn revoke_delegation(&self, request: RevokeDelegationRequest) -> Result<AssociationResult> {
        let span = LogContext::with_operation("lifecycle", "revoke_delegation")
            .with_field("association_id", request.association_id.as_str())
            .span(Level::INFO);
        self.revoke_delegation_inner(request).instrument(span).await
    }

    async fn revoke_delegation_inner(&self, request: RevokeDelegationRequest) -> Result<AssociationResult> {
        let delegation = self
            .ctx
            .store
            .find_by_id(&request.association_id)
            .await?
            .ok_or_else(|| AssociationError::not_found(format!("association {}", request.association_id)))?;

        if self.ctx.config.is_owner_type(&delegation.association_type) {
            return Err(AssociationError::validation(format!(
                "association {} is an owner association; use terminate",
                delegation.id
            )));
        }
        if !self.ctx.is_admin(&request.user_id, request.is_admin)
            && !self
                .ctx
                .store
                .check_associated_device_with_fact_data(&delegation.factory_record_id, &request.user_id)
                .await?
        {
            return Err(AssociationError::unauthorized(format!(
                "user {} does not own the device of delegation {}",
                request.user_id, delegation.id
            )));
        }

        let from = delegation.association_status;
        if !matches!(from, AssociationStatus::Associated | AssociationStatus::Suspended) {
            return Err(AssociationError::precondition(format!(
                "delegation {} is {}",
                delegation.id, from
            )));
        }

        let revoked = self
            .ctx
            .store
            .update_status(&delegation.id, from, AssociationStatus::Disassociated, &request.user_id)
            .await?;
        self.ctx
            .record_history(&revoked, Some(from), HistoryAction::RevokeDelegation, &request.user_id)
            .await;

        info!("Delegation {} of {} revoked", revoked.id, revoked.user_id);
        self.ctx
            .publish_best_effort(AssociationEventKind::DelegationRevoked, &revoked)
            .await;
        Ok(AssociationResult::from(&revoked))
    }
}
