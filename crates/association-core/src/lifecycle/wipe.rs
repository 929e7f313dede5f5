use super::LifecycleOrchestrator;
use crate::error::{AssociationError, Result};
use crate::notify::AssociationEventKind;
use crate::types::{AssociationStatus, HistoryAction, WipeItemFailure, WipeOutcome};
use devassoc_infra_common::LogContext;
use std::collections::HashSet;
use tracing::{info, warn, Instrument, Level};

impl LifecycleOrchestrator {
    /// Hand the owner slot of each serial back to the placeholder owner.
    ///
    /// Input is validated as a whole before anything is written. Serials are
    /// then processed one by one; a failing serial does not undo the ones
    /// before it. When every serial fails the call returns
    /// [`AssociationError::WipeFailed`].
    pub async fn wipe_devices(&self, user_id: Option<&str>, serials: &[String]) -> Result<WipeOutcome> {
        let span = LogContext::with_operation("lifecycle", "wipe_devices")
            .with_field("user_id", user_id.unwrap_or("<none>"))
            .with_field("devices", serials.len().to_string())
            .span(Level::INFO);
        self.wipe_devices_inner(user_id, serials).instrument(span).await
    }

    async fn wipe_devices_inner(&self, user_id: Option<&str>, serials: &[String]) -> Result<WipeOutcome> {
        let user_id = user_id
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AssociationError::precondition("wipe requires a user id"))?;
        if serials.is_empty() {
            return Err(AssociationError::validation("no serial numbers to wipe"));
        }
        if serials.iter().any(|s| s.trim().is_empty()) {
            return Err(AssociationError::validation("serial numbers must not be blank"));
        }

        let mut seen = HashSet::new();
        let mut outcome = WipeOutcome::default();
        for serial in serials.iter().map(|s| s.trim()).filter(|s| seen.insert(*s)) {
            match self.wipe_one(user_id, serial).await {
                Ok(()) => outcome.wiped.push(serial.to_string()),
                Err(e) => {
                    warn!("Wipe of {} failed: {}", serial, e);
                    outcome.failures.push(WipeItemFailure {
                        serial_number: serial.to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if outcome.wiped.is_empty() {
            return Err(AssociationError::WipeFailed {
                failures: outcome.failures,
            });
        }
        info!(
            "Wiped {} device(s), {} failure(s)",
            outcome.wiped.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    async fn wipe_one(&self, user_id: &str, serial: &str) -> Result<()> {
        let rows = self.ctx.store.find_valid_associations(serial).await?;
        let owner_row = rows
            .iter()
            .find(|a| {
                a.user_id == user_id
                    && self.ctx.config.is_owner_type(&a.association_type)
                    && matches!(
                        a.association_status,
                        AssociationStatus::Associated | AssociationStatus::Suspended
                    )
            })
            .cloned()
            .ok_or_else(|| {
                AssociationError::unauthorized(format!(
                    "user {} does not hold the active association of {}",
                    user_id, serial
                ))
            })?;

        let device = self
            .ctx
            .store
            .get_factory_record(&owner_row.factory_record_id)
            .await?
            .ok_or_else(|| AssociationError::not_found(format!("device record of {}", serial)))?;
        if device.is_faulty_or_stolen() {
            return Err(AssociationError::precondition(format!(
                "device {} is faulty or stolen",
                serial
            )));
        }

        // Stale rows claiming an owner type would block the placeholder owner
        for stale in rows.iter().filter(|a| {
            a.id != owner_row.id && self.ctx.config.is_owner_type(&a.association_type)
        }) {
            let from = stale.association_status;
            let next = if from == AssociationStatus::AssociationInitiated {
                AssociationStatus::AssociationFailed
            } else {
                AssociationStatus::Disassociated
            };
            let demoted = self.ctx.store.update_status(&stale.id, from, next, user_id).await?;
            self.ctx
                .record_history(&demoted, Some(from), HistoryAction::Wipe, user_id)
                .await;
        }

        let reassigned = self
            .ctx
            .store
            .reassign_owner(
                &owner_row.id,
                user_id,
                &self.ctx.config.wipe_placeholder_owner,
                &self.ctx.config.default_association_type,
                user_id,
            )
            .await?;
        self.ctx
            .record_history(
                &reassigned,
                Some(owner_row.association_status),
                HistoryAction::Wipe,
                user_id,
            )
            .await;

        self.ctx
            .publish_best_effort(AssociationEventKind::Wiped, &reassigned)
            .await;
        Ok(())
    }
}
