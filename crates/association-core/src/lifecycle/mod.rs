//! Lifecycle orchestrator
//!
//! Owns the association state machine: associate (plain and VIN based),
//! terminate, restore, suspend, resume, delegation, bulk wipe and the read
//! APIs. Every operation runs all of its rejections before the first
//! mutation, commits through the store (which re-checks exclusivity), then
//! appends history and notifies.
//!
//! ```text
//! associate ──► INITIATED ──► ASSOCIATED ◄──► SUSPENDED
//!                   │             │               │
//!                   ▼             ▼               ▼
//!          ASSOCIATION_FAILED   DISASSOCIATED ◄───┘
//!                                 │
//!                                 └──► ASSOCIATED (restore)
//! ```

mod associate;
mod delegation;
mod queries;
mod transitions;
mod wipe;

use crate::config::AssociationConfig;
use crate::context::{Collaborators, OrchestratorContext};
use crate::error::{AssociationError, Result};
use crate::sim::SimCoordinator;
use crate::types::DeviceAssociation;
use std::sync::Arc;

pub struct LifecycleOrchestrator {
    ctx: OrchestratorContext,
}

impl LifecycleOrchestrator {
    pub fn new(collaborators: Collaborators, config: Arc<AssociationConfig>) -> Self {
        Self {
            ctx: OrchestratorContext::new(collaborators, config),
        }
    }

    pub fn config(&self) -> &AssociationConfig {
        &self.ctx.config
    }

    /// SIM coordinator used for gating and activation polling
    pub fn sim(&self) -> &SimCoordinator {
        &self.ctx.sim
    }

    /// Load an association the caller may act on
    async fn load_authorized(
        &self,
        association_id: &str,
        user_id: &str,
        is_admin: bool,
    ) -> Result<DeviceAssociation> {
        if association_id.trim().is_empty() {
            return Err(AssociationError::validation("association id must not be empty"));
        }
        let association = self
            .ctx
            .store
            .find_by_id(association_id)
            .await?
            .ok_or_else(|| AssociationError::not_found(format!("association {}", association_id)))?;

        if !self.ctx.is_admin(user_id, is_admin) && association.user_id != user_id {
            return Err(AssociationError::unauthorized(format!(
                "user {} does not own association {}",
                user_id, association_id
            )));
        }
        Ok(association)
    }

    /// Reject when the device already has an active owner row
    async fn ensure_owner_slot_free(&self, factory_record_id: &str) -> Result<()> {
        let holder = self
            .ctx
            .store
            .active_associations_for_factory(factory_record_id)
            .await?
            .into_iter()
            .find(|a| self.ctx.config.is_owner_type(&a.association_type));

        match holder {
            Some(existing) => Err(AssociationError::conflict(format!(
                "device {} is already associated ({})",
                factory_record_id, existing.id
            ))),
            None => Ok(()),
        }
    }
}
