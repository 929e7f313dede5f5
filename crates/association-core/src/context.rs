//! Collaborators and helpers shared by both orchestrators

use crate::clients::{
    with_timeout, AuthRevocationClient, ClientRegistration, UserDirectoryClient,
    VehicleProfileClient,
};
use crate::config::AssociationConfig;
use crate::error::{AssociationError, Result};
use crate::notify::{AssociationEvent, AssociationEventKind, NotificationFanout};
use crate::sim::{SimCoordinator, SimProvisioningClient};
use crate::store::AssociationStore;
use crate::types::{
    AssociationStatus, DeviceAssociation, DeviceAssociationHistory, DeviceIdentity, FactoryRecord,
    HistoryAction,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// External dependencies an orchestrator is built from
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn AssociationStore>,
    pub sim: Arc<dyn SimProvisioningClient>,
    pub auth: Arc<dyn AuthRevocationClient>,
    pub vehicles: Arc<dyn VehicleProfileClient>,
    pub directory: Arc<dyn UserDirectoryClient>,
    pub notifier: NotificationFanout,
}

pub(crate) struct OrchestratorContext {
    pub store: Arc<dyn AssociationStore>,
    pub sim: SimCoordinator,
    pub auth: Arc<dyn AuthRevocationClient>,
    pub vehicles: Arc<dyn VehicleProfileClient>,
    pub directory: Arc<dyn UserDirectoryClient>,
    pub notifier: NotificationFanout,
    pub config: Arc<AssociationConfig>,
}

impl OrchestratorContext {
    pub fn new(collaborators: Collaborators, config: Arc<AssociationConfig>) -> Self {
        let Collaborators {
            store,
            sim,
            auth,
            vehicles,
            directory,
            notifier,
        } = collaborators;

        Self {
            sim: SimCoordinator::new(sim, store.clone(), config.clone()),
            notifier: notifier.with_timeout(config.external_call_timeout()),
            store,
            auth,
            vehicles,
            directory,
            config,
        }
    }

    /// Admin flag, or a user on the internal whitelist
    pub fn is_admin(&self, user_id: &str, is_admin: bool) -> bool {
        is_admin || self.config.is_internal_user(user_id)
    }

    /// All factory records matching an identity fragment
    pub async fn device_candidates(&self, identity: &DeviceIdentity) -> Result<Vec<FactoryRecord>> {
        let query = identity
            .to_query(&self.config.identity_priority)
            .ok_or_else(|| AssociationError::validation("device identity must not be empty"))?;
        Ok(self.store.construct_and_fetch_factory_data(&query).await?)
    }

    /// Exactly one factory record for an identity fragment
    pub async fn resolve_device(&self, identity: &DeviceIdentity) -> Result<FactoryRecord> {
        let mut candidates = self.device_candidates(identity).await?;
        match candidates.len() {
            0 => Err(AssociationError::not_found(format!(
                "no device matches {}",
                identity.describe()
            ))),
            1 => Ok(candidates.remove(0)),
            n => Err(AssociationError::conflict(format!(
                "{} devices match {}",
                n,
                identity.describe()
            ))),
        }
    }

    /// Append an audit row; the transition is already committed so a failure
    /// here is only logged
    pub async fn record_history(
        &self,
        association: &DeviceAssociation,
        from: Option<AssociationStatus>,
        action: HistoryAction,
        performed_by: &str,
    ) {
        let entry = DeviceAssociationHistory::record(association, from, action, performed_by);
        if let Err(e) = self.store.append_history(entry).await {
            error!(
                "Failed to append {:?} history for association {}: {}",
                action, association.id, e
            );
        }
    }

    /// Fan out an event; a hard failure is reported with the committed id
    pub async fn publish(&self, event: AssociationEvent) -> Result<()> {
        self.notifier
            .notify(&event)
            .await
            .map_err(|e| AssociationError::notification(Some(event.association_id.clone()), e))
    }

    /// Like [`publish`](Self::publish) but never fails
    pub async fn publish_best_effort(&self, kind: AssociationEventKind, association: &DeviceAssociation) {
        if let Err(e) = self.publish(AssociationEvent::new(kind, association)).await {
            warn!("Notification for {} of {} failed: {}", kind, association.id, e);
        }
    }

    /// Revoke device credentials; failures are logged, never returned.
    /// Delegate rows share the owner's device and leave its credentials alone.
    pub async fn revoke_credentials(&self, association: &DeviceAssociation, passcode: Option<&str>) {
        if !self.config.is_owner_type(&association.association_type) {
            debug!(
                "Keeping credentials of device {} for delegation {}",
                association.device_id, association.id
            );
            return;
        }
        let outcome = with_timeout(
            "auth revocation",
            self.config.external_call_timeout(),
            self.auth.delete_registered_client(&association.device_id, passcode),
        )
        .await;
        if let Err(e) = outcome {
            warn!(
                "Credential revocation for device {} (association {}) failed: {}",
                association.device_id, association.id, e
            );
        }
    }

    /// Re-register device credentials for an owner row; failures are logged, never returned
    pub async fn register_credentials(&self, association: &DeviceAssociation) {
        if !self.config.is_owner_type(&association.association_type) {
            return;
        }
        let registration = ClientRegistration {
            device_id: association.device_id.clone(),
            user_id: association.user_id.clone(),
            factory_record_id: association.factory_record_id.clone(),
        };
        let outcome = with_timeout(
            "auth registration",
            self.config.external_call_timeout(),
            self.auth
                .update_registered_client(&association.device_id, &registration),
        )
        .await;
        if let Err(e) = outcome {
            warn!(
                "Credential registration for device {} (association {}) failed: {}",
                association.device_id, association.id, e
            );
        }
    }
}
