//! SIM transaction coordinator

use super::client::{SimProvisioningClient, SimRequestMeta};
use crate::clients::with_timeout;
use crate::config::AssociationConfig;
use crate::error::{AssociationError, Result};
use crate::store::AssociationStore;
use crate::types::{
    DeviceIdentity, GatedOperation, IdentityField, SimTargetState, SimTransaction,
    SimTransactionStatus,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COLLABORATOR: &str = "sim provisioning";

/// Records SIM transactions, gates conflicting operations and polls status
pub struct SimCoordinator {
    client: Arc<dyn SimProvisioningClient>,
    store: Arc<dyn AssociationStore>,
    config: Arc<AssociationConfig>,
}

impl SimCoordinator {
    pub fn new(
        client: Arc<dyn SimProvisioningClient>,
        store: Arc<dyn AssociationStore>,
        config: Arc<AssociationConfig>,
    ) -> Self {
        Self { client, store, config }
    }

    /// Reject `operation` while a conflicting transaction of the device is
    /// still pending or in progress. There is no queuing.
    pub async fn ensure_no_conflict(
        &self,
        factory_record_id: &str,
        operation: GatedOperation,
    ) -> Result<()> {
        if let Some(tx) = self.store.latest_sim_transaction(factory_record_id).await? {
            if tx.status.is_in_flight() && operation.conflicts_with(tx.kind) {
                warn!(
                    "{} blocked on device {}: SIM {} transaction {} is {}",
                    operation, factory_record_id, tx.kind, tx.transaction_id, tx.status
                );
                return Err(AssociationError::precondition(format!(
                    "SIM {} transaction {} is still {} for device {}",
                    tx.kind, tx.transaction_id, tx.status, factory_record_id
                )));
            }
        }
        Ok(())
    }

    /// Request a SIM state change and record it as PENDING.
    ///
    /// Returns `Ok(None)` when the service rejected the request immediately;
    /// nothing is recorded in that case.
    pub async fn change_sim_state(
        &self,
        factory_record_id: &str,
        identity: &DeviceIdentity,
        target: SimTargetState,
        association_id: Option<&str>,
    ) -> Result<Option<String>> {
        let subscriber = identity
            .get(IdentityField::Imsi)
            .or_else(|| identity.get(IdentityField::Iccid))
            .ok_or_else(|| {
                AssociationError::precondition(format!(
                    "device {} has no IMSI or ICCID for SIM provisioning",
                    factory_record_id
                ))
            })?;

        let meta = SimRequestMeta {
            factory_record_id: factory_record_id.to_string(),
            association_id: association_id.map(str::to_string),
            iccid: identity.get(IdentityField::Iccid).map(str::to_string),
            msisdn: identity.get(IdentityField::Msisdn).map(str::to_string),
        };

        let transaction_id = with_timeout(
            COLLABORATOR,
            self.config.external_call_timeout(),
            self.client.change_sim_state(subscriber, target, &meta),
        )
        .await?;

        let Some(transaction_id) = transaction_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
        else {
            warn!(
                "SIM service rejected {:?} for device {} (no transaction id)",
                target, factory_record_id
            );
            return Ok(None);
        };

        self.store
            .insert_sim_transaction(SimTransaction::pending(
                factory_record_id,
                transaction_id.clone(),
                target.kind(),
                association_id.map(str::to_string),
            ))
            .await?;

        info!(
            "📶 SIM {} transaction {} recorded for device {}",
            target.kind(),
            transaction_id,
            factory_record_id
        );
        Ok(Some(transaction_id))
    }

    /// Query the service once and persist any change
    pub async fn poll_transaction_status(&self, transaction_id: &str) -> Result<SimTransactionStatus> {
        let tx = self
            .store
            .find_sim_transaction(transaction_id)
            .await?
            .ok_or_else(|| AssociationError::not_found(format!("SIM transaction {}", transaction_id)))?;

        if tx.status.is_terminal() {
            return Ok(tx.status);
        }

        let status = with_timeout(
            COLLABORATOR,
            self.config.external_call_timeout(),
            self.client.poll_transaction_status(transaction_id),
        )
        .await?;

        if status != tx.status {
            self.store
                .update_sim_transaction_status(transaction_id, status)
                .await?;
            debug!("SIM transaction {} moved {} -> {}", transaction_id, tx.status, status);
        }
        Ok(status)
    }

    /// Poll until a terminal status or the configured attempt limit.
    /// Returns the last status seen.
    pub async fn await_terminal_status(&self, transaction_id: &str) -> Result<SimTransactionStatus> {
        let attempts = self.config.sim.max_poll_attempts.max(1);
        let mut status = self.poll_transaction_status(transaction_id).await?;

        for _ in 1..attempts {
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(self.config.poll_interval()).await;
            status = self.poll_transaction_status(transaction_id).await?;
        }

        if !status.is_terminal() {
            debug!(
                "SIM transaction {} still {} after {} poll(s)",
                transaction_id, status, attempts
            );
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientResult;
    use crate::config::SimConfig;
    use crate::error::ErrorKind;
    use crate::store::InMemoryAssociationStore;
    use crate::types::SimTransactionKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedSim {
        transaction_id: Option<String>,
        statuses: Mutex<VecDeque<SimTransactionStatus>>,
        polls: Mutex<u32>,
    }

    #[async_trait]
    impl SimProvisioningClient for ScriptedSim {
        async fn change_sim_state(
            &self,
            _imsi: &str,
            _target: SimTargetState,
            _meta: &SimRequestMeta,
        ) -> ClientResult<Option<String>> {
            Ok(self.transaction_id.clone())
        }

        async fn poll_transaction_status(&self, _id: &str) -> ClientResult<SimTransactionStatus> {
            *self.polls.lock() += 1;
            Ok(self
                .statuses
                .lock()
                .pop_front()
                .unwrap_or(SimTransactionStatus::InProgress))
        }
    }

    fn coordinator(
        transaction_id: Option<&str>,
        statuses: Vec<SimTransactionStatus>,
    ) -> (SimCoordinator, Arc<ScriptedSim>, Arc<InMemoryAssociationStore>) {
        let client = Arc::new(ScriptedSim {
            transaction_id: transaction_id.map(str::to_string),
            statuses: Mutex::new(statuses.into()),
            polls: Mutex::new(0),
        });
        let store = Arc::new(InMemoryAssociationStore::new());
        let config = Arc::new(AssociationConfig {
            sim: SimConfig {
                max_poll_attempts: 3,
                poll_interval_ms: 1,
            },
            ..Default::default()
        });
        (
            SimCoordinator::new(client.clone(), store.clone(), config),
            client,
            store,
        )
    }

    fn sim_identity() -> DeviceIdentity {
        DeviceIdentity {
            imsi: Some("001010123456789".into()),
            ..DeviceIdentity::with_serial("S1")
        }
    }

    #[tokio::test]
    async fn blank_transaction_id_is_a_rejection() {
        let (sim, _, store) = coordinator(Some("  "), vec![]);
        let id = sim
            .change_sim_state("f-1", &sim_identity(), SimTargetState::Active, None)
            .await
            .unwrap();
        assert_eq!(id, None);
        assert!(store.latest_sim_transaction("f-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_imsi_and_iccid_is_a_precondition() {
        let (sim, _, _) = coordinator(Some("tx-1"), vec![]);
        let err = sim
            .change_sim_state("f-1", &DeviceIdentity::with_serial("S1"), SimTargetState::Active, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn pending_activation_gates_terminate_but_not_suspend() {
        let (sim, _, _) = coordinator(Some("tx-1"), vec![]);
        sim.change_sim_state("f-1", &sim_identity(), SimTargetState::Active, Some("a-1"))
            .await
            .unwrap();

        let err = sim
            .ensure_no_conflict("f-1", GatedOperation::Terminate)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        sim.ensure_no_conflict("f-1", GatedOperation::Suspend).await.unwrap();
    }

    #[tokio::test]
    async fn polling_stops_at_terminal_status() {
        let (sim, client, store) = coordinator(
            Some("tx-1"),
            vec![SimTransactionStatus::InProgress, SimTransactionStatus::Completed],
        );
        sim.change_sim_state("f-1", &sim_identity(), SimTargetState::Active, None)
            .await
            .unwrap();

        let status = sim.await_terminal_status("tx-1").await.unwrap();
        assert_eq!(status, SimTransactionStatus::Completed);
        assert_eq!(*client.polls.lock(), 2);
        let tx = store.find_sim_transaction("tx-1").await.unwrap().unwrap();
        assert_eq!(tx.status, SimTransactionStatus::Completed);
        assert_eq!(tx.kind, SimTransactionKind::Activate);
    }

    #[tokio::test]
    async fn polling_is_bounded() {
        let (sim, client, _) = coordinator(Some("tx-1"), vec![]);
        sim.change_sim_state("f-1", &sim_identity(), SimTargetState::Active, None)
            .await
            .unwrap();

        let status = sim.await_terminal_status("tx-1").await.unwrap();
        assert_eq!(status, SimTransactionStatus::InProgress);
        assert_eq!(*client.polls.lock(), 3);
    }
}
