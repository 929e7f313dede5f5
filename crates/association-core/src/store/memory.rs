//! In-memory association store
//!
//! Reference implementation of [`AssociationStore`] backed by `DashMap`
//! tables. Writes touching a device take that device's lock for the
//! synchronous check-and-write only; no lock is held across an `.await`.

use super::{AssociationStore, ReplacementPlan, StoreError, StoreResult};
use crate::config::AssociationConfig;
use crate::types::{
    AssociationStatus, DeviceAssociation, DeviceAssociationHistory, FactoryRecord, IdentityQuery,
    SimTransaction, SimTransactionStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct InMemoryAssociationStore {
    associations: DashMap<String, DeviceAssociation>,
    factory_records: DashMap<String, FactoryRecord>,
    /// Insertion ordered so "latest" is well defined
    sim_transactions: RwLock<Vec<SimTransaction>>,
    association_types: RwLock<HashSet<String>>,
    history: RwLock<Vec<DeviceAssociationHistory>>,
    /// Per-device serialization points keyed by factory record id
    device_locks: DashMap<String, Arc<Mutex<()>>>,
    owner_types: Vec<String>,
    mutations: AtomicU64,
}

impl InMemoryAssociationStore {
    pub fn new() -> Self {
        Self::with_owner_types(vec!["Owner".to_string(), "defaultOwner".to_string()])
    }

    /// Store whose owner-slot rule covers the given association types
    pub fn with_owner_types(owner_types: Vec<String>) -> Self {
        Self {
            associations: DashMap::new(),
            factory_records: DashMap::new(),
            sim_transactions: RwLock::new(Vec::new()),
            association_types: RwLock::new(HashSet::new()),
            history: RwLock::new(Vec::new()),
            device_locks: DashMap::new(),
            owner_types,
            mutations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &AssociationConfig) -> Self {
        let mut owner_types = vec![config.default_association_type.clone()];
        owner_types.extend(config.legacy_owner_types.iter().cloned());
        Self::with_owner_types(owner_types)
    }

    /// Add an inventory record, as external provisioning would
    pub fn seed_factory_record(&self, record: FactoryRecord) {
        self.factory_records.insert(record.id.clone(), record);
    }

    /// Register a delegate association type
    pub fn register_association_type(&self, association_type: impl Into<String>) {
        self.association_types.write().insert(association_type.into());
    }

    /// Insert a row without any checks, for fixtures
    pub fn seed_association(&self, association: DeviceAssociation) {
        self.associations.insert(association.id.clone(), association);
    }

    /// Insert a SIM transaction without any checks, for fixtures
    pub fn seed_sim_transaction(&self, transaction: SimTransaction) {
        self.sim_transactions.write().push(transaction);
    }

    /// Number of committed writes since creation; seeding is not counted
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Snapshot of every row, oldest first
    pub fn all_associations(&self) -> Vec<DeviceAssociation> {
        let mut rows: Vec<DeviceAssociation> =
            self.associations.iter().map(|e| e.value().clone()).collect();
        rows.sort_by(|a, b| a.associated_on.cmp(&b.associated_on).then(a.id.cmp(&b.id)));
        rows
    }

    pub fn factory_record(&self, id: &str) -> Option<FactoryRecord> {
        self.factory_records.get(id).map(|r| r.clone())
    }

    fn is_owner_type(&self, association_type: &str) -> bool {
        self.owner_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(association_type))
    }

    fn device_lock(&self, factory_record_id: &str) -> Arc<Mutex<()>> {
        self.device_locks
            .entry(factory_record_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn touch(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn active_rows_for(&self, factory_record_id: &str) -> Vec<DeviceAssociation> {
        self.associations
            .iter()
            .filter(|e| e.factory_record_id == factory_record_id && e.is_active())
            .map(|e| e.value().clone())
            .collect()
    }

    fn get_row(&self, id: &str) -> StoreResult<DeviceAssociation> {
        self.associations
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound(format!("association {}", id)))
    }

    /// Owner slot and delegate uniqueness for a row about to become active
    fn check_slot_free(&self, candidate: &DeviceAssociation) -> StoreResult<()> {
        let candidate_is_owner = self.is_owner_type(&candidate.association_type);
        for row in self.active_rows_for(&candidate.factory_record_id) {
            if row.id == candidate.id {
                continue;
            }
            if candidate_is_owner && self.is_owner_type(&row.association_type) {
                return Err(StoreError::Conflict(format!(
                    "device {} already has active owner association {}",
                    candidate.factory_record_id, row.id
                )));
            }
            if !candidate_is_owner
                && row.user_id == candidate.user_id
                && row.association_type.eq_ignore_ascii_case(&candidate.association_type)
            {
                return Err(StoreError::Conflict(format!(
                    "user {} already holds an active '{}' association on device {}",
                    candidate.user_id, candidate.association_type, candidate.factory_record_id
                )));
            }
        }
        Ok(())
    }

    fn insert_sync(&self, association: DeviceAssociation) -> StoreResult<DeviceAssociation> {
        let lock = self.device_lock(&association.factory_record_id);
        let _guard = lock.lock();

        if self.associations.contains_key(&association.id) {
            return Err(StoreError::Conflict(format!(
                "association {} already exists",
                association.id
            )));
        }
        if association.is_active() {
            self.check_slot_free(&association)?;
        }

        self.associations
            .insert(association.id.clone(), association.clone());
        self.touch();
        debug!(
            "Inserted association {} ({}) for device {}",
            association.id, association.association_type, association.factory_record_id
        );
        Ok(association)
    }

    fn update_status_sync(
        &self,
        id: &str,
        expected: AssociationStatus,
        next: AssociationStatus,
        modified_by: &str,
    ) -> StoreResult<DeviceAssociation> {
        let factory_record_id = self.get_row(id)?.factory_record_id;
        let lock = self.device_lock(&factory_record_id);
        let _guard = lock.lock();

        let mut row = self.get_row(id)?;
        if row.factory_record_id != factory_record_id {
            return Err(StoreError::Conflict(format!(
                "association {} was repointed concurrently",
                id
            )));
        }
        if row.association_status != expected {
            return Err(StoreError::Conflict(format!(
                "association {} is {} (expected {})",
                id, row.association_status, expected
            )));
        }
        if !expected.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from: expected,
                to: next,
            });
        }

        let now = Utc::now();
        row.association_status = next;
        row.modified_by = modified_by.to_string();
        row.modified_on = now;
        match next {
            AssociationStatus::Disassociated | AssociationStatus::AssociationFailed => {
                row.end_time = Some(now);
            }
            AssociationStatus::Associated if expected == AssociationStatus::Disassociated => {
                row.end_time = None;
            }
            _ => {}
        }

        if !expected.is_active() && next.is_active() {
            self.check_slot_free(&row)?;
        }

        self.associations.insert(row.id.clone(), row.clone());
        self.touch();
        Ok(row)
    }

    fn reassign_owner_sync(
        &self,
        id: &str,
        expected_user_id: &str,
        new_user_id: &str,
        association_type: &str,
        modified_by: &str,
    ) -> StoreResult<DeviceAssociation> {
        let factory_record_id = self.get_row(id)?.factory_record_id;
        let lock = self.device_lock(&factory_record_id);
        let _guard = lock.lock();

        let mut row = self.get_row(id)?;
        if !row.is_active() || row.user_id != expected_user_id {
            return Err(StoreError::Conflict(format!(
                "association {} is no longer held by {}",
                id, expected_user_id
            )));
        }

        row.user_id = new_user_id.to_string();
        row.association_type = association_type.to_string();
        row.modified_by = modified_by.to_string();
        row.modified_on = Utc::now();
        self.check_slot_free(&row)?;

        self.associations.insert(row.id.clone(), row.clone());
        self.touch();
        Ok(row)
    }

    fn apply_replacement_sync(&self, plan: &ReplacementPlan) -> StoreResult<DeviceAssociation> {
        if plan.expected_factory_record_id == plan.replacement_factory_record_id {
            return Err(StoreError::Conflict(
                "current and replacement device are the same record".to_string(),
            ));
        }

        // Fixed lock order prevents two opposite swaps from deadlocking
        let mut ids = [
            plan.expected_factory_record_id.as_str(),
            plan.replacement_factory_record_id.as_str(),
        ];
        ids.sort_unstable();
        let first = self.device_lock(ids[0]);
        let second = self.device_lock(ids[1]);
        let _first_guard = first.lock();
        let _second_guard = second.lock();

        let association = self.get_row(&plan.association_id)?;
        if association.factory_record_id != plan.expected_factory_record_id || !association.is_active() {
            return Err(StoreError::Conflict(format!(
                "association {} no longer points at device {}",
                plan.association_id, plan.expected_factory_record_id
            )));
        }

        let mut current = self
            .factory_record(&plan.expected_factory_record_id)
            .ok_or_else(|| StoreError::NotFound(format!("factory record {}", plan.expected_factory_record_id)))?;
        let mut replacement = self
            .factory_record(&plan.replacement_factory_record_id)
            .ok_or_else(|| StoreError::NotFound(format!("factory record {}", plan.replacement_factory_record_id)))?;

        if current.lifecycle_state != plan.current_transition.from {
            return Err(StoreError::Conflict(format!(
                "device {} is {} (expected {})",
                current.id, current.lifecycle_state, plan.current_transition.from
            )));
        }
        if replacement.lifecycle_state != plan.replacement_transition.from {
            return Err(StoreError::Conflict(format!(
                "device {} is {} (expected {})",
                replacement.id, replacement.lifecycle_state, plan.replacement_transition.from
            )));
        }
        if !self.active_rows_for(&replacement.id).is_empty() {
            return Err(StoreError::Conflict(format!(
                "replacement device {} is already associated",
                replacement.id
            )));
        }

        let now = Utc::now();
        {
            let mut transactions = self.sim_transactions.write();
            for tx in transactions.iter_mut().filter(|tx| {
                tx.status.is_in_flight() && plan.cancel_transaction_ids.contains(&tx.transaction_id)
            }) {
                tx.status = SimTransactionStatus::Canceled;
                tx.updated_on = now;
            }
        }

        current.lifecycle_state = plan.current_transition.to.clone();
        replacement.lifecycle_state = plan.replacement_transition.to.clone();
        self.factory_records.insert(current.id.clone(), current.clone());
        self.factory_records.insert(replacement.id.clone(), replacement.clone());

        // Delegations follow the physical device swap together with the owner
        let mut repointed_owner = None;
        for mut row in self.active_rows_for(&current.id) {
            row.factory_record_id = replacement.id.clone();
            row.identity = plan.replacement_identity.clone();
            row.device_id = DeviceAssociation::derive_device_id(&replacement.id, &row.identity);
            row.modified_by = plan.modified_by.clone();
            row.modified_on = now;
            if row.id == plan.association_id {
                repointed_owner = Some(row.clone());
            }
            self.associations.insert(row.id.clone(), row);
        }
        self.touch();

        repointed_owner.ok_or_else(|| StoreError::Backend(format!(
            "association {} vanished during replacement",
            plan.association_id
        )))
    }
}

impl Default for InMemoryAssociationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssociationStore for InMemoryAssociationStore {
    async fn find(&self, id: &str, user_id: Option<&str>) -> StoreResult<Option<DeviceAssociation>> {
        Ok(self
            .associations
            .get(id)
            .map(|r| r.clone())
            .filter(|a| user_id.map_or(true, |u| a.user_id == u)))
    }

    async fn find_valid_associations(&self, serial_number: &str) -> StoreResult<Vec<DeviceAssociation>> {
        Ok(self
            .associations
            .iter()
            .filter(|e| e.is_active() && e.identity.serial_number.as_deref() == Some(serial_number))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn fetch_associated_devices(&self, user_id: &str) -> StoreResult<Vec<DeviceAssociation>> {
        Ok(self
            .associations
            .iter()
            .filter(|e| e.is_active() && e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn active_associations_for_factory(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Vec<DeviceAssociation>> {
        Ok(self.active_rows_for(factory_record_id))
    }

    async fn get_all_m2m_associations(&self, user_id: &str) -> StoreResult<Vec<DeviceAssociation>> {
        Ok(self
            .associations
            .iter()
            .filter(|e| e.is_active() && e.user_id == user_id && !self.is_owner_type(&e.association_type))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn check_associated_device_with_fact_data(
        &self,
        factory_record_id: &str,
        user_id: &str,
    ) -> StoreResult<bool> {
        Ok(self.associations.iter().any(|e| {
            e.factory_record_id == factory_record_id
                && e.user_id == user_id
                && e.association_status == AssociationStatus::Associated
                && self.is_owner_type(&e.association_type)
        }))
    }

    async fn has_terminated_association(&self, factory_record_id: &str) -> StoreResult<bool> {
        Ok(self.associations.iter().any(|e| {
            e.factory_record_id == factory_record_id
                && e.association_status == AssociationStatus::Disassociated
        }))
    }

    async fn insert(&self, association: DeviceAssociation) -> StoreResult<DeviceAssociation> {
        self.insert_sync(association)
    }

    async fn update_status(
        &self,
        id: &str,
        expected: AssociationStatus,
        next: AssociationStatus,
        modified_by: &str,
    ) -> StoreResult<DeviceAssociation> {
        self.update_status_sync(id, expected, next, modified_by)
    }

    async fn reassign_owner(
        &self,
        id: &str,
        expected_user_id: &str,
        new_user_id: &str,
        association_type: &str,
        modified_by: &str,
    ) -> StoreResult<DeviceAssociation> {
        self.reassign_owner_sync(id, expected_user_id, new_user_id, association_type, modified_by)
    }

    async fn is_assoc_type_exist(&self, association_type: &str) -> StoreResult<bool> {
        Ok(self
            .association_types
            .read()
            .iter()
            .any(|t| t.eq_ignore_ascii_case(association_type)))
    }

    async fn construct_and_fetch_factory_data(
        &self,
        query: &IdentityQuery,
    ) -> StoreResult<Vec<FactoryRecord>> {
        let mut records: Vec<FactoryRecord> = self
            .factory_records
            .iter()
            .filter(|e| query.matches(&e.identity))
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn get_factory_record(&self, id: &str) -> StoreResult<Option<FactoryRecord>> {
        Ok(self.factory_record(id))
    }

    async fn latest_sim_transaction(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Option<SimTransaction>> {
        Ok(self
            .sim_transactions
            .read()
            .iter()
            .rev()
            .find(|tx| tx.factory_record_id == factory_record_id)
            .cloned())
    }

    async fn find_sim_transaction(&self, transaction_id: &str) -> StoreResult<Option<SimTransaction>> {
        Ok(self
            .sim_transactions
            .read()
            .iter()
            .find(|tx| tx.transaction_id == transaction_id)
            .cloned())
    }

    async fn in_flight_sim_transactions(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Vec<SimTransaction>> {
        Ok(self
            .sim_transactions
            .read()
            .iter()
            .filter(|tx| tx.factory_record_id == factory_record_id && tx.status.is_in_flight())
            .cloned()
            .collect())
    }

    async fn insert_sim_transaction(&self, transaction: SimTransaction) -> StoreResult<()> {
        let mut transactions = self.sim_transactions.write();
        if transactions
            .iter()
            .any(|tx| tx.transaction_id == transaction.transaction_id)
        {
            return Err(StoreError::Conflict(format!(
                "SIM transaction {} already recorded",
                transaction.transaction_id
            )));
        }
        transactions.push(transaction);
        self.touch();
        Ok(())
    }

    async fn update_sim_transaction_status(
        &self,
        transaction_id: &str,
        status: SimTransactionStatus,
    ) -> StoreResult<SimTransaction> {
        let mut transactions = self.sim_transactions.write();
        let tx = transactions
            .iter_mut()
            .find(|tx| tx.transaction_id == transaction_id)
            .ok_or_else(|| StoreError::NotFound(format!("SIM transaction {}", transaction_id)))?;

        if tx.status == status {
            return Ok(tx.clone());
        }
        if tx.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "SIM transaction {} already finished as {}",
                transaction_id, tx.status
            )));
        }
        tx.status = status;
        tx.updated_on = Utc::now();
        let updated = tx.clone();
        drop(transactions);
        self.touch();
        Ok(updated)
    }

    async fn apply_replacement(&self, plan: &ReplacementPlan) -> StoreResult<DeviceAssociation> {
        self.apply_replacement_sync(plan)
    }

    async fn append_history(&self, entry: DeviceAssociationHistory) -> StoreResult<()> {
        self.history.write().push(entry);
        self.touch();
        Ok(())
    }

    async fn history_for(&self, association_id: &str) -> StoreResult<Vec<DeviceAssociationHistory>> {
        Ok(self
            .history
            .read()
            .iter()
            .filter(|h| h.association_id == association_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DeviceIdentity, LifecycleState, LifecycleTransition, SimTransactionKind, TransitionPath,
    };

    fn owner_row(user: &str, factory: &str) -> DeviceAssociation {
        DeviceAssociation::initiated(user, factory, DeviceIdentity::with_serial("S1"), "Owner", user)
    }

    #[tokio::test]
    async fn second_owner_insert_conflicts() {
        let store = InMemoryAssociationStore::new();
        store.insert(owner_row("alice", "f-1")).await.unwrap();
        let err = store.insert(owner_row("bob", "f-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn legacy_owner_type_shares_the_slot() {
        let store = InMemoryAssociationStore::new();
        store.insert(owner_row("alice", "f-1")).await.unwrap();
        let legacy = DeviceAssociation::initiated(
            "bob",
            "f-1",
            DeviceIdentity::with_serial("S1"),
            "defaultOwner",
            "bob",
        );
        assert!(store.insert(legacy).await.is_err());
    }

    #[tokio::test]
    async fn stale_expected_status_is_a_conflict() {
        let store = InMemoryAssociationStore::new();
        let row = store.insert(owner_row("alice", "f-1")).await.unwrap();
        let err = store
            .update_status(&row.id, AssociationStatus::Associated, AssociationStatus::Suspended, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn initiated_to_disassociated_is_illegal() {
        let store = InMemoryAssociationStore::new();
        let row = store.insert(owner_row("alice", "f-1")).await.unwrap();
        let err = store
            .update_status(
                &row.id,
                AssociationStatus::AssociationInitiated,
                AssociationStatus::Disassociated,
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn restore_rechecks_owner_slot() {
        let store = InMemoryAssociationStore::new();
        let first = store.insert(owner_row("alice", "f-1")).await.unwrap();
        store
            .update_status(&first.id, AssociationStatus::AssociationInitiated, AssociationStatus::Associated, "alice")
            .await
            .unwrap();
        store
            .update_status(&first.id, AssociationStatus::Associated, AssociationStatus::Disassociated, "alice")
            .await
            .unwrap();
        store.insert(owner_row("bob", "f-1")).await.unwrap();

        let err = store
            .update_status(&first.id, AssociationStatus::Disassociated, AssociationStatus::Associated, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn latest_transaction_is_last_inserted() {
        let store = InMemoryAssociationStore::new();
        store
            .insert_sim_transaction(SimTransaction::pending("f-1", "tx-1", SimTransactionKind::Activate, None))
            .await
            .unwrap();
        store
            .insert_sim_transaction(SimTransaction::pending("f-1", "tx-2", SimTransactionKind::Suspend, None))
            .await
            .unwrap();
        let latest = store.latest_sim_transaction("f-1").await.unwrap().unwrap();
        assert_eq!(latest.transaction_id, "tx-2");
    }

    #[tokio::test]
    async fn finished_transaction_cannot_change() {
        let store = InMemoryAssociationStore::new();
        store
            .insert_sim_transaction(SimTransaction::pending("f-1", "tx-1", SimTransactionKind::Activate, None))
            .await
            .unwrap();
        store
            .update_sim_transaction_status("tx-1", SimTransactionStatus::Completed)
            .await
            .unwrap();
        assert!(store
            .update_sim_transaction_status("tx-1", SimTransactionStatus::Failed)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn factory_lookup_applies_constraints() {
        let store = InMemoryAssociationStore::new();
        store.seed_factory_record(FactoryRecord::new(
            "f-1",
            DeviceIdentity {
                imei: Some("I1".into()),
                serial_number: Some("S1".into()),
                ..Default::default()
            },
            LifecycleState::Provisioned,
        ));
        let query = DeviceIdentity {
            imei: Some("I1".into()),
            serial_number: Some("S2".into()),
            ..Default::default()
        }
        .to_query(&[crate::types::IdentityField::Imei])
        .unwrap();
        assert!(store.construct_and_fetch_factory_data(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replacement_rechecks_lifecycle_state() {
        let store = InMemoryAssociationStore::new();
        store.seed_factory_record(FactoryRecord::new(
            "f-1",
            DeviceIdentity::with_serial("S1"),
            LifecycleState::Active,
        ));
        store.seed_factory_record(FactoryRecord::new(
            "f-2",
            DeviceIdentity::with_serial("S2"),
            LifecycleState::Provisioned,
        ));
        let row = store.insert(owner_row("alice", "f-1")).await.unwrap();
        store
            .update_status(&row.id, AssociationStatus::AssociationInitiated, AssociationStatus::Associated, "alice")
            .await
            .unwrap();
        let mutations = store.mutation_count();

        let plan = ReplacementPlan {
            association_id: row.id.clone(),
            expected_factory_record_id: "f-1".into(),
            replacement_factory_record_id: "f-2".into(),
            replacement_identity: DeviceIdentity::with_serial("S2"),
            current_transition: LifecycleTransition {
                factory_record_id: "f-1".into(),
                from: LifecycleState::Stolen,
                to: LifecycleState::Provisioned,
                path: TransitionPath::StolenOrFaultyToProvisioned,
                reason: None,
            },
            replacement_transition: LifecycleTransition {
                factory_record_id: "f-2".into(),
                from: LifecycleState::Provisioned,
                to: LifecycleState::Active,
                path: TransitionPath::ProvisionedToActiveRole,
                reason: None,
            },
            cancel_transaction_ids: Vec::new(),
            modified_by: "alice".into(),
        };
        assert!(matches!(
            store.apply_replacement(&plan).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.mutation_count(), mutations);
        assert_eq!(store.factory_record("f-2").unwrap().lifecycle_state, LifecycleState::Provisioned);
    }
}
