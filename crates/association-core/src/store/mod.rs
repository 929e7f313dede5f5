//! Association store contract
//!
//! The store is the single authority for cross-entity invariants. Every
//! mutating call re-validates its expectations (current status, owner slot,
//! lifecycle state) at commit time and answers with [`StoreError::Conflict`]
//! when another writer got there first. Orchestrators run their own checks
//! earlier for precise error messages, but correctness rests here.

pub mod memory;

use crate::types::{
    AssociationStatus, DeviceAssociation, DeviceAssociationHistory, DeviceIdentity, FactoryRecord,
    IdentityQuery, LifecycleTransition, SimTransaction, SimTransactionStatus,
};
use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryAssociationStore;

/// Store level failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Uniqueness or optimistic check failed at commit time
    #[error("store conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal transition of {id} from {from} to {to}")]
    IllegalTransition {
        id: String,
        from: AssociationStatus,
        to: AssociationStatus,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Everything a device replacement writes, applied atomically
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementPlan {
    pub association_id: String,
    /// Factory record the association must still point at
    pub expected_factory_record_id: String,
    pub replacement_factory_record_id: String,
    pub replacement_identity: DeviceIdentity,
    pub current_transition: LifecycleTransition,
    pub replacement_transition: LifecycleTransition,
    /// Pending activation transactions of the current device to cancel
    pub cancel_transaction_ids: Vec<String>,
    pub modified_by: String,
}

/// Persistence contract for associations, inventory and SIM transactions
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Association by id, optionally restricted to one user
    async fn find(&self, id: &str, user_id: Option<&str>) -> StoreResult<Option<DeviceAssociation>>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<DeviceAssociation>> {
        self.find(id, None).await
    }

    /// Active rows whose device carries `serial_number`
    async fn find_valid_associations(&self, serial_number: &str) -> StoreResult<Vec<DeviceAssociation>>;

    /// Active rows held by `user_id`
    async fn fetch_associated_devices(&self, user_id: &str) -> StoreResult<Vec<DeviceAssociation>>;

    /// Active rows of any type on one device
    async fn active_associations_for_factory(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Vec<DeviceAssociation>>;

    /// Active delegate (non-owner) rows held by `user_id`
    async fn get_all_m2m_associations(&self, user_id: &str) -> StoreResult<Vec<DeviceAssociation>>;

    /// Whether `user_id` holds the ASSOCIATED owner row of the device
    async fn check_associated_device_with_fact_data(
        &self,
        factory_record_id: &str,
        user_id: &str,
    ) -> StoreResult<bool>;

    /// Whether the device was ever disassociated
    async fn has_terminated_association(&self, factory_record_id: &str) -> StoreResult<bool>;

    /// Insert a new row, enforcing owner-slot and delegate uniqueness
    async fn insert(&self, association: DeviceAssociation) -> StoreResult<DeviceAssociation>;

    /// Move a row from `expected` to `next`
    async fn update_status(
        &self,
        id: &str,
        expected: AssociationStatus,
        next: AssociationStatus,
        modified_by: &str,
    ) -> StoreResult<DeviceAssociation>;

    /// Hand an active row to another user, rewriting its type
    async fn reassign_owner(
        &self,
        id: &str,
        expected_user_id: &str,
        new_user_id: &str,
        association_type: &str,
        modified_by: &str,
    ) -> StoreResult<DeviceAssociation>;

    /// Association type registry lookup
    async fn is_assoc_type_exist(&self, association_type: &str) -> StoreResult<bool>;

    /// Factory records matching an identity fragment; the caller interprets
    /// 0 / 1 / many
    async fn construct_and_fetch_factory_data(
        &self,
        query: &IdentityQuery,
    ) -> StoreResult<Vec<FactoryRecord>>;

    async fn get_factory_record(&self, id: &str) -> StoreResult<Option<FactoryRecord>>;

    /// Most recently created SIM transaction for a device
    async fn latest_sim_transaction(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Option<SimTransaction>>;

    async fn find_sim_transaction(&self, transaction_id: &str) -> StoreResult<Option<SimTransaction>>;

    /// In-flight transactions of a device, oldest first
    async fn in_flight_sim_transactions(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Vec<SimTransaction>>;

    async fn insert_sim_transaction(&self, transaction: SimTransaction) -> StoreResult<()>;

    async fn update_sim_transaction_status(
        &self,
        transaction_id: &str,
        status: SimTransactionStatus,
    ) -> StoreResult<SimTransaction>;

    /// Apply a device swap in one step, re-checking every expectation
    async fn apply_replacement(&self, plan: &ReplacementPlan) -> StoreResult<DeviceAssociation>;

    async fn append_history(&self, entry: DeviceAssociationHistory) -> StoreResult<()>;

    /// Audit rows of one association in insertion order
    async fn history_for(&self, association_id: &str) -> StoreResult<Vec<DeviceAssociationHistory>>;
}
