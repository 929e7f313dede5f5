//! Shared fixtures: in-process collaborators and a harness wiring them to
//! the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use devassoc_association_core::prelude::*;
use devassoc_association_core::store::{ReplacementPlan, StoreResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub const OWNER: &str = "alice";
pub const OTHER: &str = "bob";

/// SIM service answering from a script
#[derive(Default)]
pub struct MockSim {
    pub next_transaction_id: Mutex<Option<String>>,
    pub statuses: Mutex<VecDeque<SimTransactionStatus>>,
    pub requests: Mutex<Vec<(String, SimTargetState)>>,
}

impl MockSim {
    pub fn answering(transaction_id: Option<&str>) -> Self {
        Self {
            next_transaction_id: Mutex::new(transaction_id.map(str::to_string)),
            ..Default::default()
        }
    }

    pub fn push_status(&self, status: SimTransactionStatus) {
        self.statuses.lock().push_back(status);
    }
}

#[async_trait]
impl SimProvisioningClient for MockSim {
    async fn change_sim_state(
        &self,
        imsi: &str,
        target: SimTargetState,
        _meta: &SimRequestMeta,
    ) -> ClientResult<Option<String>> {
        self.requests.lock().push((imsi.to_string(), target));
        Ok(self.next_transaction_id.lock().clone())
    }

    async fn poll_transaction_status(&self, _transaction_id: &str) -> ClientResult<SimTransactionStatus> {
        Ok(self
            .statuses
            .lock()
            .pop_front()
            .unwrap_or(SimTransactionStatus::InProgress))
    }
}

#[derive(Default)]
pub struct MockAuth {
    pub fail: Mutex<bool>,
    pub revoked: Mutex<Vec<String>>,
    pub registered: Mutex<Vec<String>>,
}

#[async_trait]
impl AuthRevocationClient for MockAuth {
    async fn delete_registered_client(&self, device_id: &str, _passcode: Option<&str>) -> ClientResult<()> {
        if *self.fail.lock() {
            return Err(ClientError::new("auth", "revocation endpoint down"));
        }
        self.revoked.lock().push(device_id.to_string());
        Ok(())
    }

    async fn update_registered_client(
        &self,
        device_id: &str,
        _registration: &ClientRegistration,
    ) -> ClientResult<()> {
        if *self.fail.lock() {
            return Err(ClientError::new("auth", "registration endpoint down"));
        }
        self.registered.lock().push(device_id.to_string());
        Ok(())
    }
}

pub struct MockVehicles {
    pub profiles: Mutex<HashMap<String, VehicleProfile>>,
    pub model: Mutex<Option<VehicleModel>>,
    pub accept_updates: Mutex<bool>,
    pub updates: Mutex<Vec<VehicleAttributes>>,
}

impl Default for MockVehicles {
    fn default() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
            model: Mutex::new(Some(VehicleModel {
                model_code: "X5".to_string(),
                model_name: "Crossover".to_string(),
            })),
            accept_updates: Mutex::new(true),
            updates: Mutex::new(Vec::new()),
        }
    }
}

impl MockVehicles {
    pub fn with_profile(&self, factory_record_id: &str, vin: &str) {
        self.profiles.lock().insert(
            factory_record_id.to_string(),
            VehicleProfile {
                vin: vin.to_string(),
                plant: Some("P01".to_string()),
                model_year: Some("2024".to_string()),
            },
        );
    }
}

#[async_trait]
impl VehicleProfileClient for MockVehicles {
    async fn find_active_profile(&self, factory_record_id: &str) -> ClientResult<Option<VehicleProfile>> {
        Ok(self.profiles.lock().get(factory_record_id).cloned())
    }

    async fn decode_vin(&self, _vin: &str) -> ClientResult<VehicleModel> {
        self.model
            .lock()
            .clone()
            .ok_or_else(|| ClientError::new("vin decoder", "unknown VIN"))
    }

    async fn update_vehicle(&self, attributes: &VehicleAttributes) -> ClientResult<bool> {
        self.updates.lock().push(attributes.clone());
        Ok(*self.accept_updates.lock())
    }
}

#[derive(Default)]
pub struct MockDirectory {
    pub users: Mutex<HashMap<String, DirectoryUser>>,
}

impl MockDirectory {
    pub fn add(&self, user_id: &str, name: &str, email: &str) {
        self.users.lock().insert(
            user_id.to_string(),
            DirectoryUser {
                name: name.to_string(),
                email: email.to_string(),
            },
        );
    }
}

#[async_trait]
impl UserDirectoryClient for MockDirectory {
    async fn lookup(&self, user_id: &str) -> ClientResult<Option<DirectoryUser>> {
        Ok(self.users.lock().get(user_id).cloned())
    }
}

/// Handler recording every event it receives
pub struct RecordingHandler {
    pub name: String,
    pub capabilities: Vec<NotificationCapability>,
    pub fail_hard: Mutex<bool>,
    pub events: Mutex<Vec<AssociationEvent>>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capabilities: NotificationCapability::ALL.to_vec(),
            fail_hard: Mutex::new(false),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn kinds(&self) -> Vec<AssociationEventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl NotificationHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[NotificationCapability] {
        &self.capabilities
    }

    async fn handle(&self, event: &AssociationEvent) -> std::result::Result<(), HandlerError> {
        self.events.lock().push(event.clone());
        if *self.fail_hard.lock() {
            return Err(HandlerError::Hard("sink unavailable".to_string()));
        }
        Ok(())
    }
}

/// Store delegating to the in-memory one, with switchable write failures
pub struct FaultyStore {
    pub inner: Arc<InMemoryAssociationStore>,
    /// `update_status` into this status fails with a backend error
    pub fail_status: Mutex<Option<AssociationStatus>>,
    pub fail_replacement: Mutex<bool>,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryAssociationStore>) -> Self {
        Self {
            inner,
            fail_status: Mutex::new(None),
            fail_replacement: Mutex::new(false),
        }
    }
}

#[async_trait]
impl AssociationStore for FaultyStore {
    async fn find(&self, id: &str, user_id: Option<&str>) -> StoreResult<Option<DeviceAssociation>> {
        self.inner.find(id, user_id).await
    }

    async fn find_valid_associations(&self, serial_number: &str) -> StoreResult<Vec<DeviceAssociation>> {
        self.inner.find_valid_associations(serial_number).await
    }

    async fn fetch_associated_devices(&self, user_id: &str) -> StoreResult<Vec<DeviceAssociation>> {
        self.inner.fetch_associated_devices(user_id).await
    }

    async fn active_associations_for_factory(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Vec<DeviceAssociation>> {
        self.inner.active_associations_for_factory(factory_record_id).await
    }

    async fn get_all_m2m_associations(&self, user_id: &str) -> StoreResult<Vec<DeviceAssociation>> {
        self.inner.get_all_m2m_associations(user_id).await
    }

    async fn check_associated_device_with_fact_data(
        &self,
        factory_record_id: &str,
        user_id: &str,
    ) -> StoreResult<bool> {
        self.inner
            .check_associated_device_with_fact_data(factory_record_id, user_id)
            .await
    }

    async fn has_terminated_association(&self, factory_record_id: &str) -> StoreResult<bool> {
        self.inner.has_terminated_association(factory_record_id).await
    }

    async fn insert(&self, association: DeviceAssociation) -> StoreResult<DeviceAssociation> {
        self.inner.insert(association).await
    }

    async fn update_status(
        &self,
        id: &str,
        expected: AssociationStatus,
        next: AssociationStatus,
        modified_by: &str,
    ) -> StoreResult<DeviceAssociation> {
        if *self.fail_status.lock() == Some(next) {
            return Err(StoreError::Backend("write rejected".to_string()));
        }
        self.inner.update_status(id, expected, next, modified_by).await
    }

    async fn reassign_owner(
        &self,
        id: &str,
        expected_user_id: &str,
        new_user_id: &str,
        association_type: &str,
        modified_by: &str,
    ) -> StoreResult<DeviceAssociation> {
        self.inner
            .reassign_owner(id, expected_user_id, new_user_id, association_type, modified_by)
            .await
    }

    async fn is_assoc_type_exist(&self, association_type: &str) -> StoreResult<bool> {
        self.inner.is_assoc_type_exist(association_type).await
    }

    async fn construct_and_fetch_factory_data(
        &self,
        query: &IdentityQuery,
    ) -> StoreResult<Vec<FactoryRecord>> {
        self.inner.construct_and_fetch_factory_data(query).await
    }

    async fn get_factory_record(&self, id: &str) -> StoreResult<Option<FactoryRecord>> {
        self.inner.get_factory_record(id).await
    }

    async fn latest_sim_transaction(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Option<SimTransaction>> {
        self.inner.latest_sim_transaction(factory_record_id).await
    }

    async fn find_sim_transaction(&self, transaction_id: &str) -> StoreResult<Option<SimTransaction>> {
        self.inner.find_sim_transaction(transaction_id).await
    }

    async fn in_flight_sim_transactions(
        &self,
        factory_record_id: &str,
    ) -> StoreResult<Vec<SimTransaction>> {
        self.inner.in_flight_sim_transactions(factory_record_id).await
    }

    async fn insert_sim_transaction(&self, transaction: SimTransaction) -> StoreResult<()> {
        self.inner.insert_sim_transaction(transaction).await
    }

    async fn update_sim_transaction_status(
        &self,
        transaction_id: &str,
        status: SimTransactionStatus,
    ) -> StoreResult<SimTransaction> {
        self.inner.update_sim_transaction_status(transaction_id, status).await
    }

    async fn apply_replacement(&self, plan: &ReplacementPlan) -> StoreResult<DeviceAssociation> {
        if *self.fail_replacement.lock() {
            return Err(StoreError::Conflict("replacement raced".to_string()));
        }
        self.inner.apply_replacement(plan).await
    }

    async fn append_history(&self, entry: DeviceAssociationHistory) -> StoreResult<()> {
        self.inner.append_history(entry).await
    }

    async fn history_for(&self, association_id: &str) -> StoreResult<Vec<DeviceAssociationHistory>> {
        self.inner.history_for(association_id).await
    }
}

/// Everything a test needs, wired together
pub struct Harness {
    pub store: Arc<InMemoryAssociationStore>,
    pub sim: Arc<MockSim>,
    pub auth: Arc<MockAuth>,
    pub vehicles: Arc<MockVehicles>,
    pub directory: Arc<MockDirectory>,
    pub handler: Arc<RecordingHandler>,
    pub config: Arc<AssociationConfig>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AssociationConfig::default())
    }

    pub fn with_config(config: AssociationConfig) -> Self {
        devassoc_infra_common::try_setup_test_logging();
        let store = Arc::new(InMemoryAssociationStore::from_config(&config));
        store.register_association_type("driver");
        store.register_association_type("fleetManager");
        Self {
            store,
            sim: Arc::new(MockSim::answering(Some("tx-1"))),
            auth: Arc::new(MockAuth::default()),
            vehicles: Arc::new(MockVehicles::default()),
            directory: Arc::new(MockDirectory::default()),
            handler: Arc::new(RecordingHandler::new("recorder")),
            config: Arc::new(config),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            sim: self.sim.clone(),
            auth: self.auth.clone(),
            vehicles: self.vehicles.clone(),
            directory: self.directory.clone(),
            notifier: NotificationFanout::new().with_handler(self.handler.clone()),
        }
    }

    /// Collaborators writing through a [`FaultyStore`] over the harness store
    pub fn faulty_collaborators(&self) -> (Arc<FaultyStore>, Collaborators) {
        let faulty = Arc::new(FaultyStore::new(self.store.clone()));
        let mut collaborators = self.collaborators();
        collaborators.store = faulty.clone() as Arc<dyn AssociationStore>;
        (faulty, collaborators)
    }

    pub fn lifecycle(&self) -> LifecycleOrchestrator {
        LifecycleOrchestrator::new(self.collaborators(), self.config.clone())
    }

    pub fn replacement(&self) -> ReplacementOrchestrator {
        ReplacementOrchestrator::new(self.collaborators(), self.config.clone())
    }

    /// Seed a device addressed by serial, with SIM identifiers
    pub fn seed_device(&self, id: &str, serial: &str, state: LifecycleState) -> FactoryRecord {
        let record = FactoryRecord::new(
            id,
            DeviceIdentity {
                serial_number: Some(serial.to_string()),
                imei: Some(format!("35{}", serial)),
                imsi: Some(format!("00101{}", serial)),
                ..Default::default()
            },
            state,
        );
        self.store.seed_factory_record(record.clone());
        record
    }

    /// Associate `serial` to `user` through the orchestrator
    pub async fn associate(&self, user: &str, serial: &str) -> AssociationResult {
        self.lifecycle()
            .associate(AssociateDeviceRequest::new(user, DeviceIdentity::with_serial(serial)))
            .await
            .expect("associate should succeed")
    }
}
