//! VIN association with SIM activation and the SIM gate

mod common;

use common::{Harness, MockSim, OWNER};
use devassoc_association_core::prelude::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn vin_request(serial: &str) -> VinAssociateRequest {
    VinAssociateRequest {
        user_id: OWNER.to_string(),
        identity: DeviceIdentity::with_serial(serial),
        vin: "WVWZZZ1JZXW000001".to_string(),
        associated_by: None,
    }
}

fn harness_with_sim(sim: MockSim) -> Harness {
    let mut h = Harness::new();
    h.sim = Arc::new(sim);
    h.seed_device("f-1", "S1", LifecycleState::ReadyToActivate);
    h
}

#[tokio::test]
async fn test_vin_associate_starts_activation() {
    let h = harness_with_sim(MockSim::answering(Some("tx-42")));

    let result = h.lifecycle().vin_associate(vin_request("S1")).await.unwrap();

    assert_eq!(result.association_status, AssociationStatus::AssociationInitiated);
    assert_eq!(result.transaction_id.as_deref(), Some("tx-42"));
    assert_eq!(result.model_code.as_deref(), Some("X5"));
    assert_eq!(result.model_name.as_deref(), Some("Crossover"));

    let requests = h.sim.requests.lock().clone();
    assert_eq!(requests, vec![("00101S1".to_string(), SimTargetState::Active)]);
    let tx = h.store.find_sim_transaction("tx-42").await.unwrap().unwrap();
    assert_eq!(tx.status, SimTransactionStatus::Pending);
    assert_eq!(tx.association_id.as_deref(), Some(result.association_id.as_str()));
}

#[tokio::test]
async fn test_vin_associate_with_rejected_activation_leaves_nothing_visible() {
    for answer in [None, Some("")] {
        let h = harness_with_sim(MockSim::answering(answer));
        let lifecycle = h.lifecycle();

        let err = lifecycle.vin_associate(vin_request("S1")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert!(lifecycle.associated_devices(OWNER).await.unwrap().is_empty());
        assert!(h
            .store
            .active_associations_for_factory("f-1")
            .await
            .unwrap()
            .is_empty());
        let rows = h.store.all_associations();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].association_status, AssociationStatus::AssociationFailed);
    }
}

#[tokio::test]
async fn test_refresh_activation_completes_association() {
    let h = harness_with_sim(MockSim::answering(Some("tx-1")));
    let lifecycle = h.lifecycle();
    let started = lifecycle.vin_associate(vin_request("S1")).await.unwrap();

    h.sim.push_status(SimTransactionStatus::InProgress);
    let pending = lifecycle.refresh_activation("tx-1").await.unwrap();
    assert_eq!(pending.association_status, AssociationStatus::AssociationInitiated);

    h.sim.push_status(SimTransactionStatus::Completed);
    let done = lifecycle.refresh_activation("tx-1").await.unwrap();
    assert_eq!(done.association_id, started.association_id);
    assert_eq!(done.association_status, AssociationStatus::Associated);
    assert_eq!(lifecycle.associated_devices(OWNER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_refresh_activation_failure_marks_association_failed() {
    let h = harness_with_sim(MockSim::answering(Some("tx-1")));
    let lifecycle = h.lifecycle();
    lifecycle.vin_associate(vin_request("S1")).await.unwrap();

    h.sim.push_status(SimTransactionStatus::Failed);
    let failed = lifecycle.refresh_activation("tx-1").await.unwrap();

    assert_eq!(failed.association_status, AssociationStatus::AssociationFailed);
    assert!(h.handler.kinds().contains(&AssociationEventKind::ActivationFailed));
}

#[tokio::test]
async fn test_pending_activation_gates_new_association() {
    let h = harness_with_sim(MockSim::answering(Some("tx-1")));
    let lifecycle = h.lifecycle();
    let started = lifecycle.vin_associate(vin_request("S1")).await.unwrap();

    // Owner slot is taken by the INITIATED row
    let err = lifecycle
        .associate(AssociateDeviceRequest::new("bob", DeviceIdentity::with_serial("S1")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    h.sim.push_status(SimTransactionStatus::Failed);
    lifecycle.refresh_activation("tx-1").await.unwrap();
    let row = lifecycle.find_association(&started.association_id, None).await.unwrap();
    assert_eq!(row.association_status, AssociationStatus::AssociationFailed);

    // Slot and gate are both free again
    lifecycle
        .associate(AssociateDeviceRequest::new("bob", DeviceIdentity::with_serial("S1")))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_in_flight_transaction_blocks_terminate() {
    let h = Harness::new();
    h.seed_device("f-1", "S1", LifecycleState::Active);
    let associated = h.associate(OWNER, "S1").await;
    h.store.seed_sim_transaction(SimTransaction::pending(
        "f-1",
        "tx-act",
        SimTransactionKind::Activate,
        None,
    ));
    let lifecycle = h.lifecycle();

    let err = lifecycle
        .terminate(AssociationActionRequest::by_owner(&associated.association_id, OWNER))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    // Suspension is gated on a different set of kinds
    lifecycle
        .suspend(AssociationActionRequest::by_owner(&associated.association_id, OWNER))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_compensation_keeps_original_error() {
    let h = harness_with_sim(MockSim::answering(None));
    let (store, collaborators) = h.faulty_collaborators();
    *store.fail_status.lock() = Some(AssociationStatus::AssociationFailed);
    let lifecycle = LifecycleOrchestrator::new(collaborators, h.config.clone());

    let err = lifecycle.vin_associate(vin_request("S1")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    // The tentative row could not be moved and is left INITIATED
    let rows = h.store.all_associations();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].association_status, AssociationStatus::AssociationInitiated);
}
