//! SIM provisioning: external client contract and the coordinator that
//! records, gates and polls SIM state transactions.

pub mod client;
pub mod coordinator;

pub use client::{SimProvisioningClient, SimRequestMeta};
pub use coordinator::SimCoordinator;
