//! Core data model: identities, inventory records, associations, SIM
//! transactions, history rows and request/outcome types.

pub mod association;
pub mod factory;
pub mod history;
pub mod identity;
pub mod requests;
pub mod sim;

pub use association::{AssociationResult, AssociationStatus, DeviceAssociation};
pub use factory::{FactoryRecord, LifecycleState, LifecycleTransition, TransitionPath};
pub use history::{DeviceAssociationHistory, HistoryAction};
pub use identity::{DeviceIdentity, IdentityField, IdentityQuery};
pub use requests::{
    AssociateDeviceRequest, AssociationActionRequest, DelegateRequest, ReplaceDeviceRequest,
    RevokeDelegationRequest, VinAssociateRequest, WipeItemFailure, WipeOutcome,
};
pub use sim::{
    GatedOperation, SimTargetState, SimTransaction, SimTransactionKind, SimTransactionStatus,
};
