//! # Association Core
//!
//! Lifecycle of the binding between a physical connected device and the
//! user (or vehicle) that owns it: association, suspension, termination,
//! restoration, time-boxed delegation, bulk wipe and device replacement.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  LifecycleOrchestrator   │   │ ReplacementOrchestrator  │
//! └────────────┬─────────────┘   └────────────┬─────────────┘
//!              │                              │
//!   ┌──────────┼───────────┬──────────────────┼────────────┐
//!   ▼          ▼           ▼                  ▼            ▼
//! Store   SimCoordinator  NotificationFanout  Auth     Vehicle/Directory
//! ```
//!
//! The [`store::AssociationStore`] is the single authority for the
//! at-most-one-active-owner rule; the orchestrators check early for precise
//! errors and the store re-checks at commit time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use devassoc_association_core::prelude::*;
//!
//! # async fn example(collaborators: Collaborators) -> Result<()> {
//! let config = AssociationConfig::load(None).map_err(|e| AssociationError::technical(e.to_string()))?;
//! let lifecycle = LifecycleOrchestrator::new(collaborators, config);
//!
//! let result = lifecycle
//!     .associate(AssociateDeviceRequest::new("alice", DeviceIdentity::with_serial("S1234")))
//!     .await?;
//! println!("associated {}", result.association_id);
//! # Ok(())
//! # }
//! ```

pub mod clients;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod replace;
pub mod sim;
pub mod store;
pub mod types;

pub use config::AssociationConfig;
pub use context::Collaborators;
pub use error::{AssociationError, ErrorKind, ReplaceStep, Result};
pub use lifecycle::LifecycleOrchestrator;
pub use replace::ReplacementOrchestrator;

/// Common imports for embedders and tests
pub mod prelude {
    pub use crate::clients::{
        AuthRevocationClient, ClientError, ClientRegistration, ClientResult, DirectoryUser,
        UserDirectoryClient, VehicleAttributes, VehicleModel, VehicleProfile, VehicleProfileClient,
    };
    pub use crate::config::{AssociationConfig, SimConfig};
    pub use crate::context::Collaborators;
    pub use crate::error::{AssociationError, ErrorKind, ReplaceStep, Result};
    pub use crate::lifecycle::LifecycleOrchestrator;
    pub use crate::notify::{
        AssociationEvent, AssociationEventKind, HandlerError, NotificationCapability,
        NotificationError, NotificationFanout, NotificationHandler,
    };
    pub use crate::replace::ReplacementOrchestrator;
    pub use crate::sim::{SimCoordinator, SimProvisioningClient, SimRequestMeta};
    pub use crate::store::{AssociationStore, InMemoryAssociationStore, StoreError};
    pub use crate::types::*;
}
