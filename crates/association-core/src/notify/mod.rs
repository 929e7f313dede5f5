//! Notification fan-out for committed association transitions

pub mod event;
pub mod fanout;

pub use event::{AssociationEvent, AssociationEventKind, NotificationCapability};
pub use fanout::{HandlerError, HandlerFailure, NotificationError, NotificationFanout, NotificationHandler};
