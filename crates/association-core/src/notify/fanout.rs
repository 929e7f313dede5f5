//! Ordered, capability-filtered notification fan-out

use super::event::{AssociationEvent, NotificationCapability};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a single handler
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Logged and otherwise ignored
    #[error("soft failure: {0}")]
    Soft(String),

    /// Reported to the caller after the remaining handlers ran
    #[error("hard failure: {0}")]
    Hard(String),
}

/// One failed handler inside a [`NotificationError`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub message: String,
}

/// Aggregate of every hard handler failure of one fan-out
#[derive(Debug, Clone, Default, Error, PartialEq, Eq)]
#[error("{} notification handler(s) failed: {}", .failures.len(), summarize(.failures))]
pub struct NotificationError {
    pub failures: Vec<HandlerFailure>,
}

fn summarize(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.handler, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Receiver of association events
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    /// Event families this handler wants; all of them by default
    fn capabilities(&self) -> &[NotificationCapability] {
        &NotificationCapability::ALL
    }

    async fn handle(&self, event: &AssociationEvent) -> Result<(), HandlerError>;
}

/// Handlers invoked one after another in registration order.
///
/// Every interested handler runs even when an earlier one fails.
#[derive(Clone, Default)]
pub struct NotificationFanout {
    handlers: Vec<Arc<dyn NotificationHandler>>,
    timeout: Option<Duration>,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each handler call; an expired call counts as a hard failure
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn NotificationHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn NotificationHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn notify(&self, event: &AssociationEvent) -> Result<(), NotificationError> {
        let capability = event.kind.capability();
        let mut failures = Vec::new();

        for handler in self
            .handlers
            .iter()
            .filter(|h| h.capabilities().contains(&capability))
        {
            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, handler.handle(event)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HandlerError::Hard(format!(
                        "timed out after {} ms",
                        limit.as_millis()
                    ))),
                },
                None => handler.handle(event).await,
            };

            match outcome {
                Ok(()) => debug!(
                    "Handler {} delivered {} for association {}",
                    handler.name(),
                    event.kind,
                    event.association_id
                ),
                Err(HandlerError::Soft(message)) => warn!(
                    "Handler {} soft-failed {} for association {}: {}",
                    handler.name(),
                    event.kind,
                    event.association_id,
                    message
                ),
                Err(HandlerError::Hard(message)) => {
                    warn!(
                        "Handler {} failed {} for association {}: {}",
                        handler.name(),
                        event.kind,
                        event.association_id,
                        message
                    );
                    failures.push(HandlerFailure {
                        handler: handler.name().to_string(),
                        message,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotificationError { failures })
        }
    }
}
