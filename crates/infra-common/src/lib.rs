//! # Infra-Common
//!
//! Shared infrastructure for the device association workspace:
//!
//! - [`logging`]: `tracing` subscriber setup and component/operation spans
//! - [`config`]: layered configuration loading (defaults, TOML file, environment)
//! - [`errors`]: the infrastructure error type

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::types::{Error, Result};
pub use logging::context::LogContext;
pub use logging::setup::{setup_logging, try_setup_test_logging, LoggingConfig};
