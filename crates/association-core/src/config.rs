//! Configuration for association-core
//!
//! Built once at process start, validated, and shared read-only as
//! `Arc<AssociationConfig>`. Nothing mutates it at runtime.

use crate::types::IdentityField;
use devassoc_infra_common::{config::load_layered, Error as InfraError, LoggingConfig};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Environment prefix for overrides, e.g. `DEVASSOC_SWM_INTEGRATION_ENABLED=true`
pub const ENV_PREFIX: &str = "DEVASSOC";

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Type written on primary owner rows
    pub default_association_type: String,
    /// Older spellings that also denote the owner slot
    pub legacy_owner_types: Vec<String>,
    /// Which identity fragment wins when several are supplied
    pub identity_priority: Vec<IdentityField>,
    /// Reject associate() for devices that were terminated before
    pub forbid_association_after_terminate: bool,
    /// Allow replacing healthy devices by moving them back to PROVISIONED
    pub current_device_to_be_moved_to_provisioned: bool,
    /// Push vehicle attributes to SWM on replace
    pub swm_integration_enabled: bool,
    /// Re-register device credentials on replace
    pub platform_auth_integration_enabled: bool,
    /// Comma separated user ids treated as administrators
    pub internal_user_whitelist: String,
    /// Owner written into the primary slot by wipe
    pub wipe_placeholder_owner: String,
    /// Upper bound for any single external collaborator call
    pub external_call_timeout_ms: u64,
    pub sim: SimConfig,
    pub logging: LoggingConfig,
}

/// SIM transaction polling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub max_poll_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            default_association_type: "Owner".to_string(),
            legacy_owner_types: vec!["defaultOwner".to_string()],
            identity_priority: vec![
                IdentityField::Bssid,
                IdentityField::Imei,
                IdentityField::SerialNumber,
            ],
            forbid_association_after_terminate: false,
            current_device_to_be_moved_to_provisioned: false,
            swm_integration_enabled: false,
            platform_auth_integration_enabled: false,
            internal_user_whitelist: String::new(),
            wipe_placeholder_owner: "unassigned".to_string(),
            external_call_timeout_ms: 10_000,
            sim: SimConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_poll_attempts: 10,
            poll_interval_ms: 500,
        }
    }
}

impl AssociationConfig {
    /// Load from an optional file plus `DEVASSOC_*` environment overrides
    pub fn load(path: Option<&Path>) -> devassoc_infra_common::Result<Arc<Self>> {
        let config: AssociationConfig = load_layered(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(Arc::new(config))
    }

    pub fn validate(&self) -> devassoc_infra_common::Result<()> {
        if self.default_association_type.trim().is_empty() {
            return Err(InfraError::Config(
                "default_association_type must not be empty".to_string(),
            ));
        }
        if self.identity_priority.is_empty() {
            return Err(InfraError::Config(
                "identity_priority must list at least one field".to_string(),
            ));
        }
        let unique: HashSet<_> = self.identity_priority.iter().collect();
        if unique.len() != self.identity_priority.len() {
            return Err(InfraError::Config(
                "identity_priority contains duplicates".to_string(),
            ));
        }
        if self.wipe_placeholder_owner.trim().is_empty() {
            return Err(InfraError::Config(
                "wipe_placeholder_owner must not be empty".to_string(),
            ));
        }
        if self.external_call_timeout_ms == 0 {
            return Err(InfraError::Config(
                "external_call_timeout_ms must be positive".to_string(),
            ));
        }
        if self.sim.max_poll_attempts == 0 {
            return Err(InfraError::Config(
                "sim.max_poll_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `association_type` denotes the primary owner slot
    pub fn is_owner_type(&self, association_type: &str) -> bool {
        association_type.eq_ignore_ascii_case(&self.default_association_type)
            || self
                .legacy_owner_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(association_type))
    }

    pub fn internal_users(&self) -> Vec<&str> {
        self.internal_user_whitelist
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .collect()
    }

    pub fn is_internal_user(&self, user_id: &str) -> bool {
        self.internal_users().iter().any(|u| *u == user_id)
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sim.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AssociationConfig::default();
        config.validate().unwrap();
        assert!(config.is_owner_type("Owner"));
        assert!(config.is_owner_type("defaultOwner"));
        assert!(!config.is_owner_type("driver"));
    }

    #[test]
    fn whitelist_is_parsed_from_csv() {
        let config = AssociationConfig {
            internal_user_whitelist: " ops-1, ops-2 ,,".to_string(),
            ..Default::default()
        };
        assert_eq!(config.internal_users(), vec!["ops-1", "ops-2"]);
        assert!(config.is_internal_user("ops-2"));
        assert!(!config.is_internal_user("ops-3"));
    }

    #[test]
    fn duplicate_priority_is_rejected() {
        let config = AssociationConfig {
            identity_priority: vec![IdentityField::Imei, IdentityField::Imei],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_overrides_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
swm_integration_enabled = true
identity_priority = ["serial_number", "imei"]
internal_user_whitelist = "admin-a"

[sim]
max_poll_attempts = 3
"#
        )
        .unwrap();

        let config = AssociationConfig::load(Some(file.path())).unwrap();
        assert!(config.swm_integration_enabled);
        assert_eq!(
            config.identity_priority,
            vec![IdentityField::SerialNumber, IdentityField::Imei]
        );
        assert_eq!(config.sim.max_poll_attempts, 3);
        assert_eq!(config.sim.poll_interval_ms, 500);
        assert_eq!(config.default_association_type, "Owner");
    }
}
