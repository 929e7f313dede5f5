//! Vehicle profile service (HCP) and vehicle attribute sync (SWM)

use super::ClientResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Active vehicle a device is installed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleProfile {
    pub vin: String,
    pub plant: Option<String>,
    pub model_year: Option<String>,
}

/// Result of decoding a VIN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleModel {
    pub model_code: String,
    pub model_name: String,
}

/// Attributes pushed to the vehicle service when the device behind a VIN changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleAttributes {
    pub vin: String,
    pub device_serial_number: Option<String>,
    pub plant: Option<String>,
    pub model_year: Option<String>,
    pub model_code: Option<String>,
    pub model_name: Option<String>,
}

impl VehicleAttributes {
    pub fn from_profile(profile: &VehicleProfile, device_serial_number: Option<String>) -> Self {
        Self {
            vin: profile.vin.clone(),
            device_serial_number,
            plant: profile.plant.clone(),
            model_year: profile.model_year.clone(),
            model_code: None,
            model_name: None,
        }
    }

    pub fn with_model(mut self, model: VehicleModel) -> Self {
        self.model_code = Some(model.model_code);
        self.model_name = Some(model.model_name);
        self
    }
}

#[async_trait]
pub trait VehicleProfileClient: Send + Sync {
    async fn find_active_profile(&self, factory_record_id: &str) -> ClientResult<Option<VehicleProfile>>;

    async fn decode_vin(&self, vin: &str) -> ClientResult<VehicleModel>;

    /// `false` means the service refused the update
    async fn update_vehicle(&self, attributes: &VehicleAttributes) -> ClientResult<bool>;
}
