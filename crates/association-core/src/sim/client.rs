use crate::clients::ClientResult;
use crate::types::{SimTargetState, SimTransactionStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Context forwarded with a SIM state change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimRequestMeta {
    pub factory_record_id: String,
    pub association_id: Option<String>,
    pub iccid: Option<String>,
    pub msisdn: Option<String>,
}

/// SIM provisioning service
#[async_trait]
pub trait SimProvisioningClient: Send + Sync {
    /// Ask for a state change. `None` or an empty id means the service
    /// rejected the request outright.
    async fn change_sim_state(
        &self,
        imsi: &str,
        target: SimTargetState,
        meta: &SimRequestMeta,
    ) -> ClientResult<Option<String>>;

    async fn poll_transaction_status(&self, transaction_id: &str) -> ClientResult<SimTransactionStatus>;
}
