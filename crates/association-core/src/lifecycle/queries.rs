use super::LifecycleOrchestrator;
use crate::error::{AssociationError, Result};
use crate::types::{DeviceAssociation, DeviceAssociationHistory};

impl LifecycleOrchestrator {
    /// Association by id; with `user_id` only when that user holds it
    pub async fn find_association(&self, id: &str, user_id: Option<&str>) -> Result<DeviceAssociation> {
        self.ctx
            .store
            .find(id, user_id)
            .await?
            .ok_or_else(|| AssociationError::not_found(format!("association {}", id)))
    }

    /// Active associations of a user, owner and delegate alike
    pub async fn associated_devices(&self, user_id: &str) -> Result<Vec<DeviceAssociation>> {
        Ok(self.ctx.store.fetch_associated_devices(user_id).await?)
    }

    pub async fn m2m_associations(&self, user_id: &str) -> Result<Vec<DeviceAssociation>> {
        Ok(self.ctx.store.get_all_m2m_associations(user_id).await?)
    }

    pub async fn association_history(&self, association_id: &str) -> Result<Vec<DeviceAssociationHistory>> {
        Ok(self.ctx.store.history_for(association_id).await?)
    }
}
