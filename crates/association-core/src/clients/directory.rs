//! Internal user directory

use super::ClientResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub name: String,
    pub email: String,
}

impl DirectoryUser {
    /// Both name and email carry a value
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.email.trim().is_empty()
    }
}

#[async_trait]
pub trait UserDirectoryClient: Send + Sync {
    async fn lookup(&self, user_id: &str) -> ClientResult<Option<DirectoryUser>>;
}
