//! User provisioning and lookup. Sign-up and credentials live elsewhere; this
//! only creates the entitlement record.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use songsmith_billing::{TokenCeilings, User};
use songsmith_core::{DomainError, UserId};

use crate::error::ServiceError;
use crate::repository::UserStore;

pub struct AccountService {
    users: Arc<dyn UserStore>,
    ceilings: TokenCeilings,
}

impl AccountService {
    pub fn new(users: Arc<dyn UserStore>, ceilings: TokenCeilings) -> Self {
        Self { users, ceilings }
    }

    /// Create a free-tier user.
    pub async fn register(&self, email: &str) -> Result<User, ServiceError> {
        let user = User::new_free(email, &self.ceilings, Utc::now())?;
        self.users.insert(user.clone()).await?;
        info!(user_id = %user.id, "user provisioned");
        Ok(user)
    }

    pub async fn get(&self, id: UserId) -> Result<User, ServiceError> {
        Ok(self.users.get(id).await?.ok_or_else(DomainError::not_found)?)
    }
}
