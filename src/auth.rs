// src/auth.rs
//
// Identity comes in as a gateway-issued JWT (the "secure permissions" token).
// This module resolves it to a (user, tenant) pair and checks chat ownership.
use crate::errors::ChatError;
use crate::models::auth::Claims;
use crate::storage::ChatStore;
use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use std::sync::Arc;

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Resolves the permission token to `(user_id, tenant_id)`.
    fn get_user_details(&self, secure_permissions: &str) -> Result<(String, String), ChatError>;

    /// Fails with `Unauthorized` unless the chat belongs to the caller.
    async fn validate_chat_id(
        &self,
        secure_permissions: &str,
        chat_id: &str,
    ) -> Result<(), ChatError>;
}

pub struct JwtAuthGateway {
    secret: String,
    store: Arc<dyn ChatStore>,
}

impl JwtAuthGateway {
    pub fn new(secret: String, store: Arc<dyn ChatStore>) -> Self {
        Self { secret, store }
    }

    fn claims(&self, token: &str) -> Result<Claims, ChatError> {
        verify_token(&self.secret, token).map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            ChatError::Unauthorized
        })
    }
}

#[async_trait]
impl AuthGateway for JwtAuthGateway {
    fn get_user_details(&self, secure_permissions: &str) -> Result<(String, String), ChatError> {
        let claims = self.claims(secure_permissions)?;
        Ok((claims.sub, claims.tenant))
    }

    async fn validate_chat_id(
        &self,
        secure_permissions: &str,
        chat_id: &str,
    ) -> Result<(), ChatError> {
        let (user_id, tenant_id) = self.get_user_details(secure_permissions)?;
        match self.store.chat_owner(chat_id).await? {
            Some((owner, tenant)) if owner == user_id && tenant == tenant_id => Ok(()),
            _ => {
                tracing::warn!(chat_id = %chat_id, user_id = %user_id, "chat access denied");
                Err(ChatError::Unauthorized)
            }
        }
    }
}
