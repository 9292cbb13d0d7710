//! Portal user login followed by the thing auth code exchange.

use std::sync::Arc;

use futures::future::BoxFuture;
use zeroize::Zeroizing;

use super::{
    apply_auth_code, sha256_hex, AuthKind, AuthStrategy, CredentialGrant, CredentialStore,
    ItaClient,
};
use crate::config::ClientConfig;
use crate::error::{IotError, Result};

/// Logs in with portal user credentials, then requests the thing auth code
/// with the user token.
pub struct UserLoginAuth {
    user_id: String,
    password_sha256: Zeroizing<String>,
    store: Arc<CredentialStore>,
}

impl std::fmt::Debug for UserLoginAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserLoginAuth")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl UserLoginAuth {
    /// Create the strategy; the password is hashed immediately.
    pub fn new(user_id: impl Into<String>, password: &str) -> Self {
        Self {
            user_id: user_id.into(),
            password_sha256: Zeroizing::new(sha256_hex(password)),
            store: Arc::new(CredentialStore::default()),
        }
    }
}

impl AuthStrategy for UserLoginAuth {
    fn kind(&self) -> AuthKind {
        AuthKind::UserLogin
    }

    fn bind(&self, _config: &ClientConfig) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(IotError::Config("user id is empty".into()));
        }
        Ok(())
    }

    fn request_credential<'a>(
        &'a self,
        config: &'a ClientConfig,
    ) -> BoxFuture<'a, Result<CredentialGrant>> {
        Box::pin(async move {
            let client = ItaClient::new(config)?;
            let token = client
                .user_login(&self.user_id, &self.password_sha256)
                .await?;
            let code = client
                .thing_auth_code(config, &format!("UL {token}"))
                .await?;
            apply_auth_code(&self.store, config, code)
        })
    }

    fn credentials(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.store)
    }
}
