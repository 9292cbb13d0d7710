//! Basic-auth credential exchange.

use std::sync::Arc;

use futures::future::BoxFuture;

use super::{apply_auth_code, AuthKind, AuthStrategy, CredentialGrant, CredentialStore, ItaClient};
use crate::config::ClientConfig;
use crate::error::{IotError, Result};

/// Exchanges a pre-shared basic credential for the thing auth code.
pub struct BasicAuth {
    basic_credential: String,
    store: Arc<CredentialStore>,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth").finish_non_exhaustive()
    }
}

impl BasicAuth {
    /// Create the strategy from a basic credential
    pub fn new(basic_credential: impl Into<String>) -> Self {
        Self {
            basic_credential: basic_credential.into(),
            store: Arc::new(CredentialStore::default()),
        }
    }
}

impl AuthStrategy for BasicAuth {
    fn kind(&self) -> AuthKind {
        AuthKind::Basic
    }

    fn bind(&self, _config: &ClientConfig) -> Result<()> {
        if self.basic_credential.is_empty() {
            return Err(IotError::Config("basic credential is empty".into()));
        }
        Ok(())
    }

    fn request_credential<'a>(
        &'a self,
        config: &'a ClientConfig,
    ) -> BoxFuture<'a, Result<CredentialGrant>> {
        Box::pin(async move {
            let client = ItaClient::new(config)?;
            let code = client
                .thing_auth_code(config, &format!("Basic {}", self.basic_credential))
                .await?;
            apply_auth_code(&self.store, config, code)
        })
    }

    fn credentials(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.store)
    }
}
