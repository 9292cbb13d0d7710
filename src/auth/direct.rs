//! Pre-provisioned auth code.

use std::sync::Arc;

use futures::future::BoxFuture;

use super::{AuthKind, AuthStrategy, CredentialGrant, CredentialStore};
use crate::config::ClientConfig;
use crate::error::{IotError, Result};

/// Uses an auth code provisioned on the device; no HTTP exchange.
#[derive(Debug)]
pub struct DirectAuth {
    auth_code: String,
    store: Arc<CredentialStore>,
}

impl DirectAuth {
    /// Create the strategy from an auth code
    pub fn new(auth_code: impl Into<String>) -> Self {
        let auth_code = auth_code.into();
        let store = Arc::new(CredentialStore::default());
        store.set_credential(Some(auth_code.clone()));
        Self { auth_code, store }
    }
}

impl AuthStrategy for DirectAuth {
    fn kind(&self) -> AuthKind {
        AuthKind::Direct
    }

    fn bind(&self, config: &ClientConfig) -> Result<()> {
        if self.auth_code.is_empty() {
            return Err(IotError::Config("auth code is empty".into()));
        }
        if config.server_addr.is_none() {
            return Err(IotError::Config(
                "server_addr is required for direct auth".into(),
            ));
        }
        Ok(())
    }

    fn request_credential<'a>(
        &'a self,
        _config: &'a ClientConfig,
    ) -> BoxFuture<'a, Result<CredentialGrant>> {
        Box::pin(async move {
            self.store.set_credential(Some(self.auth_code.clone()));
            Ok(CredentialGrant::default())
        })
    }

    fn credentials(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_credential() {
        let auth = DirectAuth::new("abc");
        let mut config = ClientConfig::new("s", "t");
        assert!(auth.bind(&config).is_err());

        config.server_addr = Some("tcp://localhost:1883".into());
        auth.bind(&config).unwrap();

        let grant = auth.request_credential(&config).await.unwrap();
        assert!(grant.server_addr.is_none());
        assert_eq!(auth.credential().unwrap().as_str(), "abc");
    }

    #[test]
    fn test_empty_code_rejected() {
        let mut config = ClientConfig::new("s", "t");
        config.server_addr = Some("tcp://localhost:1883".into());
        assert!(DirectAuth::new("").bind(&config).unwrap_err().is_client_error());
    }
}
