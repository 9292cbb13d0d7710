//! Client-certificate authentication.

use std::sync::Arc;

use futures::future::BoxFuture;

use super::{handshake_request, AuthKind, AuthStrategy, CredentialGrant, CredentialStore};
use crate::config::ClientConfig;
use crate::error::{IotError, Result};
use crate::message::Message;

/// Relies on the TLS channel for identity; carries no shared secret.
#[derive(Debug, Default)]
pub struct MutualTlsAuth {
    store: Arc<CredentialStore>,
}

impl MutualTlsAuth {
    /// Create the strategy
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthStrategy for MutualTlsAuth {
    fn kind(&self) -> AuthKind {
        AuthKind::MutualTls
    }

    fn bind(&self, config: &ClientConfig) -> Result<()> {
        if !config.is_server_addr_secure() {
            return Err(IotError::Config(format!(
                "Mutual TLS requires a secure server address, got {:?}",
                config.server_addr
            )));
        }
        if !config.tls.has_client_identity() {
            return Err(IotError::Config(
                "Mutual TLS requires tls.client_cert_path and tls.client_key_path".into(),
            ));
        }
        for path in [&config.tls.client_cert_path, &config.tls.client_key_path]
            .into_iter()
            .flatten()
        {
            if !path.exists() {
                return Err(IotError::Config(format!(
                    "TLS file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    fn request_credential<'a>(
        &'a self,
        _config: &'a ClientConfig,
    ) -> BoxFuture<'a, Result<CredentialGrant>> {
        Box::pin(async move {
            self.store.set_credential(None);
            Ok(CredentialGrant::default())
        })
    }

    fn credentials(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.store)
    }

    fn build_handshake_message(&self, step: u8) -> Option<Message> {
        (step == 2).then(|| handshake_request(step))
    }
}
