//! Session construction.

use std::sync::Arc;
use std::time::Duration;

use super::session::{Session, SessionParts};
use super::{MessageListener, DEFAULT_CALLBACK_TIMEOUT};
use crate::auth::AuthStrategy;
use crate::codec::{
    AesCbcEncryptor, Compressor, DelimiterFramer, Encryptor, Framer, MessagePipeline,
    PlainEncryptor, ZstdCompressor,
};
use crate::config::{ClientConfig, EncType};
use crate::error::{IotError, Result};
use crate::transport::TransportBinding;

/// Builder for [`Session`].
///
/// The wire transforms are selected here, once per session: the encryptor
/// from `enc_type`, the compressor from `compress_use_bytes`, unless
/// overridden.
pub struct SessionBuilder {
    config: ClientConfig,
    auth: Option<Arc<dyn AuthStrategy>>,
    binding: Option<Arc<dyn TransportBinding>>,
    listener: Option<Arc<dyn MessageListener>>,
    framer: Option<Arc<dyn Framer>>,
    compressor: Option<Arc<dyn Compressor>>,
    encryptor: Option<Box<dyn Encryptor>>,
    callback_timeout: Duration,
}

impl SessionBuilder {
    /// Start from a configuration
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            auth: None,
            binding: None,
            listener: None,
            framer: None,
            compressor: None,
            encryptor: None,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Authentication strategy (required)
    #[must_use]
    pub fn auth(mut self, auth: impl AuthStrategy + 'static) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    /// Shared authentication strategy
    #[must_use]
    pub fn auth_arc(mut self, auth: Arc<dyn AuthStrategy>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Transport binding (defaults to MQTT when the `mqtt` feature is on)
    #[must_use]
    pub fn transport(mut self, binding: Arc<dyn TransportBinding>) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Listener for server-initiated messages
    #[must_use]
    pub fn listener(mut self, listener: impl MessageListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Replace the framer
    #[must_use]
    pub fn framer(mut self, framer: impl Framer + 'static) -> Self {
        self.framer = Some(Arc::new(framer));
        self
    }

    /// Replace the compressor
    #[must_use]
    pub fn compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Some(Arc::new(compressor));
        self
    }

    /// Replace the encryptor; it is bound to the strategy's credential.
    #[must_use]
    pub fn encryptor(mut self, encryptor: impl Encryptor + 'static) -> Self {
        self.encryptor = Some(Box::new(encryptor));
        self
    }

    /// Default timeout for `call` callbacks without their own
    #[must_use]
    pub fn callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    #[cfg(feature = "mqtt")]
    fn default_binding() -> Result<Arc<dyn TransportBinding>> {
        Ok(Arc::new(crate::transport::MqttBinding::new()))
    }

    #[cfg(not(feature = "mqtt"))]
    fn default_binding() -> Result<Arc<dyn TransportBinding>> {
        Err(IotError::Config(
            "No transport binding given and the mqtt feature is disabled".into(),
        ))
    }

    /// Validate the combination and build the session.
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;
        let auth = self
            .auth
            .ok_or_else(|| IotError::Config("An auth strategy is required".into()))?;

        if self.config.enc_type != EncType::Plain && !auth.kind().carries_credential() {
            return Err(IotError::Config(format!(
                "enc_type {} needs a credential-bearing auth strategy, not {}",
                self.config.enc_type,
                auth.type_name()
            )));
        }

        let binding = match self.binding {
            Some(binding) => binding,
            None => Self::default_binding()?,
        };

        let mut encryptor = match self.encryptor {
            Some(encryptor) => encryptor,
            None => match AesCbcEncryptor::for_enc_type(self.config.enc_type) {
                Some(aes) => Box::new(aes) as Box<dyn Encryptor>,
                None => Box::new(PlainEncryptor),
            },
        };
        encryptor.bind_credential(auth.credentials());

        let threshold = self.config.compress_use_bytes;
        let compressor = self
            .compressor
            .unwrap_or_else(|| Arc::new(ZstdCompressor::new(threshold)) as Arc<dyn Compressor>);
        let framer = self
            .framer
            .unwrap_or_else(|| Arc::new(DelimiterFramer::new()) as Arc<dyn Framer>);

        tracing::debug!(
            auth = auth.type_name(),
            transport = binding.name(),
            enc_type = %self.config.enc_type,
            compress_use_bytes = self.config.compress_use_bytes,
            "session built"
        );

        Ok(Session::from_parts(SessionParts {
            config: self.config,
            auth,
            binding,
            pipeline: MessagePipeline::new(framer, compressor, Arc::from(encryptor)),
            listener: self.listener,
            callback_timeout: self.callback_timeout,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{DirectAuth, MutualTlsAuth};
    use crate::protocol::SessionState;
    use crate::transport::BindingContext;
    use futures::future::BoxFuture;

    struct NullBinding;

    impl TransportBinding for NullBinding {
        fn init(&self, _ctx: BindingContext) -> Result<()> {
            Ok(())
        }
        fn connect(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn send(&self, _bytes: Vec<u8>) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn is_connected(&self) -> bool {
            false
        }
        fn name(&self) -> &'static str {
            "NULL"
        }
    }

    #[test]
    fn test_requires_auth() {
        let result = SessionBuilder::new(ClientConfig::new("s", "t"))
            .transport(Arc::new(NullBinding))
            .build();
        assert!(matches!(result, Err(IotError::Config(_))));
    }

    #[test]
    fn test_aes_rejected_with_mutual_tls() {
        let mut config = ClientConfig::new("s", "t");
        config.enc_type = EncType::Aes128;
        let result = SessionBuilder::new(config)
            .auth(MutualTlsAuth::new())
            .transport(Arc::new(NullBinding))
            .build();
        assert!(result.unwrap_err().is_client_error());
    }

    #[test]
    fn test_build_defaults() {
        let session = Session::builder(ClientConfig::new("s", "t"))
            .auth(DirectAuth::new("code"))
            .transport(Arc::new(NullBinding))
            .build()
            .unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_authorized());
        assert_eq!(session.pending_count(), 0);
    }
}
