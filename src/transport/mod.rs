//! Transport binding contract.
//!
//! The session drives a concrete pub/sub client through
//! [`TransportBinding`] and receives inbound traffic through
//! [`TransportListener`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Session (correlation)          │
//! └───────────┬─────────────────▲───────────┘
//!     connect │ send(bytes)     │ on_message_received(bytes)
//!             ▼                 │ on_connection_lost(reason)
//! ┌─────────────────────────────┴───────────┐
//! │     TransportBinding (MqttBinding, ..)  │
//! └─────────────────────────────────────────┘
//! ```

#[cfg(feature = "mqtt")]
mod mqtt;
mod retry;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBinding, DATA_BUS_TOPIC};
pub use retry::{retry_with_backoff, retry_with_backoff_while, RetryPolicy};

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::auth::CredentialStore;
use crate::config::ClientConfig;
use crate::error::Result;

/// Callbacks a binding must invoke.
pub trait TransportListener: Send + Sync {
    /// A frame arrived on the device topic.
    fn on_message_received(&self, bytes: &[u8]);

    /// The connection dropped without `disconnect` being called.
    fn on_connection_lost(&self, reason: &str);
}

/// Everything a binding needs to open a connection.
#[derive(Clone)]
pub struct BindingContext {
    /// Configuration with the final server address
    pub config: ClientConfig,
    /// Credential used as the broker password
    pub credentials: Arc<CredentialStore>,
    /// Receiver of inbound traffic
    pub listener: Arc<dyn TransportListener>,
}

impl std::fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingContext")
            .field("server_addr", &self.config.server_addr)
            .finish_non_exhaustive()
    }
}

/// Pub/sub client the session sends through.
///
/// `init` may be called again before every reconnect; bindings must replace
/// any previous state.
pub trait TransportBinding: Send + Sync {
    /// Configure the binding for the next `connect`.
    fn init(&self, ctx: BindingContext) -> Result<()>;

    /// Open the connection and subscribe to the device topic.
    fn connect(&self) -> BoxFuture<'_, Result<()>>;

    /// Close the connection. Must not report connection loss.
    fn disconnect(&self) -> BoxFuture<'_, Result<()>>;

    /// Publish an encoded frame.
    fn send(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<()>>;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Client id and username for the broker: `{siteId}+{thingName}`.
pub fn client_id(config: &ClientConfig) -> String {
    format!("{}+{}", config.site_id, config.thing_name)
}

/// Topic the device subscribes to.
pub fn device_topic(config: &ClientConfig) -> String {
    format!("ocp/{}/{}", config.site_id, config.thing_name)
}
