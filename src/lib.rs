//! # biot - Device-side IoT cloud protocol client
//!
//! Lets a device authenticate against the cloud, keep a durable session over
//! a pub/sub transport, exchange request/notify/answer messages and recover
//! from transport failures without losing correlation state.
//!
//! ## Features
//!
//! - **Correlation engine**: `send` / `call` / `sync_call` over an
//!   asynchronous transport, with timeout sweeping
//! - **Layered wire pipeline**: delimiter framing, zstd compression,
//!   AES-CBC payload encryption
//! - **Pluggable authentication**: direct auth code, basic credential,
//!   portal user login, mutual TLS
//! - **Self-healing sessions**: retrying credential acquisition and
//!   reconnect with exponential backoff, keep-alive
//!
//! ## Architecture
//!
//! ```text
//!            send / call / sync_call
//!                     |
//!   +-----------------v------------------+      +---------------+
//!   |          protocol::Session         |<---->| AuthStrategy  |
//!   |  pending calls | keep-alive | sweep|      +---------------+
//!   +-----------------+------------------+
//!                     | MessagePipeline (encrypt -> compress -> frame)
//!   +-----------------v------------------+
//!   |        TransportBinding (MQTT)     |
//!   +------------------------------------+
//! ```
//!
//! ## Wire Format
//!
//! ```text
//! 003|Q|0|site|thing|thing|MSGBA0110001|<uuid>|<millis>|||application/json||Z3|<token>|<len>|<body>
//! ```
//!
//! The encoding tag (`Z3` above) is `[compression tag]<encryption tag>`:
//! `0` plain, `3` AES-128, `5` AES-256, `Z` prefix for zstd.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use biot::{auth::DirectAuth, message::{codes, Message}, ClientConfig, Session};
//!
//! let mut config = ClientConfig::new("site-1", "pump-7");
//! config.server_addr = Some("ssl://broker.example.com:8883".into());
//!
//! let session = Session::builder(config)
//!     .auth(DirectAuth::new(auth_code))
//!     .build()?;
//! session.connect().await?;
//!
//! let notify = Message::notify(codes::ATTR_GROUP)
//!     .with_json(&serde_json::json!({"temperature": 21.5}))?;
//! session.send(notify).await;
//!
//! let answer = session
//!     .sync_call(Message::request(codes::FIRMWARE_VERSION_REQUEST), Duration::from_secs(5))
//!     .await;
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Session engine, callbacks, state machine
//! - [`codec`]: Framer, compressor, encryptor and their pipeline
//! - [`auth`]: Authentication strategies and HTTP credential exchange
//! - [`transport`]: Binding contract, retry policy, MQTT binding
//! - [`message`]: Message envelope and well-known codes
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use auth::{AuthKind, AuthStrategy, BasicAuth, DirectAuth, MutualTlsAuth, UserLoginAuth};
pub use codec::MessagePipeline;
pub use config::{ClientConfig, EncType, ProtocolType};
pub use error::{IotError, Result};
pub use message::{Message, MessageType};
pub use protocol::{
    callback, MessageListener, ResponseCallback, Session, SessionBuilder, SessionState,
};
pub use transport::{RetryPolicy, TransportBinding, TransportListener};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
