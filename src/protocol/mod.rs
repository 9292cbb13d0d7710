//! Session engine: connection lifecycle and request/answer correlation.
//!
//! # State Machine
//!
//! ```text
//!  connect()
//! [Disconnected] ──> [AcquiringCredential] ──> [TransportConnecting] ──> [Handshaking] ──> [Authorized]
//!       ^                                            ^                                        │
//!       │ disconnect()                               │ reconnect task                         │ connection lost
//!       │                                            └──────────── [ConnectionLost] <─────────┘
//!       │                                                               │ reconnect fails permanently
//!       │                                                               v
//!       └───────────────────────────────────────────────────────── [Terminated]
//! ```
//!
//! # Primitives
//!
//! | Operation     | Message types | Waits for answer | Not connected      |
//! |---------------|---------------|------------------|--------------------|
//! | `send`        | N, A          | no               | `false`            |
//! | `call`        | Q             | callback         | `false`            |
//! | `sync_call`   | Q             | up to timeout    | `None`             |
//!
//! Every request registered by `call` ends in exactly one of
//! `on_response` or `on_timeout`.

mod background;
mod builder;
mod callback;
mod handshake;
mod listener;
mod pending;
mod session;

use std::time::Duration;

pub use builder::SessionBuilder;
pub use callback::{callback, FnCallback, NoActionCallback, ResponseCallback};
pub use listener::MessageListener;
pub use pending::{PendingCall, PendingCalls};
pub use session::Session;

/// Timeout of a `call` whose callback sets none
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Sweeper period
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// How long a keep-alive waits for its answer
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after an unanswered keep-alive
pub const KEEP_ALIVE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Pause between connection loss and the reconnect attempt
pub const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Answers slower than this are logged as late
pub const LATE_ANSWER_THRESHOLD: Duration = Duration::from_secs(2);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not connected; the only state reachable by user action
    Disconnected,
    /// Obtaining the credential
    AcquiringCredential,
    /// Opening the transport
    TransportConnecting,
    /// Running device authorization
    Handshaking,
    /// Ready for send/call/sync_call
    Authorized,
    /// Transport dropped; reconnect pending
    ConnectionLost,
    /// Reconnect failed permanently
    Terminated,
}

impl SessionState {
    /// Name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::AcquiringCredential => "ACQUIRING_CREDENTIAL",
            Self::TransportConnecting => "TRANSPORT_CONNECTING",
            Self::Handshaking => "HANDSHAKING",
            Self::Authorized => "AUTHORIZED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
