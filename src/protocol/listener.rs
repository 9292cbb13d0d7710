//! Application hook for server-initiated messages.

use super::Session;
use crate::message::Message;

/// Receives notifications and requests pushed by the server.
///
/// Methods run on the transport's receive path; long work should be moved
/// to a spawned task. Answer a request with
/// `session.send(msg.create_response(..))`.
pub trait MessageListener: Send + Sync {
    /// A notification (`N`) arrived.
    fn on_notification(&self, session: &Session, msg: Message);

    /// A request (`Q`) arrived.
    fn on_request(&self, session: &Session, msg: Message) {
        let _ = session;
        tracing::warn!(
            msg_id = msg.id(),
            msg_code = msg.code(),
            "request received but no request handler installed"
        );
    }
}
