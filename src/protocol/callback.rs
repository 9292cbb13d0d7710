//! Response callbacks for asynchronous calls.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::message::Message;

/// Action taken when a request is answered or times out.
///
/// Exactly one of the two methods is invoked per registered call. They run
/// on the receive path or the sweeper, after the call has left the pending
/// table, so they may call back into the session.
pub trait ResponseCallback: Send + Sync + 'static {
    /// The matching answer arrived.
    fn on_response(self: Box<Self>, answer: Message);

    /// No answer arrived in time, or the session shut down.
    fn on_timeout(self: Box<Self>);

    /// Per-call timeout; the session default applies when `None`.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Callback built from two closures.
pub struct FnCallback<A, T> {
    action: A,
    timeout_action: T,
    timeout: Option<Duration>,
}

impl<A, T> FnCallback<A, T> {
    /// Override the session default timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<A, T> ResponseCallback for FnCallback<A, T>
where
    A: FnOnce(Message) + Send + Sync + 'static,
    T: FnOnce() + Send + Sync + 'static,
{
    fn on_response(self: Box<Self>, answer: Message) {
        (self.action)(answer);
    }

    fn on_timeout(self: Box<Self>) {
        (self.timeout_action)();
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Build a callback from an action and a timeout action.
pub fn callback<A, T>(action: A, timeout_action: T) -> FnCallback<A, T>
where
    A: FnOnce(Message) + Send + Sync + 'static,
    T: FnOnce() + Send + Sync + 'static,
{
    FnCallback {
        action,
        timeout_action,
        timeout: None,
    }
}

/// Callback that ignores the outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActionCallback;

impl ResponseCallback for NoActionCallback {
    fn on_response(self: Box<Self>, answer: Message) {
        tracing::trace!(msg_id = answer.id(), "answer ignored");
    }

    fn on_timeout(self: Box<Self>) {}
}

/// Single-slot callback backing `sync_call`.
pub(crate) struct SyncCallback {
    tx: oneshot::Sender<Message>,
    timeout: Duration,
}

impl SyncCallback {
    pub(crate) fn new(timeout: Duration) -> (Self, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx, timeout }, rx)
    }
}

impl ResponseCallback for SyncCallback {
    fn on_response(self: Box<Self>, answer: Message) {
        if self.tx.send(answer).is_err() {
            tracing::debug!("sync caller stopped waiting before the answer arrived");
        }
    }

    fn on_timeout(self: Box<Self>) {}

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fn_callback() {
        let hit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&hit);
        let cb: Box<dyn ResponseCallback> = Box::new(
            callback(move |_| flag.store(true, Ordering::SeqCst), || {})
                .with_timeout(Duration::from_secs(3)),
        );

        assert_eq!(cb.timeout(), Some(Duration::from_secs(3)));
        cb.on_response(Message::default());
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_sync_callback() {
        let (cb, rx) = SyncCallback::new(Duration::from_secs(1));
        Box::new(cb).on_response(Message::keep_alive());
        assert_eq!(rx.await.unwrap().code(), crate::message::codes::KEEP_ALIVE);

        let (cb, rx) = SyncCallback::new(Duration::from_secs(1));
        Box::new(cb).on_timeout();
        assert!(rx.await.is_err());
    }
}
