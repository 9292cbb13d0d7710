//! Correlation engine.
//!
//! A [`Session`] owns the pending-call table and the session flags, wraps
//! the transport binding, runs the device-authorization handshake and keeps
//! the background loops alive for the duration of a connect.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;

use super::background::{keep_alive_loop, sweeper_loop};
use super::callback::{ResponseCallback, SyncCallback};
use super::pending::{PendingCall, PendingCalls};
use super::{handshake, MessageListener, SessionBuilder, SessionState};
use super::{LATE_ANSWER_THRESHOLD, RECONNECT_PAUSE};
use crate::auth::AuthStrategy;
use crate::codec::MessagePipeline;
use crate::config::ClientConfig;
use crate::error::{IotError, Result};
use crate::message::{Message, MessageType};
use crate::transport::{
    retry_with_backoff, retry_with_backoff_while, BindingContext, TransportBinding,
    TransportListener,
};

pub(crate) struct Inner {
    config: RwLock<ClientConfig>,
    auth: Arc<dyn AuthStrategy>,
    binding: Arc<dyn TransportBinding>,
    pipeline: MessagePipeline,
    pending: PendingCalls,
    listener: Option<Arc<dyn MessageListener>>,
    callback_timeout: Duration,

    authorized: AtomicBool,
    auto_retry: AtomicBool,
    reconnecting: AtomicBool,
    epoch: Instant,
    last_received_ms: AtomicU64,

    state: watch::Sender<SessionState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    runtime: Mutex<Option<Handle>>,
    connect_lock: tokio::sync::Mutex<()>,
}

pub(crate) struct SessionParts {
    pub(crate) config: ClientConfig,
    pub(crate) auth: Arc<dyn AuthStrategy>,
    pub(crate) binding: Arc<dyn TransportBinding>,
    pub(crate) pipeline: MessagePipeline,
    pub(crate) listener: Option<Arc<dyn MessageListener>>,
    pub(crate) callback_timeout: Duration,
}

/// Handle to a device session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

/// Non-owning session handle held by background tasks and the transport.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<Inner>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(|inner| Session { inner })
    }
}

struct SessionTransportListener {
    session: WeakSession,
}

impl TransportListener for SessionTransportListener {
    fn on_message_received(&self, bytes: &[u8]) {
        if let Some(session) = self.session.upgrade() {
            session.handle_incoming(bytes);
        }
    }

    fn on_connection_lost(&self, reason: &str) {
        if let Some(session) = self.session.upgrade() {
            session.handle_connection_lost(reason);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("auth", &self.inner.auth.type_name())
            .field("transport", &self.inner.binding.name())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl Session {
    /// Start building a session for `config`.
    pub fn builder(config: ClientConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub(crate) fn from_parts(parts: SessionParts) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(parts.config),
                auth: parts.auth,
                binding: parts.binding,
                pipeline: parts.pipeline,
                pending: PendingCalls::new(),
                listener: parts.listener,
                callback_timeout: parts.callback_timeout,
                authorized: AtomicBool::new(false),
                auto_retry: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                epoch: Instant::now(),
                last_received_ms: AtomicU64::new(0),
                state,
                shutdown: Mutex::new(None),
                runtime: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.inner))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ClientConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn auth(&self) -> &Arc<dyn AuthStrategy> {
        &self.inner.auth
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether the handshake completed and the connection is up.
    pub fn is_authorized(&self) -> bool {
        self.inner.authorized.load(Ordering::SeqCst)
    }

    /// Whether the transport reports an open connection.
    pub fn is_connected(&self) -> bool {
        self.inner.binding.is_connected()
    }

    /// Session token from the last handshake.
    pub fn session_token(&self) -> Option<String> {
        self.inner.auth.session_token()
    }

    /// Number of requests awaiting an answer.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "session state");
        }
    }

    fn touch(&self) {
        let ms = u64::try_from(self.inner.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.inner.last_received_ms.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn since_last_received(&self) -> Duration {
        let last = Duration::from_millis(self.inner.last_received_ms.load(Ordering::SeqCst));
        self.inner.epoch.elapsed().saturating_sub(last)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Acquire a credential, open the transport and authorize the device.
    ///
    /// Client errors fail immediately; transient errors are retried per the
    /// configured policy. A failed handshake closes the transport.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_authorized() {
            return Ok(());
        }
        *self
            .inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Handle::current());

        let result = self.connect_inner().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "FAIL TO CONNECT");
            self.inner.auto_retry.store(false, Ordering::SeqCst);
            self.set_state(SessionState::Disconnected);
        }
        result
    }

    async fn connect_inner(&self) -> Result<()> {
        let config = self.config();
        config.validate()?;
        let auth = Arc::clone(&self.inner.auth);
        auth.bind(&config)?;

        self.set_state(SessionState::AcquiringCredential);
        tracing::info!(auth = auth.type_name(), "requesting credential");
        let policy = config.retry_policy();
        let (auth_ref, config_ref) = (&auth, &config);
        let grant = retry_with_backoff(&policy, "credential acquisition", move |_| {
            auth_ref.request_credential(config_ref)
        })
        .await?;

        if let Some(addr) = grant.server_addr {
            let mut current = self
                .inner
                .config
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if current.server_addr.as_deref() != Some(addr.as_str()) {
                tracing::info!(server = %addr, "server address assigned");
                current.server_addr = Some(addr);
            }
        }
        self.inner.auto_retry.store(true, Ordering::SeqCst);

        self.open_transport().await?;
        self.start_background();
        Ok(())
    }

    /// Bind, connect (with retry) and run the handshake.
    async fn open_transport(&self) -> Result<()> {
        self.set_state(SessionState::TransportConnecting);
        let config = self.config();
        let binding = Arc::clone(&self.inner.binding);

        binding.init(BindingContext {
            config: config.clone(),
            credentials: self.inner.auth.credentials(),
            listener: Arc::new(SessionTransportListener {
                session: self.downgrade(),
            }),
        })?;

        tracing::info!(transport = binding.name(), server = ?config.server_addr, "TRY TO CONNECT");
        let policy = config.retry_policy();
        let inner = &self.inner;
        let binding_ref = &binding;
        retry_with_backoff_while(
            &policy,
            "transport connect",
            || inner.auto_retry.load(Ordering::SeqCst),
            move |_| binding_ref.connect(),
        )
        .await?;
        tracing::info!(transport = binding.name(), "CONNECTED");

        self.set_state(SessionState::Handshaking);
        if let Err(e) = handshake::run(self).await {
            tracing::error!(error = %e, "device authorization failed");
            if let Err(close_err) = binding.disconnect().await {
                tracing::warn!(error = %close_err, "disconnect after failed handshake");
            }
            return Err(e);
        }
        if !self.inner.auto_retry.load(Ordering::SeqCst) {
            tracing::info!("disconnected during device authorization");
            if let Err(close_err) = binding.disconnect().await {
                tracing::warn!(error = %close_err, "disconnect after abandoned handshake");
            }
            return Err(IotError::NotConnected);
        }

        self.touch();
        self.inner.authorized.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Authorized);
        tracing::info!(
            token = self.session_token().is_some(),
            "DEVICE IS AUTHORIZED"
        );
        Ok(())
    }

    fn start_background(&self) {
        let mut shutdown = self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if shutdown.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);

        if let Some(interval) = self.config().keep_alive() {
            tokio::spawn(keep_alive_loop(self.downgrade(), interval, rx.clone()));
        } else {
            tracing::info!("keep-alive disabled");
        }
        tokio::spawn(sweeper_loop(self.downgrade(), rx));

        *shutdown = Some(tx);
    }

    fn stop_background(&self) {
        let sender = self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(true);
        }
    }

    /// Close the session. No reconnect happens afterwards, and every
    /// pending call receives its timeout action.
    pub async fn disconnect(&self) -> Result<()> {
        tracing::info!("DISCONNECT");
        self.inner.auto_retry.store(false, Ordering::SeqCst);
        self.inner.authorized.store(false, Ordering::SeqCst);
        self.stop_background();
        let result = self.inner.binding.disconnect().await;
        self.drain_pending();
        self.set_state(SessionState::Disconnected);
        result
    }

    fn handle_connection_lost(&self, reason: &str) {
        tracing::warn!(reason, "CONNECTION LOST");
        self.inner.authorized.store(false, Ordering::SeqCst);

        if !self.inner.auto_retry.load(Ordering::SeqCst) {
            return;
        }
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::ConnectionLost);

        let handle = self
            .inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .or_else(|| Handle::try_current().ok());
        let Some(handle) = handle else {
            tracing::error!("no runtime available to reconnect");
            self.inner.reconnecting.store(false, Ordering::SeqCst);
            return;
        };

        let session = self.clone();
        handle.spawn(async move { session.reconnect().await });
    }

    async fn reconnect(&self) {
        tokio::time::sleep(RECONNECT_PAUSE).await;
        let result = {
            let _guard = self.inner.connect_lock.lock().await;
            if self.inner.auto_retry.load(Ordering::SeqCst) {
                Some(self.open_transport().await)
            } else {
                None
            }
        };
        self.inner.reconnecting.store(false, Ordering::SeqCst);

        match result {
            Some(Ok(())) => {
                tracing::info!("RECONNECTED");
                // a loss reported while the reconnect was in flight was ignored
                if !self.is_connected() {
                    self.handle_connection_lost("connection lost during reconnect");
                }
            },
            Some(Err(e)) if self.inner.auto_retry.load(Ordering::SeqCst) => {
                self.terminate(&e).await;
            },
            Some(Err(e)) => {
                tracing::info!(error = %e, "reconnect abandoned after disconnect");
            },
            None => tracing::debug!("reconnect skipped after disconnect"),
        }
    }

    async fn terminate(&self, err: &IotError) {
        tracing::error!(error = %err, "RECONNECT FAILED, SESSION TERMINATED");
        self.inner.auto_retry.store(false, Ordering::SeqCst);
        self.inner.authorized.store(false, Ordering::SeqCst);
        self.stop_background();
        if let Err(e) = self.inner.binding.disconnect().await {
            tracing::warn!(error = %e, "disconnect after terminal failure");
        }
        self.drain_pending();
        self.set_state(SessionState::Terminated);
    }

    // ------------------------------------------------------------------
    // Send / call / sync_call
    // ------------------------------------------------------------------

    fn stamp(&self, msg: &mut Message) {
        msg.stamp_defaults(
            &self
                .inner
                .config
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        );
        msg.auth_token = self.session_token();
    }

    async fn publish(&self, msg: Message) -> Result<()> {
        tracing::info!(
            msg_id = msg.id(),
            msg_type = %msg.msg_type,
            msg_code = msg.code(),
            res_code = msg.res_code.as_deref().unwrap_or_default(),
            len = msg.payload.len(),
            "SEND"
        );
        let bytes = self.inner.pipeline.encode(msg)?;
        tracing::trace!(frame_len = bytes.len(), "frame encoded");
        self.inner.binding.send(bytes).await
    }

    /// Send a notification or answer. Returns `false` when not connected or
    /// when publishing fails.
    pub async fn send(&self, mut msg: Message) -> bool {
        if msg.msg_type == MessageType::Request {
            tracing::error!(
                msg_code = msg.code(),
                "send() takes N or A messages; use call() or sync_call() for requests"
            );
            return false;
        }
        self.stamp(&mut msg);

        if !self.is_authorized() {
            tracing::warn!(msg_id = msg.id(), msg_code = msg.code(), "SEND FAIL: NOT CONNECTED");
            return false;
        }

        match self.publish(msg).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "FAIL TO SEND");
                false
            },
        }
    }

    /// Send a request and run `callback` on its answer or timeout.
    ///
    /// Returns `false` without registering the callback when not connected.
    pub async fn call<C: ResponseCallback>(&self, msg: Message, callback: C) -> bool {
        self.call_boxed(msg, Box::new(callback), true).await
    }

    async fn call_boxed(
        &self,
        mut msg: Message,
        callback: Box<dyn ResponseCallback>,
        require_authorized: bool,
    ) -> bool {
        msg.msg_type = MessageType::Request;
        self.stamp(&mut msg);

        let ready = if require_authorized {
            self.is_authorized()
        } else {
            self.is_connected()
        };
        if !ready {
            tracing::warn!(msg_id = msg.id(), msg_code = msg.code(), "CALL FAIL: NOT CONNECTED");
            return false;
        }

        let msg_id = msg.id().to_string();
        let timeout = callback.timeout().unwrap_or(self.inner.callback_timeout);
        let call = PendingCall::new(callback, msg.code().to_string(), timeout);
        if let Some(displaced) = self.inner.pending.insert(msg_id.clone(), call) {
            tracing::warn!(msg_id = %msg_id, "overwriting pending call with the same id");
            displaced.callback.on_timeout();
        }
        let waiting = self.inner.pending.len();
        if waiting >= 10 {
            tracing::debug!(waiting, "pending calls");
        }

        if let Err(e) = self.publish(msg).await {
            tracing::error!(msg_id = %msg_id, error = %e, "FAIL TO CALL");
            if let Some(call) = self.inner.pending.take(&msg_id) {
                call.callback.on_timeout();
            }
            return false;
        }
        true
    }

    /// Send a request and wait up to `timeout` for its answer.
    ///
    /// `None` means no answer in time (or not connected); the pending entry
    /// is gone when this returns.
    pub async fn sync_call(&self, msg: Message, timeout: Duration) -> Option<Message> {
        self.sync_call_inner(msg, timeout, true).await
    }

    /// `sync_call` with the configured default timeout.
    pub async fn sync_call_default(&self, msg: Message) -> Option<Message> {
        let timeout = self.config().sync_timeout();
        self.sync_call(msg, timeout).await
    }

    pub(crate) async fn sync_call_unauthorized(
        &self,
        msg: Message,
        timeout: Duration,
    ) -> Option<Message> {
        self.sync_call_inner(msg, timeout, false).await
    }

    async fn sync_call_inner(
        &self,
        mut msg: Message,
        timeout: Duration,
        require_authorized: bool,
    ) -> Option<Message> {
        self.stamp(&mut msg);
        let msg_id = msg.id().to_string();
        let (callback, rx) = SyncCallback::new(timeout);

        if !self
            .call_boxed(msg, Box::new(callback), require_authorized)
            .await
        {
            return None;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => Some(answer),
            Ok(Err(_)) => None,
            Err(_) => {
                self.inner.pending.take(&msg_id);
                tracing::warn!(msg_id = %msg_id, timeout_ms = timeout.as_millis(), "sync call timed out");
                None
            },
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn handle_incoming(&self, bytes: &[u8]) {
        self.touch();

        let msg = match self.inner.pipeline.decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, len = bytes.len(), "dropping undecodable message");
                return;
            },
        };
        tracing::info!(
            msg_id = msg.id(),
            msg_type = %msg.msg_type,
            msg_code = msg.code(),
            res_code = msg.res_code.as_deref().unwrap_or_default(),
            len = msg.payload.len(),
            "RECV"
        );

        match msg.msg_type {
            MessageType::Answer => match self.inner.pending.take(msg.id()) {
                Some(call) => {
                    let elapsed = call.elapsed();
                    if elapsed > LATE_ANSWER_THRESHOLD {
                        tracing::warn!(
                            msg_id = msg.id(),
                            elapsed_ms = elapsed.as_millis(),
                            "late answer"
                        );
                    }
                    call.callback.on_response(msg);
                },
                None => {
                    tracing::warn!(
                        msg_id = msg.id(),
                        "answer without pending call (already timed out?)"
                    );
                },
            },
            MessageType::Request | MessageType::Notify => match &self.inner.listener {
                Some(listener) if msg.msg_type == MessageType::Request => {
                    listener.on_request(self, msg);
                },
                Some(listener) => listener.on_notification(self, msg),
                None => {
                    tracing::warn!(msg_id = msg.id(), "no message listener, message dropped");
                },
            },
        }
    }

    pub(crate) fn sweep_expired(&self) {
        for (msg_id, call) in self.inner.pending.take_expired(Instant::now()) {
            tracing::warn!(
                msg_id = %msg_id,
                msg_code = %call.msg_code,
                timeout_ms = call.timeout.as_millis(),
                "response timed out"
            );
            call.callback.on_timeout();
        }
    }

    pub(crate) fn drain_pending(&self) {
        let drained = self.inner.pending.drain();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "cancelling pending calls");
        }
        for (_, call) in drained {
            call.callback.on_timeout();
        }
    }
}
