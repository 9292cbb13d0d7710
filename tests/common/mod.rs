//! Shared fixtures: an in-memory transport binding and test strategies.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use biot::auth::{AuthKind, AuthStrategy, CredentialGrant, CredentialStore};
use biot::config::{ClientConfig, RetryConfig};
use biot::error::{IotError, Result};
use biot::message::{codes, Message};
use biot::transport::{BindingContext, TransportBinding, TransportListener};
use biot::MessagePipeline;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Session token the mock hands out on a successful handshake
pub const MOCK_TOKEN: &str = "token-1";

/// Config pointing at the mock broker with fast, jitter-free retries.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("site-1", "thing-1");
    config.server_addr = Some("tcp://mock:1883".into());
    config.keep_alive_interval = 0;
    config.default_sync_timeout = 2;
    config.retry = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        jitter_ms: 0,
    };
    config
}

/// In-memory broker.
///
/// Decodes every published frame with a plain pipeline, answers the
/// device-authorization requests itself and forwards everything else to
/// the outbox.
pub struct MockBinding {
    pipeline: MessagePipeline,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    connected: AtomicBool,
    connect_failures: AtomicU32,
    connect_attempts: Mutex<Vec<Instant>>,
    disconnects: AtomicU32,
    handshake_code: Mutex<String>,
    answer_handshake: AtomicBool,
    drop_after_handshake: AtomicBool,
    after_handshake: Mutex<Option<BoxFuture<'static, ()>>>,
    outbox_tx: mpsc::UnboundedSender<Message>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl Default for MockBinding {
    fn default() -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Self {
            pipeline: MessagePipeline::default(),
            listener: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_failures: AtomicU32::new(0),
            connect_attempts: Mutex::new(Vec::new()),
            disconnects: AtomicU32::new(0),
            handshake_code: Mutex::new("200".into()),
            answer_handshake: AtomicBool::new(true),
            drop_after_handshake: AtomicBool::new(false),
            after_handshake: Mutex::new(None),
            outbox_tx,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            frames: Mutex::new(Vec::new()),
        }
    }
}

impl MockBinding {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Broker decoding with the given pipeline (for encrypted sessions).
    pub fn with_pipeline(pipeline: MessagePipeline) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            ..Self::default()
        })
    }

    /// Every frame published so far, as raw bytes.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    /// Fail the next `n` connect attempts with a transient error.
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Answer handshake steps with this response code.
    pub fn set_handshake_code(&self, code: &str) {
        *self.handshake_code.lock().unwrap() = code.to_string();
    }

    /// Leave handshake steps unanswered.
    pub fn ignore_handshake(&self) {
        self.answer_handshake.store(false, Ordering::SeqCst);
    }

    /// Drop the connection right after answering the next final
    /// handshake step, before the device has processed the answer.
    pub fn drop_after_next_handshake(&self) {
        self.drop_after_handshake.store(true, Ordering::SeqCst);
    }

    /// Run `hook` right after answering the next final handshake step,
    /// before the device has processed the answer.
    pub fn after_next_handshake(&self, hook: BoxFuture<'static, ()>) {
        *self.after_handshake.lock().unwrap() = Some(hook);
    }

    /// Timestamps of every connect attempt.
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.connect_attempts.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Messages published by the device, handshake excluded.
    pub fn take_outbox(&self) -> mpsc::UnboundedReceiver<Message> {
        self.outbox_rx
            .lock()
            .unwrap()
            .take()
            .expect("outbox already taken")
    }

    /// Deliver a message to the device as if the server published it.
    pub fn inject(&self, msg: Message) {
        let bytes = self.pipeline.encode(msg).expect("encode injected message");
        self.inject_raw(&bytes);
    }

    /// Deliver raw bytes to the device.
    pub fn inject_raw(&self, bytes: &[u8]) {
        let listener = self.listener.lock().unwrap().clone();
        listener
            .expect("binding not initialized")
            .on_message_received(bytes);
    }

    /// Simulate the broker dropping the connection.
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_connection_lost(reason);
        }
    }

    fn answer_handshake_step(&self, request: &Message) {
        if !self.answer_handshake.load(Ordering::SeqCst) {
            return;
        }
        let code = self.handshake_code.lock().unwrap().clone();
        let mut answer = request.create_response(code.clone(), "handshake");
        if code.starts_with('2') {
            answer.payload = serde_json::json!({ "authToken": MOCK_TOKEN })
                .to_string()
                .into_bytes();
        }
        let bytes = self.pipeline.encode(answer).expect("encode handshake answer");

        let last_step = request.code() == codes::AUTH_STEP2;
        let drop_after = last_step && self.drop_after_handshake.swap(false, Ordering::SeqCst);
        if drop_after {
            self.connected.store(false, Ordering::SeqCst);
        }
        let hook = if last_step {
            self.after_handshake.lock().unwrap().take()
        } else {
            None
        };

        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            tokio::spawn(async move {
                listener.on_message_received(&bytes);
                if drop_after {
                    listener.on_connection_lost("dropped after handshake");
                }
                if let Some(hook) = hook {
                    hook.await;
                }
            });
        }
    }
}

impl TransportBinding for MockBinding {
    fn init(&self, ctx: BindingContext) -> Result<()> {
        *self.listener.lock().unwrap() = Some(ctx.listener);
        Ok(())
    }

    fn connect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.connect_attempts.lock().unwrap().push(Instant::now());
            let remaining = self.connect_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.connect_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(IotError::Transport("broker unavailable".into()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn send(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(IotError::NotConnected);
            }
            self.frames.lock().unwrap().push(bytes.clone());
            let msg = self.pipeline.decode(&bytes)?;
            if matches!(msg.code(), codes::AUTH_STEP1 | codes::AUTH_STEP2) {
                self.answer_handshake_step(&msg);
            } else {
                let _ = self.outbox_tx.send(msg);
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "MOCK"
    }
}

/// Strategy whose credential request always fails with a fixed error.
pub struct FailingAuth {
    status: u16,
    calls: AtomicU32,
    store: Arc<CredentialStore>,
}

impl FailingAuth {
    /// Fail every credential request with an HTTP `status`.
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            calls: AtomicU32::new(0),
            store: Arc::new(CredentialStore::default()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AuthStrategy for FailingAuth {
    fn kind(&self) -> AuthKind {
        AuthKind::Basic
    }

    fn request_credential<'a>(
        &'a self,
        _config: &'a ClientConfig,
    ) -> BoxFuture<'a, Result<CredentialGrant>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(IotError::Auth {
                status: self.status,
                message: "rejected".into(),
            })
        })
    }

    fn credentials(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.store)
    }
}
