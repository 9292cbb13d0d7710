//! MQTT binding over rumqttc.
//!
//! Client id and username are `{siteId}+{thingName}`, the password is the
//! current credential. Inbound traffic arrives on `ocp/{siteId}/{thingName}`,
//! outbound frames go to [`DATA_BUS_TOPIC`]. Both use QoS 1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    TlsConfiguration, Transport,
};
use tokio::task::JoinHandle;

use super::{client_id, device_topic, BindingContext, TransportBinding};
use crate::error::{IotError, Result};

/// Topic all device frames are published to
pub const DATA_BUS_TOPIC: &str = "ocp/dataBus";

const REQUEST_CHANNEL_CAPACITY: usize = 64;

struct Active {
    client: AsyncClient,
    event_task: JoinHandle<()>,
}

/// MQTT implementation of [`TransportBinding`].
#[derive(Default)]
pub struct MqttBinding {
    ctx: Mutex<Option<BindingContext>>,
    active: Mutex<Option<Active>>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

impl std::fmt::Debug for MqttBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBinding")
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Parsed broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BrokerAddr {
    host: String,
    port: u16,
    secure: bool,
}

fn parse_server_addr(addr: &str) -> Result<BrokerAddr> {
    let (scheme, rest) = addr
        .split_once("://")
        .ok_or_else(|| IotError::Config(format!("Server address lacks a scheme: {addr}")))?;

    let secure = match scheme.to_ascii_lowercase().as_str() {
        "tcp" | "mqtt" => false,
        "ssl" | "tls" | "mqtts" => true,
        other => {
            return Err(IotError::Config(format!(
                "Scheme {other} is not supported by the MQTT binding"
            )))
        },
    };

    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|e| IotError::Config(format!("Bad port in {addr}: {e}")))?;
            (host, port)
        },
        None => (rest, if secure { 8883 } else { 1883 }),
    };
    if host.is_empty() {
        return Err(IotError::Config(format!("Server address lacks a host: {addr}")));
    }

    Ok(BrokerAddr {
        host: host.to_string(),
        port,
        secure,
    })
}

fn read_file(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| IotError::Config(format!("Failed to read {}: {e}", path.display())))
}

fn build_options(ctx: &BindingContext) -> Result<MqttOptions> {
    let config = &ctx.config;
    let addr = config
        .server_addr
        .as_deref()
        .ok_or_else(|| IotError::Config("server_addr is not set".into()))?;
    let broker = parse_server_addr(addr)?;
    let id = client_id(config);

    let mut options = MqttOptions::new(id.clone(), broker.host, broker.port);
    options
        .set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs.max(1)))
        .set_clean_session(config.mqtt.clean_session)
        .set_inflight(config.mqtt.inflight.max(1));

    let password = ctx
        .credentials
        .credential()
        .map(|c| c.as_str().to_owned())
        .unwrap_or_default();
    options.set_credentials(id, password);

    if broker.secure {
        let tls = &config.tls;
        let transport = match &tls.ca_cert_path {
            Some(ca) => {
                let client_auth = match (&tls.client_cert_path, &tls.client_key_path) {
                    (Some(cert), Some(key)) => Some((read_file(cert)?, read_file(key)?)),
                    _ => None,
                };
                Transport::tls_with_config(TlsConfiguration::Simple {
                    ca: read_file(ca)?,
                    alpn: None,
                    client_auth,
                })
            },
            None if tls.has_client_identity() => {
                return Err(IotError::Config(
                    "tls.ca_cert_path is required with a client certificate".into(),
                ));
            },
            None => Transport::tls_with_default_config(),
        };
        options.set_transport(transport);
    }

    Ok(options)
}

fn map_connection_error(err: ConnectionError) -> IotError {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::BadClientId),
        ) => IotError::ConnectRefused(format!("{code:?}")),
        other => IotError::Transport(other.to_string()),
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(map_connection_error(ConnectionError::ConnectionRefused(
                        ack.code,
                    )))
                };
            },
            Ok(_) => {}
            Err(err) => return Err(map_connection_error(err)),
        }
    }
}

impl MqttBinding {
    /// Create an uninitialized binding
    pub fn new() -> Self {
        Self::default()
    }

    fn context(&self) -> Result<BindingContext> {
        self.ctx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| IotError::Transport("MQTT binding used before init".into()))
    }

    fn take_active(&self) -> Option<Active> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn client(&self) -> Option<AsyncClient> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.client.clone())
    }
}

impl TransportBinding for MqttBinding {
    fn init(&self, ctx: BindingContext) -> Result<()> {
        build_options(&ctx)?;
        *self.ctx.lock().unwrap_or_else(PoisonError::into_inner) = Some(ctx);
        Ok(())
    }

    fn connect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let ctx = self.context()?;
            if let Some(old) = self.take_active() {
                old.event_task.abort();
            }

            let options = build_options(&ctx)?;
            let topic = device_topic(&ctx.config);
            let timeout = Duration::from_secs(ctx.config.mqtt.connection_timeout_secs.max(1));
            let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

            tracing::debug!(server = ?ctx.config.server_addr, %topic, "opening MQTT connection");
            tokio::time::timeout(timeout, wait_for_connack(&mut event_loop))
                .await
                .map_err(|_| IotError::Transport("Timed out waiting for CONNACK".into()))??;

            client
                .subscribe(topic.clone(), QoS::AtLeastOnce)
                .await
                .map_err(|e| IotError::Transport(format!("Subscribe failed: {e}")))?;

            self.closing.store(false, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);

            let listener = Arc::clone(&ctx.listener);
            let connected = Arc::clone(&self.connected);
            let closing = Arc::clone(&self.closing);
            let event_task = tokio::spawn(async move {
                loop {
                    match event_loop.poll().await {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            listener.on_message_received(&publish.payload);
                        },
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            connected.store(false, Ordering::SeqCst);
                            if !closing.load(Ordering::SeqCst) {
                                listener.on_connection_lost("broker sent DISCONNECT");
                            }
                            break;
                        },
                        Ok(_) => {}
                        Err(err) => {
                            connected.store(false, Ordering::SeqCst);
                            if !closing.load(Ordering::SeqCst) {
                                listener.on_connection_lost(&err.to_string());
                            }
                            break;
                        },
                    }
                }
                tracing::debug!("MQTT event loop stopped");
            });

            *self.active.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(Active { client, event_task });
            tracing::info!(%topic, "subscribed");
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.closing.store(true, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            if let Some(active) = self.take_active() {
                if let Err(e) = active.client.disconnect().await {
                    tracing::debug!(error = %e, "MQTT disconnect request failed");
                }
                active.event_task.abort();
            }
            Ok(())
        })
    }

    fn send(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let client = self.client().ok_or(IotError::NotConnected)?;
            client
                .publish(DATA_BUS_TOPIC, QoS::AtLeastOnce, false, bytes)
                .await
                .map_err(|e| IotError::Transport(format!("Publish failed: {e}")))
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "MQTT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_addr() {
        assert_eq!(
            parse_server_addr("ssl://broker.local:8883").unwrap(),
            BrokerAddr {
                host: "broker.local".into(),
                port: 8883,
                secure: true
            }
        );
        assert_eq!(parse_server_addr("tcp://10.0.0.2").unwrap().port, 1883);
        assert!(parse_server_addr("broker:1883").is_err());
        assert!(parse_server_addr("wss://broker:443").is_err());
        assert!(parse_server_addr("tcp://:1883").is_err());
    }

    #[test]
    fn test_refused_codes_are_client_errors() {
        let err = map_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword,
        ));
        assert!(err.is_client_error());

        let err = map_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable,
        ));
        assert!(err.is_transient());
    }
}
