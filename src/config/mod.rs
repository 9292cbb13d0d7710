//! Client configuration.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`BIOT_*`)
//! - Programmatic construction (`ClientConfig::new`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IotError, Result};
use crate::transport::RetryPolicy;

/// Default API server used for credential exchange.
pub const DEFAULT_API_SERVER_ADDR: &str = "https://localhost:8088";

/// Default keep-alive interval (seconds).
pub const DEFAULT_KEEP_ALIVE_INTERVAL_SECS: i64 = 300;

/// Default timeout for synchronous calls and handshake steps (seconds).
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 5;

/// Wire protocol selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolType {
    /// MQTT over TCP/TLS
    #[default]
    Mqtt,
    /// WebSocket
    Webs,
}

impl ProtocolType {
    /// Name as used in URLs and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mqtt => "MQTT",
            Self::Webs => "WEBS",
        }
    }

    /// Scheme for a server address learned from the credential exchange.
    pub fn scheme(&self, secure: bool) -> &'static str {
        match (self, secure) {
            (Self::Mqtt, true) => "ssl",
            (Self::Mqtt, false) => "tcp",
            (Self::Webs, true) => "wss",
            (Self::Webs, false) => "ws",
        }
    }
}

impl std::fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProtocolType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MQTT" => Ok(Self::Mqtt),
            "WEBS" | "WS" | "WEBSOCKET" => Ok(Self::Webs),
            _ => Err(format!("Unknown protocol type: {s}")),
        }
    }
}

/// Encryption selector carried in the `encType` header field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncType {
    /// No encryption
    #[default]
    #[serde(rename = "0")]
    Plain,
    /// AES-128-CBC keyed from the credential
    #[serde(rename = "3")]
    Aes128,
    /// AES-256-CBC keyed from the credential
    #[serde(rename = "5")]
    Aes256,
}

impl EncType {
    /// Single-character wire tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Plain => "0",
            Self::Aes128 => "3",
            Self::Aes256 => "5",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "0" => Some(Self::Plain),
            "3" => Some(Self::Aes128),
            "5" => Some(Self::Aes256),
            _ => None,
        }
    }
}

impl std::fmt::Display for EncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Site (tenant) identifier
    pub site_id: String,

    /// Thing (device) name
    pub thing_name: String,

    /// Base URL of the credential exchange API
    pub api_server_addr: String,

    /// Broker address, e.g. `ssl://host:8883`. May be replaced by the
    /// address returned from the credential exchange.
    pub server_addr: Option<String>,

    /// Transport protocol
    pub protocol_type: ProtocolType,

    /// Message header type requested from the server
    pub header_type: String,

    /// Payload encryption
    pub enc_type: EncType,

    /// Compress payloads at least this many bytes long (0 disables)
    pub compress_use_bytes: usize,

    /// HTTP proxy for the credential exchange
    pub proxy: Option<ProxyConfig>,

    /// Keep-alive interval in seconds (<= 0 disables)
    pub keep_alive_interval: i64,

    /// Timeout for handshake steps and `sync_call` defaults, in seconds
    pub default_sync_timeout: u64,

    /// Backoff for credential acquisition and transport connect
    pub retry: RetryConfig,

    /// TLS material
    pub tls: TlsConfig,

    /// MQTT client tuning
    pub mqtt: MqttConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            site_id: String::new(),
            thing_name: String::new(),
            api_server_addr: DEFAULT_API_SERVER_ADDR.to_string(),
            server_addr: None,
            protocol_type: ProtocolType::default(),
            header_type: "D".to_string(),
            enc_type: EncType::default(),
            compress_use_bytes: 0,
            proxy: None,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL_SECS,
            default_sync_timeout: DEFAULT_SYNC_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            tls: TlsConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a config for a site/thing pair with defaults elsewhere.
    pub fn new(site_id: impl Into<String>, thing_name: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            thing_name: thing_name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IotError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| IotError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`~/.config/biot/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("biot").join("config.toml"))
    }

    /// Apply `BIOT_*` environment overrides.
    pub fn with_env(mut self) -> Self {
        if let Ok(val) = std::env::var("BIOT_SITE_ID") {
            self.site_id = val;
        }
        if let Ok(val) = std::env::var("BIOT_THING_NAME") {
            self.thing_name = val;
        }
        if let Ok(val) = std::env::var("BIOT_API_SERVER_ADDR") {
            self.api_server_addr = val;
        }
        if let Ok(val) = std::env::var("BIOT_SERVER_ADDR") {
            self.server_addr = Some(val);
        }
        if let Ok(val) = std::env::var("BIOT_PROTOCOL_TYPE") {
            if let Ok(val) = val.parse() {
                self.protocol_type = val;
            }
        }
        if let Ok(val) = std::env::var("BIOT_ENC_TYPE") {
            if let Some(val) = EncType::from_tag(&val) {
                self.enc_type = val;
            }
        }
        if let Ok(val) = std::env::var("BIOT_COMPRESS_USE_BYTES") {
            if let Ok(val) = val.parse() {
                self.compress_use_bytes = val;
            }
        }
        if let Ok(val) = std::env::var("BIOT_KEEP_ALIVE_INTERVAL") {
            if let Ok(val) = val.parse() {
                self.keep_alive_interval = val;
            }
        }

        self
    }

    /// Check required fields before any network activity.
    pub fn validate(&self) -> Result<()> {
        if self.site_id.is_empty() {
            return Err(IotError::Config("site_id is required".into()));
        }
        if self.thing_name.is_empty() {
            return Err(IotError::Config("thing_name is required".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(IotError::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Whether the broker address uses a TLS scheme.
    pub fn is_server_addr_secure(&self) -> bool {
        self.server_addr.as_deref().is_some_and(|addr| {
            let addr = addr.to_ascii_lowercase();
            ["ssl://", "mqtts://", "wss://", "tls://"]
                .iter()
                .any(|scheme| addr.starts_with(scheme))
        })
    }

    /// Keep-alive interval, `None` when disabled.
    pub fn keep_alive(&self) -> Option<Duration> {
        u64::try_from(self.keep_alive_interval)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Default synchronous call timeout.
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.default_sync_timeout)
    }

    /// Retry policy derived from [`RetryConfig`].
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }
}

/// HTTP proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host
    pub host: String,

    /// Proxy port
    pub port: u16,
}

impl ProxyConfig {
    /// Proxy URL for the HTTP client.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Backoff settings shared by credential acquisition and transport connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_attempts: u32,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,

    /// Random jitter range in milliseconds
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10_000,
            base_delay_ms: 3_000,
            max_delay_ms: 120_000,
            jitter_ms: 2_000,
        }
    }
}

/// TLS material paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// CA certificate (PEM); system roots when absent
    pub ca_cert_path: Option<PathBuf>,

    /// Client certificate chain (PEM)
    pub client_cert_path: Option<PathBuf>,

    /// Client private key (PEM)
    pub client_key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Both halves of a client identity are configured.
    pub fn has_client_identity(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }
}

/// MQTT client tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// MQTT-level keep-alive in seconds
    pub keep_alive_secs: u64,

    /// Connect timeout in seconds
    pub connection_timeout_secs: u64,

    /// Request a clean session
    pub clean_session: bool,

    /// Maximum in-flight QoS 1 messages
    pub inflight: u16,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 60,
            connection_timeout_secs: 30,
            clean_session: true,
            inflight: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_server_addr, DEFAULT_API_SERVER_ADDR);
        assert_eq!(config.protocol_type, ProtocolType::Mqtt);
        assert_eq!(config.header_type, "D");
        assert_eq!(config.enc_type, EncType::Plain);
        assert_eq!(config.keep_alive_interval, 300);
        assert_eq!(config.default_sync_timeout, 5);
        assert_eq!(config.retry.max_attempts, 10_000);
        assert_eq!(config.retry.base_delay_ms, 3_000);
        assert_eq!(config.retry.max_delay_ms, 120_000);
        assert_eq!(config.retry.jitter_ms, 2_000);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            site_id = "site-1"
            thing_name = "pump-7"
            server_addr = "ssl://broker.local:8883"
            protocol_type = "MQTT"
            enc_type = "3"
            compress_use_bytes = 128
            keep_alive_interval = 0

            [retry]
            max_attempts = 3
            base_delay_ms = 100

            [proxy]
            host = "10.0.0.1"
            port = 3128
        "#;

        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.site_id, "site-1");
        assert_eq!(config.enc_type, EncType::Aes128);
        assert_eq!(config.compress_use_bytes, 128);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 120_000);
        assert_eq!(config.proxy.as_ref().unwrap().url(), "http://10.0.0.1:3128");
        assert!(config.keep_alive().is_none());
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "site_id = \"s\"\nthing_name = \"t\"\n").unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.site_id, "s");
        assert!(config.validate().is_ok());

        let missing = ClientConfig::from_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(IotError::Config(_))));
    }

    #[test]
    fn test_validate_requires_identity() {
        assert!(ClientConfig::default().validate().is_err());
        assert!(ClientConfig::new("s", "").validate().is_err());
        assert!(ClientConfig::new("s", "t").validate().is_ok());
    }

    #[test]
    fn test_server_addr_secure() {
        let mut config = ClientConfig::new("s", "t");
        assert!(!config.is_server_addr_secure());

        for addr in ["ssl://h:8883", "MQTTS://h:8883", "wss://h/ws", "tls://h:1"] {
            config.server_addr = Some(addr.to_string());
            assert!(config.is_server_addr_secure(), "{addr}");
        }

        config.server_addr = Some("tcp://h:1883".to_string());
        assert!(!config.is_server_addr_secure());
    }

    #[test]
    fn test_protocol_scheme() {
        assert_eq!(ProtocolType::Mqtt.scheme(true), "ssl");
        assert_eq!(ProtocolType::Mqtt.scheme(false), "tcp");
        assert_eq!(ProtocolType::Webs.scheme(true), "wss");
        assert_eq!("webs".parse::<ProtocolType>().unwrap(), ProtocolType::Webs);
        assert!("coap".parse::<ProtocolType>().is_err());
    }
}
