//! HTTP credential exchange with the API server.

use std::time::Duration;

use reqwest::{Client, Proxy, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::config::{ClientConfig, EncType};
use crate::error::{IotError, Result};

const USER_LOGIN_PATH: &str = "/v1.1/main/action/itaUserLogin";
const CSRF_HEADER: &str = "X-CSRF-TOKEN";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Answer of the thing auth code endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingAuthCode {
    /// Device credential for the broker and key derivation
    pub auth_code: String,
    /// Broker host
    #[serde(deserialize_with = "string_or_scalar")]
    pub ip: String,
    /// Broker port
    #[serde(deserialize_with = "string_or_scalar")]
    pub port: String,
    /// `"true"` when the broker expects TLS
    #[serde(default, deserialize_with = "string_or_scalar")]
    pub is_ssl: String,
    /// Encryption selector configured on the server
    #[serde(default)]
    pub enc_type: Option<String>,
}

impl ThingAuthCode {
    /// Broker address for the configured protocol.
    pub fn server_addr(&self, config: &ClientConfig) -> String {
        let secure = self.is_ssl.eq_ignore_ascii_case("true");
        format!(
            "{}://{}:{}",
            config.protocol_type.scheme(secure),
            self.ip,
            self.port
        )
    }

    /// Reject a server/client encryption mismatch.
    pub fn validate_enc_type(&self, config: &ClientConfig) -> Result<()> {
        let server = self.enc_type.as_deref().unwrap_or(EncType::Plain.tag());
        if server == config.enc_type.tag() {
            return Ok(());
        }
        Err(IotError::Config(format!(
            "Check configuration 'enc_type' (server={server}, client={})",
            config.enc_type
        )))
    }
}

#[derive(Deserialize)]
struct LoginAnswer {
    #[serde(rename = "authToken")]
    auth_token: Option<String>,
}

fn string_or_scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Client for the credential exchange endpoints.
#[derive(Debug, Clone)]
pub struct ItaClient {
    client: Client,
    api_server_addr: String,
}

impl ItaClient {
    /// Build a client honouring the configured proxy.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(HTTP_TIMEOUT);
        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy.url())
                .map_err(|e| IotError::Config(format!("Invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| IotError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_server_addr: config.api_server_addr.trim_end_matches('/').to_string(),
        })
    }

    /// Portal login; returns the user token.
    pub async fn user_login(&self, user_id: &str, password_sha256: &str) -> Result<String> {
        let url = format!("{}{USER_LOGIN_PATH}", self.api_server_addr);
        tracing::debug!(%url, user_id, "requesting user login token");

        let response = self
            .client
            .post(&url)
            .header(CSRF_HEADER, "UL")
            .json(&serde_json::json!({
                "userId": user_id,
                "userPassword": password_sha256,
            }))
            .send()
            .await?;

        let answer: LoginAnswer = read_json(response).await?;
        answer.auth_token.ok_or_else(|| IotError::Auth {
            status: 401,
            message: "Login answer carries no authToken".into(),
        })
    }

    /// Request the thing auth code with a prepared `X-CSRF-TOKEN` value.
    pub async fn thing_auth_code(&self, config: &ClientConfig, csrf: &str) -> Result<ThingAuthCode> {
        let url = format!(
            "{}/v1.1/sites/{}/things/{}/module/{}/itaThingAuthCode?msgHeaderType={}",
            self.api_server_addr,
            config.site_id,
            config.thing_name,
            config.protocol_type.as_str().to_lowercase(),
            config.header_type,
        );
        tracing::debug!(%url, "requesting thing auth code");

        let response = self
            .client
            .get(&url)
            .header(CSRF_HEADER, csrf)
            .send()
            .await?;

        let answer: ThingAuthCode = read_json(response).await?;
        tracing::debug!(ip = %answer.ip, port = %answer.port, is_ssl = %answer.is_ssl, "thing auth code received");
        Ok(answer)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(IotError::Auth {
            status: status.as_u16(),
            message,
        });
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| IotError::InvalidMessage(format!("Unexpected credential answer: {e}")))
}
