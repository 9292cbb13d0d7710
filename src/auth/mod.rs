//! Device authentication strategies.
//!
//! An [`AuthStrategy`] produces the credential used to open the transport,
//! builds the device-authorization handshake messages and keeps the session
//! token returned by the server.
//!
//! | Strategy            | Credential source                     | Handshake body      |
//! |---------------------|---------------------------------------|---------------------|
//! | [`DirectAuth`]      | pre-provisioned auth code             | `{"authCode": ..}`  |
//! | [`BasicAuth`]       | HTTP exchange with a basic credential | `{"authCode": ..}`  |
//! | [`UserLoginAuth`]   | portal login, then HTTP exchange      | `{"authCode": ..}`  |
//! | [`MutualTlsAuth`]   | none (client certificate)             | empty               |
//!
//! # Handshake
//!
//! ```text
//! step 1 (legacy, MSGAUTH00000)  -> None for every built-in strategy
//! step 2 (MSGAUTH00002, Q, 002)  -> Request carrying the credential
//! answer 2xx                     -> authToken stored as session token
//! ```

mod basic;
mod direct;
mod http;
mod mutual_tls;
mod user_login;

use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::config::ClientConfig;
use crate::error::{IotError, Result};
use crate::message::{codes, Message};

pub use basic::BasicAuth;
pub use direct::DirectAuth;
pub use http::{ItaClient, ThingAuthCode};
pub use mutual_tls::MutualTlsAuth;
pub use user_login::UserLoginAuth;

/// Function type of handshake requests
pub const HANDSHAKE_FUNC_TYPE: &str = "002";

/// Strategy kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    /// Pre-provisioned auth code
    Direct,
    /// Portal user login
    UserLogin,
    /// Basic-auth credential exchange
    Basic,
    /// Client certificate
    MutualTls,
}

impl AuthKind {
    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "ITA_DIRECT",
            Self::UserLogin => "ITA_USER_LOGIN",
            Self::Basic => "ITA_BASIC",
            Self::MutualTls => "MUTUAL_TLS",
        }
    }

    /// Whether the strategy produces a shared secret usable as key material.
    pub fn carries_credential(&self) -> bool {
        !matches!(self, Self::MutualTls)
    }
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Credential and session token shared between the strategy, the
/// encryptor and the transport binding.
#[derive(Default)]
pub struct CredentialStore {
    credential: RwLock<Option<Zeroizing<String>>>,
    session_token: RwLock<Option<String>>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("has_credential", &self.credential().is_some())
            .field("has_session_token", &self.session_token().is_some())
            .finish()
    }
}

impl CredentialStore {
    /// Current credential
    pub fn credential(&self) -> Option<Zeroizing<String>> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the credential
    pub fn set_credential(&self, credential: Option<String>) {
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credential.map(Zeroizing::new);
    }

    /// Current session token
    pub fn session_token(&self) -> Option<String> {
        self.session_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the session token
    pub fn set_session_token(&self, token: Option<String>) {
        *self
            .session_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }
}

/// Outcome of credential acquisition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialGrant {
    /// Broker address assigned by the server, replacing the configured one
    pub server_addr: Option<String>,
}

#[derive(Deserialize)]
struct HandshakeAnswer {
    #[serde(rename = "authToken")]
    auth_token: Option<String>,
}

/// Pluggable credential/identity provider.
pub trait AuthStrategy: Send + Sync {
    /// Strategy kind.
    fn kind(&self) -> AuthKind;

    /// Name used in logs.
    fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Validate local configuration before any network activity.
    fn bind(&self, _config: &ClientConfig) -> Result<()> {
        Ok(())
    }

    /// Obtain the access credential, possibly over HTTP.
    fn request_credential<'a>(
        &'a self,
        config: &'a ClientConfig,
    ) -> BoxFuture<'a, Result<CredentialGrant>>;

    /// Shared credential store.
    fn credentials(&self) -> Arc<CredentialStore>;

    /// Current credential.
    fn credential(&self) -> Option<Zeroizing<String>> {
        self.credentials().credential()
    }

    /// Handshake request for `step` (1 or 2), `None` when the step is skipped.
    fn build_handshake_message(&self, step: u8) -> Option<Message> {
        if step != 2 {
            return None;
        }
        let credential = self.credential().map(|c| c.to_string()).unwrap_or_default();
        let payload = serde_json::json!({ "authCode": credential });
        Some(handshake_request(step).with_payload(payload.to_string().into_bytes()))
    }

    /// Consume the answer to a handshake step.
    fn on_handshake_response(&self, answer: &Message) -> Result<()> {
        if !answer.is_success() {
            return Err(IotError::Handshake {
                code: answer.res_code.clone().unwrap_or_default(),
                message: answer.res_msg.clone().unwrap_or_default(),
            });
        }
        if answer.payload.is_empty() {
            return Ok(());
        }
        let parsed: HandshakeAnswer = answer.payload_json()?;
        if let Some(token) = parsed.auth_token {
            self.credentials().set_session_token(Some(token));
        }
        Ok(())
    }

    /// Session token from the last successful handshake.
    fn session_token(&self) -> Option<String> {
        self.credentials().session_token()
    }
}

/// Empty handshake request for a step.
pub fn handshake_request(step: u8) -> Message {
    let code = if step == 1 {
        codes::AUTH_STEP1
    } else {
        codes::AUTH_STEP2
    };
    let mut msg = Message::request(code);
    msg.func_type = Some(HANDSHAKE_FUNC_TYPE.to_string());
    msg
}

/// Store the exchanged auth code and derive the broker address.
pub(crate) fn apply_auth_code(
    store: &CredentialStore,
    config: &ClientConfig,
    code: ThingAuthCode,
) -> Result<CredentialGrant> {
    code.validate_enc_type(config)?;
    let server_addr = code.server_addr(config);
    store.set_credential(Some(code.auth_code));
    Ok(CredentialGrant {
        server_addr: Some(server_addr),
    })
}

/// Lowercase hex SHA-256, as the login endpoint expects for passwords.
pub(crate) fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write;

    Sha256::digest(input.as_bytes())
        .iter()
        .fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn test_credential_store() {
        let store = CredentialStore::default();
        assert!(store.credential().is_none());

        store.set_credential(Some("code".into()));
        store.set_session_token(Some("token".into()));
        assert_eq!(store.credential().unwrap().as_str(), "code");
        assert_eq!(store.session_token().as_deref(), Some("token"));

        store.set_session_token(None);
        assert!(store.session_token().is_none());
    }

    #[test]
    fn test_handshake_messages() {
        let auth = DirectAuth::new("0123456789abcdef0123456789abcdef");
        assert!(auth.build_handshake_message(1).is_none());

        let step2 = auth.build_handshake_message(2).unwrap();
        assert_eq!(step2.msg_type, MessageType::Request);
        assert_eq!(step2.code(), codes::AUTH_STEP2);
        assert_eq!(step2.func_type.as_deref(), Some(HANDSHAKE_FUNC_TYPE));
        let body: serde_json::Value = step2.payload_json().unwrap();
        assert_eq!(body["authCode"], "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_handshake_response() {
        let auth = DirectAuth::new("code");
        let request = handshake_request(2);

        let ok = request
            .create_response("200", "OK")
            .with_payload(br#"{"authToken":"tok-1"}"#.to_vec());
        auth.on_handshake_response(&ok).unwrap();
        assert_eq!(auth.session_token().as_deref(), Some("tok-1"));

        let denied = request.create_response("401", "denied");
        assert!(matches!(
            auth.on_handshake_response(&denied),
            Err(IotError::Handshake { .. })
        ));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(AuthKind::Basic.to_string(), "ITA_BASIC");
        assert!(AuthKind::Direct.carries_credential());
        assert!(!AuthKind::MutualTls.carries_credential());
    }
}
