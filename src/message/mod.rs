//! Wire message model.
//!
//! A [`Message`] is the envelope exchanged with the server: header fields
//! plus an opaque payload. Requests (`Q`) carry a fresh correlation id,
//! answers (`A`) echo the id of the request they answer, notifications
//! (`N`) need none.

pub mod codes;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::{IotError, Result};

/// Protocol version written by this client
pub const PROTOCOL_VERSION: &str = "003";

/// Default function type
pub const DEFAULT_FUNC_TYPE: &str = "0";

/// Default data format
pub const DEFAULT_DATA_FORMAT: &str = "application/json";

/// Encoding tag for unencrypted, uncompressed payloads
pub const PLAIN_ENC_TYPE: &str = "0";

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Expects an answer (`Q`)
    Request,
    /// Fire-and-forget (`N`)
    Notify,
    /// Answer to a request (`A`)
    Answer,
}

impl MessageType {
    /// Single-character wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "Q",
            Self::Notify => "N",
            Self::Answer => "A",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Q" => Some(Self::Request),
            "N" => Some(Self::Notify),
            "A" => Some(Self::Answer),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol message envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Protocol version
    pub version: Option<String>,
    /// Message type
    pub msg_type: MessageType,
    /// Function type tag
    pub func_type: Option<String>,
    /// Site id
    pub site_id: Option<String>,
    /// Thing (device) name
    pub thing_name: Option<String>,
    /// Leaf (sub-device) name
    pub leaf_thing_name: Option<String>,
    /// Business message code
    pub msg_code: Option<String>,
    /// Correlation id
    pub msg_id: Option<String>,
    /// Creation time, Unix millis
    pub msg_date: Option<i64>,
    /// Response code (answers)
    pub res_code: Option<String>,
    /// Response text (answers)
    pub res_msg: Option<String>,
    /// Payload format
    pub data_format: Option<String>,
    /// Severity
    pub severity: Option<String>,
    /// Encoding tag: `[compression tag]<encryption tag>`
    pub enc_type: String,
    /// Session token
    pub auth_token: Option<String>,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new(MessageType::Notify, codes::ATTR_GROUP)
    }
}

impl Message {
    /// Create a message with protocol defaults, stamped with the current time.
    pub fn new(msg_type: MessageType, msg_code: impl Into<String>) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION.to_string()),
            msg_type,
            func_type: Some(DEFAULT_FUNC_TYPE.to_string()),
            site_id: None,
            thing_name: None,
            leaf_thing_name: None,
            msg_code: Some(msg_code.into()),
            msg_id: None,
            msg_date: Some(chrono::Utc::now().timestamp_millis()),
            res_code: None,
            res_msg: None,
            data_format: Some(DEFAULT_DATA_FORMAT.to_string()),
            severity: None,
            enc_type: PLAIN_ENC_TYPE.to_string(),
            auth_token: None,
            payload: Vec::new(),
        }
    }

    /// Create a request
    pub fn request(msg_code: impl Into<String>) -> Self {
        Self::new(MessageType::Request, msg_code)
    }

    /// Create a notification
    pub fn notify(msg_code: impl Into<String>) -> Self {
        Self::new(MessageType::Notify, msg_code)
    }

    /// Create a keep-alive request
    pub fn keep_alive() -> Self {
        Self::request(codes::KEEP_ALIVE)
    }

    /// Set the payload
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Serialize `value` as the JSON payload
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.payload = serde_json::to_vec(value)?;
        Ok(self)
    }

    /// Set the leaf thing name
    #[must_use]
    pub fn with_leaf(mut self, leaf_thing_name: impl Into<String>) -> Self {
        self.leaf_thing_name = Some(leaf_thing_name.into());
        self
    }

    /// Message code, empty when absent.
    pub fn code(&self) -> &str {
        self.msg_code.as_deref().unwrap_or_default()
    }

    /// Correlation id, empty when absent.
    pub fn id(&self) -> &str {
        self.msg_id.as_deref().unwrap_or_default()
    }

    /// Whether the response code signals success (`2xx`).
    pub fn is_success(&self) -> bool {
        self.res_code.as_deref().is_some_and(|c| c.starts_with('2'))
    }

    /// Whether the code is exempt from compression and encryption.
    pub fn is_exempt(&self) -> bool {
        self.msg_code.as_deref().is_some_and(codes::is_exempt)
    }

    /// Payload as UTF-8 text.
    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| IotError::InvalidMessage(format!("Payload is not UTF-8: {e}")))
    }

    /// Replace the payload with text.
    pub fn set_payload_str(&mut self, payload: &str) {
        self.payload = payload.as_bytes().to_vec();
    }

    /// Parse the JSON payload.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Fill site, thing, leaf and correlation id where absent.
    pub fn stamp_defaults(&mut self, config: &ClientConfig) {
        if self.site_id.is_none() {
            self.site_id = Some(config.site_id.clone());
        }
        if self.thing_name.is_none() {
            self.thing_name = Some(config.thing_name.clone());
        }
        if self.leaf_thing_name.is_none() {
            self.leaf_thing_name.clone_from(&self.thing_name);
        }
        if self.msg_id.is_none() {
            self.msg_id = Some(new_msg_id());
        }
    }

    /// Build the answer to this request.
    ///
    /// The answer echoes the correlation id, site and leaf thing; `MSGBA`
    /// codes are answered with the next code number.
    pub fn create_response(&self, res_code: impl Into<String>, res_msg: impl Into<String>) -> Self {
        let mut answer = Self::new(MessageType::Answer, codes::answer_code(self.code()));
        answer.func_type.clone_from(&self.func_type);
        answer.msg_id.clone_from(&self.msg_id);
        answer.site_id.clone_from(&self.site_id);
        answer.thing_name.clone_from(&self.thing_name);
        answer.leaf_thing_name.clone_from(&self.leaf_thing_name);
        answer.res_code = Some(res_code.into());
        answer.res_msg = Some(res_msg.into());
        answer
    }
}

/// Fresh correlation id.
pub fn new_msg_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
