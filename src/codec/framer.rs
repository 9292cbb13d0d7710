//! Header framing.
//!
//! # Wire Format
//!
//! ```text
//! version|msgType|funcType|siteId|thingName|leafThing|msgCode|msgId|msgDate|
//! resCode|resMsg|dataFormat|severity|encType|authToken|bodyLen|<body bytes>
//! ```
//!
//! Every header field, including the body length, is followed by the
//! delimiter. Absent fields are empty runs. The body is appended raw, so it
//! may contain the delimiter byte itself.

use crate::error::{IotError, Result};
use crate::message::{Message, MessageType, PLAIN_ENC_TYPE};

/// Default field delimiter
pub const DEFAULT_DELIMITER: u8 = b'|';

/// Number of header fields before the body
pub const HEADER_FIELDS: usize = 16;

const FIELD_NAMES: [&str; HEADER_FIELDS] = [
    "version",
    "msgType",
    "funcType",
    "siteId",
    "thingName",
    "leafThingName",
    "msgCode",
    "msgId",
    "msgDate",
    "resCode",
    "resMsg",
    "dataFormat",
    "severity",
    "encType",
    "authToken",
    "bodyLength",
];

/// Converts a [`Message`] to and from its wire layout.
pub trait Framer: Send + Sync {
    /// Serialize the envelope and payload.
    fn frame(&self, msg: &Message) -> Result<Vec<u8>>;

    /// Parse bytes produced by [`Framer::frame`].
    fn unframe(&self, bytes: &[u8]) -> Result<Message>;
}

/// Positional framer with a single-byte delimiter.
#[derive(Debug, Clone, Copy)]
pub struct DelimiterFramer {
    delimiter: u8,
}

impl Default for DelimiterFramer {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl DelimiterFramer {
    /// Create a framer with the default `|` delimiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a framer with a custom delimiter
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }

    fn push_field(&self, out: &mut Vec<u8>, index: usize, value: Option<&str>) -> Result<()> {
        if let Some(value) = value {
            if value.as_bytes().contains(&self.delimiter) {
                return Err(IotError::InvalidMessage(format!(
                    "Field {} contains the delimiter",
                    FIELD_NAMES[index]
                )));
            }
            out.extend_from_slice(value.as_bytes());
        }
        out.push(self.delimiter);
        Ok(())
    }
}

impl Framer for DelimiterFramer {
    fn frame(&self, msg: &Message) -> Result<Vec<u8>> {
        let msg_date = msg.msg_date.map(|d| d.to_string());
        let body_len = msg.payload.len().to_string();

        let fields: [Option<&str>; HEADER_FIELDS] = [
            msg.version.as_deref(),
            Some(msg.msg_type.as_str()),
            msg.func_type.as_deref(),
            msg.site_id.as_deref(),
            msg.thing_name.as_deref(),
            msg.leaf_thing_name.as_deref(),
            msg.msg_code.as_deref(),
            msg.msg_id.as_deref(),
            msg_date.as_deref(),
            msg.res_code.as_deref(),
            msg.res_msg.as_deref(),
            msg.data_format.as_deref(),
            msg.severity.as_deref(),
            Some(msg.enc_type.as_str()),
            msg.auth_token.as_deref(),
            Some(body_len.as_str()),
        ];

        let header_len: usize = fields.iter().flatten().map(|f| f.len() + 1).sum();
        let mut out = Vec::with_capacity(header_len + HEADER_FIELDS + msg.payload.len());
        for (index, value) in fields.into_iter().enumerate() {
            self.push_field(&mut out, index, value)?;
        }
        out.extend_from_slice(&msg.payload);

        Ok(out)
    }

    fn unframe(&self, bytes: &[u8]) -> Result<Message> {
        let mut fields: [Option<String>; HEADER_FIELDS] = Default::default();
        let mut pos = 0;

        for (index, slot) in fields.iter_mut().enumerate() {
            let end = bytes[pos..]
                .iter()
                .position(|b| *b == self.delimiter)
                .map(|offset| pos + offset)
                .ok_or_else(|| {
                    IotError::InvalidMessage(format!(
                        "Missing delimiter after field {}",
                        FIELD_NAMES[index]
                    ))
                })?;

            let raw = &bytes[pos..end];
            if !raw.is_empty() {
                let text = std::str::from_utf8(raw).map_err(|e| {
                    IotError::InvalidMessage(format!("Field {} is not UTF-8: {e}", FIELD_NAMES[index]))
                })?;
                *slot = Some(text.to_string());
            }
            pos = end + 1;
        }

        let [version, msg_type, func_type, site_id, thing_name, leaf_thing_name, msg_code, msg_id, msg_date, res_code, res_msg, data_format, severity, enc_type, auth_token, body_len] =
            fields;

        let msg_type = msg_type
            .as_deref()
            .and_then(MessageType::from_tag)
            .ok_or_else(|| IotError::InvalidMessage(format!("Bad message type: {msg_type:?}")))?;

        let msg_date = msg_date
            .map(|d| {
                d.parse::<i64>()
                    .map_err(|e| IotError::InvalidMessage(format!("Bad msgDate {d:?}: {e}")))
            })
            .transpose()?;

        let payload = bytes[pos..].to_vec();
        let declared = body_len
            .as_deref()
            .map(|len| {
                len.parse::<usize>()
                    .map_err(|e| IotError::InvalidMessage(format!("Bad bodyLength {len:?}: {e}")))
            })
            .transpose()?
            .unwrap_or(0);
        if declared != payload.len() {
            tracing::warn!(
                declared,
                actual = payload.len(),
                msg_id = msg_id.as_deref().unwrap_or_default(),
                "body length mismatch, using remaining bytes"
            );
        }

        Ok(Message {
            version,
            msg_type,
            func_type,
            site_id,
            thing_name,
            leaf_thing_name,
            msg_code,
            msg_id,
            msg_date,
            res_code,
            res_msg,
            data_format,
            severity,
            enc_type: enc_type.unwrap_or_else(|| PLAIN_ENC_TYPE.to_string()),
            auth_token,
            payload,
        })
    }
}
