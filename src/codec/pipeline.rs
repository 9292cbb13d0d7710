//! Encode/decode pipeline: framer + compressor + encryptor.

use std::sync::Arc;

use super::{Compressor, DelimiterFramer, Encryptor, Framer, PlainEncryptor, ZstdCompressor};
use crate::error::{IotError, Result};
use crate::message::{Message, PLAIN_ENC_TYPE};

/// Composes the wire transforms in their fixed order.
///
/// Encode: encrypt, then compress (prefixing the compression tag), then
/// frame. Decode is the exact inverse.
#[derive(Clone)]
pub struct MessagePipeline {
    framer: Arc<dyn Framer>,
    compressor: Arc<dyn Compressor>,
    encryptor: Arc<dyn Encryptor>,
}

impl std::fmt::Debug for MessagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePipeline")
            .field("compression_tag", &self.compressor.tag())
            .field("encryption_tag", &self.encryptor.tag())
            .finish_non_exhaustive()
    }
}

impl Default for MessagePipeline {
    fn default() -> Self {
        Self::new(
            Arc::new(DelimiterFramer::new()),
            Arc::new(ZstdCompressor::disabled()),
            Arc::new(PlainEncryptor),
        )
    }
}

impl MessagePipeline {
    /// Create a pipeline from its stages
    pub fn new(
        framer: Arc<dyn Framer>,
        compressor: Arc<dyn Compressor>,
        encryptor: Arc<dyn Encryptor>,
    ) -> Self {
        Self {
            framer,
            compressor,
            encryptor,
        }
    }

    /// Encryption tag of the active encryptor
    pub fn encryption_tag(&self) -> &'static str {
        self.encryptor.tag()
    }

    /// Encode a message to wire bytes.
    pub fn encode(&self, mut msg: Message) -> Result<Vec<u8>> {
        if self.encryptor.need_encrypt(&msg) {
            msg.payload = self.encryptor.encrypt(&msg.payload)?;
            msg.enc_type = self.encryptor.tag().to_string();
        }

        if self.compressor.need_compress(&msg) {
            let before = msg.payload.len();
            msg.payload = self.compressor.compress(&msg.payload)?;
            msg.enc_type.insert_str(0, self.compressor.tag());
            tracing::trace!(before, after = msg.payload.len(), "compressed payload");
        }

        self.framer.frame(&msg)
    }

    /// Decode wire bytes to a message.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let mut msg = self.framer.unframe(bytes)?;

        if self.compressor.need_decompress(&msg) {
            if !msg.payload.is_empty() {
                msg.payload = self.compressor.decompress(&msg.payload)?;
            }
            msg.enc_type.drain(..self.compressor.tag().len());
            if msg.enc_type.is_empty() {
                msg.enc_type = PLAIN_ENC_TYPE.to_string();
            }
        }

        if self.encryptor.need_decrypt(&msg) {
            if msg.enc_type != self.encryptor.tag() {
                return Err(IotError::Crypto(format!(
                    "Payload encrypted with enc type {} but {} is configured",
                    msg.enc_type,
                    self.encryptor.tag()
                )));
            }
            msg.payload = self.encryptor.decrypt(&msg.payload)?;
            msg.enc_type = PLAIN_ENC_TYPE.to_string();
        }

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialStore;
    use crate::codec::{AesCbcEncryptor, AesKeySize};
    use crate::message::codes;

    fn pipeline(threshold: usize, aes: bool) -> MessagePipeline {
        let encryptor: Arc<dyn Encryptor> = if aes {
            let store = Arc::new(CredentialStore::default());
            store.set_credential(Some("0123456789abcdef0123456789abcdef".into()));
            let mut enc = AesCbcEncryptor::new(AesKeySize::Aes128);
            enc.bind_credential(store);
            Arc::new(enc)
        } else {
            Arc::new(PlainEncryptor)
        };
        MessagePipeline::new(
            Arc::new(DelimiterFramer::new()),
            Arc::new(ZstdCompressor::new(threshold)),
            encryptor,
        )
    }

    fn peek_enc_type(bytes: &[u8]) -> String {
        DelimiterFramer::new().unframe(bytes).unwrap().enc_type
    }

    #[test]
    fn test_encode_tags() {
        let body = br#"{"a":1,"b":2,"c":3,"d":4,"e":5,"f":6,"g":7}"#.to_vec();
        let msg = Message::notify(codes::ATTR_GROUP).with_payload(body);

        assert_eq!(peek_enc_type(&pipeline(0, false).encode(msg.clone()).unwrap()), "0");
        assert_eq!(peek_enc_type(&pipeline(10, false).encode(msg.clone()).unwrap()), "Z0");
        assert_eq!(peek_enc_type(&pipeline(0, true).encode(msg.clone()).unwrap()), "3");
        assert_eq!(peek_enc_type(&pipeline(10, true).encode(msg).unwrap()), "Z3");
    }

    #[test]
    fn test_round_trip_all_combinations() {
        let body = b"temperature=21.5;humidity=40;".repeat(8);
        for threshold in [0, 16] {
            for aes in [false, true] {
                let p = pipeline(threshold, aes);
                let msg = Message::notify(codes::ATTR_GROUP).with_payload(body.clone());
                let decoded = p.decode(&p.encode(msg.clone()).unwrap()).unwrap();
                assert_eq!(decoded, msg, "threshold={threshold} aes={aes}");
            }
        }
    }

    #[test]
    fn test_plain_rejects_encrypted_payload() {
        let encrypted = pipeline(0, true)
            .encode(Message::notify(codes::ATTR_GROUP).with_payload(b"secret".to_vec()))
            .unwrap();
        assert!(matches!(
            pipeline(0, false).decode(&encrypted),
            Err(IotError::Crypto(_))
        ));
    }

    #[test]
    fn test_peer_compression_without_local_threshold() {
        let body = vec![b'x'; 200];
        let bytes = pipeline(10, false)
            .encode(Message::notify(codes::ATTR_GROUP).with_payload(body.clone()))
            .unwrap();
        let decoded = pipeline(0, false).decode(&bytes).unwrap();
        assert_eq!(decoded.payload, body);
        assert_eq!(decoded.enc_type, "0");
    }
}
