//! Payload compression.

use crate::error::{IotError, Result};
use crate::message::Message;

/// Encoding-tag prefix for zstd-compressed payloads
pub const ZSTD_TAG: &str = "Z";

/// Default zstd level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Payload compressor with its skip policy.
pub trait Compressor: Send + Sync {
    /// Prefix added to the encoding tag of compressed messages.
    fn tag(&self) -> &'static str;

    /// Whether an outgoing message should be compressed.
    fn need_compress(&self, msg: &Message) -> bool;

    /// Whether an incoming message carries a compressed payload.
    fn need_decompress(&self, msg: &Message) -> bool {
        msg.enc_type.starts_with(self.tag())
    }

    /// Compress bytes.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress bytes.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Zstandard compressor
#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    /// Compress payloads at least this many bytes long (0 disables)
    pub threshold: usize,
    /// Compression level
    pub level: i32,
}

impl ZstdCompressor {
    /// Create a compressor with a byte threshold
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            level: DEFAULT_ZSTD_LEVEL,
        }
    }

    /// Compressor that never compresses but still decompresses tagged input
    pub fn disabled() -> Self {
        Self::new(0)
    }
}

impl Compressor for ZstdCompressor {
    fn tag(&self) -> &'static str {
        ZSTD_TAG
    }

    fn need_compress(&self, msg: &Message) -> bool {
        self.threshold != 0
            && !msg.payload.is_empty()
            && msg.payload.len() >= self.threshold
            && !msg.is_exempt()
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| IotError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| IotError::Decompression(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::codes;

    #[test]
    fn test_threshold() {
        let zstd = ZstdCompressor::new(10);
        let small = Message::notify(codes::ATTR_GROUP).with_payload(vec![b'x'; 5]);
        let large = Message::notify(codes::ATTR_GROUP).with_payload(vec![b'x'; 50]);
        let exact = Message::notify(codes::ATTR_GROUP).with_payload(vec![b'x'; 10]);

        assert!(!zstd.need_compress(&small));
        assert!(zstd.need_compress(&large));
        assert!(zstd.need_compress(&exact));
        assert!(!ZstdCompressor::disabled().need_compress(&large));
    }

    #[test]
    fn test_exempt_codes_skipped() {
        let zstd = ZstdCompressor::new(1);
        let auth = Message::request(codes::AUTH_STEP2).with_payload(vec![b'x'; 100]);
        assert!(!zstd.need_compress(&auth));
        assert!(!zstd.need_compress(&Message::keep_alive().with_payload(vec![0; 100])));
    }

    #[test]
    fn test_compress_decompress() {
        let zstd = ZstdCompressor::new(1);
        let data = br#"{"temperature":21.5,"humidity":40,"temperature2":21.5}"#.repeat(20);
        let compressed = zstd.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(zstd.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_decompress_garbage() {
        let zstd = ZstdCompressor::new(1);
        assert!(matches!(
            zstd.decompress(b"not zstd"),
            Err(IotError::Decompression(_))
        ));
    }

    #[test]
    fn test_need_decompress_by_tag() {
        let zstd = ZstdCompressor::disabled();
        let mut msg = Message::notify(codes::ATTR_GROUP);
        msg.enc_type = "Z3".into();
        assert!(zstd.need_decompress(&msg));
        msg.enc_type = "3".into();
        assert!(!zstd.need_decompress(&msg));
    }
}
