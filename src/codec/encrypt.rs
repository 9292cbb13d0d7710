//! Payload encryption.
//!
//! The AES variants derive their key from the current credential:
//! `key = base64(SHA-256(credential))[..N]` with N = 16 (AES-128) or 32
//! (AES-256). Each payload is encrypted with AES-CBC/PKCS#7 under a fresh
//! random IV, which is prepended to the ciphertext.

use std::sync::{Arc, Mutex, PoisonError};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, InvalidLength, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::auth::CredentialStore;
use crate::config::EncType;
use crate::error::{IotError, Result};
use crate::message::{Message, PLAIN_ENC_TYPE};

/// IV length prepended to every ciphertext
pub const IV_LEN: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Payload encryptor with its skip policy.
pub trait Encryptor: Send + Sync {
    /// Encryption marker written to the encoding tag.
    fn tag(&self) -> &'static str;

    /// Whether an outgoing message should be encrypted.
    fn need_encrypt(&self, msg: &Message) -> bool;

    /// Whether an incoming message carries an encrypted payload.
    fn need_decrypt(&self, msg: &Message) -> bool {
        msg.enc_type != PLAIN_ENC_TYPE && !msg.payload.is_empty()
    }

    /// Encrypt bytes.
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt bytes.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Attach the source of key material.
    fn bind_credential(&mut self, _source: Arc<CredentialStore>) {}
}

/// No-op encryptor
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainEncryptor;

impl Encryptor for PlainEncryptor {
    fn tag(&self) -> &'static str {
        PLAIN_ENC_TYPE
    }

    fn need_encrypt(&self, _msg: &Message) -> bool {
        false
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    /// Always fails: a payload flagged as encrypted cannot be read without a
    /// key, so it is rejected rather than passed through.
    fn decrypt(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(IotError::Crypto(
            "Encrypted payload received but encryption is not configured".into(),
        ))
    }
}

/// AES key size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesKeySize {
    /// 128-bit key, tag `3`
    Aes128,
    /// 256-bit key, tag `5`
    Aes256,
}

impl AesKeySize {
    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }

    /// Matching encryption selector
    pub fn enc_type(&self) -> EncType {
        match self {
            Self::Aes128 => EncType::Aes128,
            Self::Aes256 => EncType::Aes256,
        }
    }
}

struct CachedKey {
    credential: Zeroizing<String>,
    key: Zeroizing<Vec<u8>>,
}

/// AES-CBC encryptor keyed from the bound credential.
pub struct AesCbcEncryptor {
    key_size: AesKeySize,
    credentials: Option<Arc<CredentialStore>>,
    cached: Mutex<Option<CachedKey>>,
}

impl std::fmt::Debug for AesCbcEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCbcEncryptor")
            .field("key_size", &self.key_size)
            .field("bound", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl AesCbcEncryptor {
    /// Create an unbound encryptor
    pub fn new(key_size: AesKeySize) -> Self {
        Self {
            key_size,
            credentials: None,
            cached: Mutex::new(None),
        }
    }

    /// Encryptor for an encryption selector, `None` for plain
    pub fn for_enc_type(enc_type: EncType) -> Option<Self> {
        match enc_type {
            EncType::Plain => None,
            EncType::Aes128 => Some(Self::new(AesKeySize::Aes128)),
            EncType::Aes256 => Some(Self::new(AesKeySize::Aes256)),
        }
    }

    /// Derive the key for a credential.
    pub fn derive_key(credential: &str, key_size: AesKeySize) -> Result<Zeroizing<Vec<u8>>> {
        let len = key_size.key_len();
        if credential.len() < len {
            return Err(IotError::Crypto(format!(
                "Credential must be at least {len} bytes for {:?}",
                key_size
            )));
        }
        let digest = Sha256::digest(credential.as_bytes());
        let encoded = Zeroizing::new(BASE64.encode(digest));
        Ok(Zeroizing::new(encoded.as_bytes()[..len].to_vec()))
    }

    /// Current key, re-derived whenever the credential changes.
    fn key(&self) -> Result<Zeroizing<Vec<u8>>> {
        let store = self
            .credentials
            .as_ref()
            .ok_or_else(|| IotError::Crypto("No credential bound to encryptor".into()))?;
        let credential = store
            .credential()
            .ok_or_else(|| IotError::Crypto("No credential available for key derivation".into()))?;

        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = cached.as_ref() {
            if entry.credential.as_str() == credential.as_str() {
                return Ok(entry.key.clone());
            }
        }

        let key = Self::derive_key(&credential, self.key_size)?;
        tracing::debug!(key_size = ?self.key_size, "derived payload key");
        *cached = Some(CachedKey {
            credential,
            key: key.clone(),
        });
        Ok(key)
    }
}

impl Encryptor for AesCbcEncryptor {
    fn tag(&self) -> &'static str {
        self.key_size.enc_type().tag()
    }

    fn need_encrypt(&self, msg: &Message) -> bool {
        !msg.payload.is_empty() && !msg.is_exempt()
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key()?;
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let invalid = |e: InvalidLength| IotError::Crypto(format!("Invalid key or IV: {e}"));
        let ciphertext = match self.key_size {
            AesKeySize::Aes128 => Aes128CbcEnc::new_from_slices(&key, &iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            AesKeySize::Aes256 => Aes256CbcEnc::new_from_slices(&key, &iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
        };

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < IV_LEN {
            return Err(IotError::Crypto(format!(
                "Ciphertext too short: {} bytes",
                data.len()
            )));
        }
        let key = self.key()?;
        let (iv, ciphertext) = data.split_at(IV_LEN);

        let invalid = |e: InvalidLength| IotError::Crypto(format!("Invalid key or IV: {e}"));
        let plaintext = match self.key_size {
            AesKeySize::Aes128 => Aes128CbcDec::new_from_slices(&key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            AesKeySize::Aes256 => Aes256CbcDec::new_from_slices(&key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };

        plaintext.map_err(|_| IotError::Crypto("Decryption failed: bad padding".into()))
    }

    fn bind_credential(&mut self, source: Arc<CredentialStore>) {
        self.credentials = Some(source);
        *self.cached.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::codes;

    const AUTH_CODE: &str = "0123456789abcdef0123456789abcdef";

    fn bound(key_size: AesKeySize) -> (AesCbcEncryptor, Arc<CredentialStore>) {
        let store = Arc::new(CredentialStore::default());
        store.set_credential(Some(AUTH_CODE.to_string()));
        let mut enc = AesCbcEncryptor::new(key_size);
        enc.bind_credential(Arc::clone(&store));
        (enc, store)
    }

    #[test]
    fn test_aes128_round_trip() {
        let (enc, _) = bound(AesKeySize::Aes128);
        let data = b"{\"temperature\":21.5}";
        let ciphertext = enc.encrypt(data).unwrap();

        assert_eq!(ciphertext.len(), IV_LEN + 32);
        assert_ne!(&ciphertext[IV_LEN..], &data[..]);
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), data);
        assert_eq!(enc.tag(), "3");
    }

    #[test]
    fn test_aes256_round_trip() {
        let (enc, _) = bound(AesKeySize::Aes256);
        let data = vec![7u8; 100];
        assert_eq!(enc.decrypt(&enc.encrypt(&data).unwrap()).unwrap(), data);
        assert_eq!(enc.tag(), "5");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let (enc, _) = bound(AesKeySize::Aes128);
        assert_ne!(enc.encrypt(b"same").unwrap(), enc.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_key_follows_credential() {
        let (enc, store) = bound(AesKeySize::Aes128);
        let ciphertext = enc.encrypt(b"payload").unwrap();

        store.set_credential(Some("fedcba9876543210fedcba9876543210".to_string()));
        assert!(enc.decrypt(&ciphertext).map_or(true, |p| p != b"payload"));

        let fresh = enc.encrypt(b"payload").unwrap();
        assert_eq!(enc.decrypt(&fresh).unwrap(), b"payload");
    }

    #[test]
    fn test_derive_key() {
        let key = AesCbcEncryptor::derive_key(AUTH_CODE, AesKeySize::Aes128).unwrap();
        let expected = BASE64.encode(Sha256::digest(AUTH_CODE.as_bytes()));
        assert_eq!(key.as_slice(), &expected.as_bytes()[..16]);

        assert!(AesCbcEncryptor::derive_key("short", AesKeySize::Aes128).is_err());
        assert!(AesCbcEncryptor::derive_key("0123456789abcdef", AesKeySize::Aes256).is_err());
    }

    #[test]
    fn test_unbound_fails() {
        let enc = AesCbcEncryptor::new(AesKeySize::Aes128);
        assert!(matches!(enc.encrypt(b"x"), Err(IotError::Crypto(_))));
    }

    #[test]
    fn test_short_ciphertext() {
        let (enc, _) = bound(AesKeySize::Aes128);
        assert!(enc.decrypt(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_skip_policy() {
        let (enc, _) = bound(AesKeySize::Aes128);
        assert!(enc.need_encrypt(&Message::notify(codes::ATTR_GROUP).with_payload(b"x".to_vec())));
        assert!(!enc.need_encrypt(&Message::notify(codes::ATTR_GROUP)));
        assert!(!enc.need_encrypt(&Message::request(codes::AUTH_STEP2).with_payload(b"x".to_vec())));
        assert!(!enc.need_encrypt(&Message::keep_alive().with_payload(b"x".to_vec())));
        assert!(!PlainEncryptor.need_encrypt(&Message::notify(codes::ATTR_GROUP).with_payload(b"x".to_vec())));
    }

    #[test]
    fn test_plain_decrypt_rejects_payload() {
        assert_eq!(PlainEncryptor.encrypt(b"data").unwrap(), b"data");
        let err = PlainEncryptor.decrypt(b"data").unwrap_err();
        assert!(matches!(err, IotError::Crypto(_)));
    }
}
