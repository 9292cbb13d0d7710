//! Wire codecs for device messages.
//!
//! Three independent transforms are composed by [`MessagePipeline`]:
//!
//! | Stage        | Trait          | Default                          |
//! |--------------|----------------|----------------------------------|
//! | Framing      | [`Framer`]     | [`DelimiterFramer`] (`\|`)        |
//! | Compression  | [`Compressor`] | [`ZstdCompressor`] (tag `Z`)     |
//! | Encryption   | [`Encryptor`]  | [`PlainEncryptor`] (tag `0`)     |
//!
//! # Encoding Tag
//!
//! ```text
//! [<compression tag>]<encryption tag>     e.g. "0", "3", "Z0", "Z3"
//! ```
//!
//! Authentication and keep-alive messages are never compressed or
//! encrypted.

mod compress;
mod encrypt;
mod framer;
mod pipeline;

pub use compress::{Compressor, ZstdCompressor, DEFAULT_ZSTD_LEVEL, ZSTD_TAG};
pub use encrypt::{AesCbcEncryptor, AesKeySize, Encryptor, PlainEncryptor, IV_LEN};
pub use framer::{DelimiterFramer, Framer, DEFAULT_DELIMITER, HEADER_FIELDS};
pub use pipeline::MessagePipeline;
