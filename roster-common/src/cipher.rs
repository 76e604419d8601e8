//! Field-level encryption at rest
//!
//! Every non-system field of a row is encrypted individually with
//! AES-256-CBC (PKCS#7) and stored as lowercase hex.
//!
//! # Modes
//!
//! - [`CipherMode::FixedIv`] (default): zero IV. Identical plaintexts produce
//!   identical ciphertexts, which keeps byte compatibility with rows written
//!   by the previous deployment but leaks value equality to anyone reading
//!   the database.
//! - [`CipherMode::RandomIv`]: a fresh IV per value, stored as
//!   `<iv-hex>:<ciphertext-hex>`. Not deterministic.
//!
//! Decryption accepts both encodings regardless of the configured mode, so
//! switching to `RandomIv` migrates rows as they are rewritten.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::fields::{FieldMap, FieldValue, StoredFields};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// IV length in bytes (AES block size)
pub const IV_LEN: usize = 16;

/// Keys with this prefix are system fields (`_id`, `__v`, ...) and never encrypted
pub const RESERVED_PREFIX: &str = "_";

/// Audit timestamps, also passed through verbatim
pub const TIMESTAMP_FIELDS: [&str; 2] = ["createdAt", "updatedAt"];

/// Wrapper key under which a document object carries its plain data
pub const DOCUMENT_DATA_KEY: &str = "_doc";

const RANDOM_IV_SEPARATOR: char = ':';

/// Cipher failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// Key missing, not hex, or not 32 bytes
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// Stored value is not a well-formed ciphertext
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Padding check failed (wrong key or corrupted data)
    #[error("decryption failed (wrong key or corrupted data)")]
    Decrypt,

    /// Decrypted bytes are not UTF-8
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,

    /// A specific row field failed to decrypt
    #[error("field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<CipherError>,
    },
}

/// IV strategy for newly encrypted values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherMode {
    #[default]
    FixedIv,
    RandomIv,
}

/// True for keys that bypass encryption in both directions
pub fn is_system_field(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX) || TIMESTAMP_FIELDS.contains(&key)
}

/// Process-wide field cipher, built once at startup from the configured key
pub struct FieldCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
    mode: CipherMode,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("key", &"<redacted>")
            .field("mode", &self.mode)
            .finish()
    }
}

impl FieldCipher {
    /// Build from raw key bytes
    pub fn new(key: [u8; KEY_LEN], mode: CipherMode) -> Self {
        Self {
            key: Zeroizing::new(key),
            mode,
        }
    }

    /// Build from a 64-character hex key
    ///
    /// ```
    /// use roster_common::cipher::{CipherMode, FieldCipher};
    ///
    /// let key = "00".repeat(32);
    /// assert!(FieldCipher::from_hex(&key, CipherMode::FixedIv).is_ok());
    /// assert!(FieldCipher::from_hex("abcd", CipherMode::FixedIv).is_err());
    /// ```
    pub fn from_hex(key_hex: &str, mode: CipherMode) -> Result<Self, CipherError> {
        let bytes = Zeroizing::new(
            hex::decode(key_hex.trim())
                .map_err(|e| CipherError::InvalidKey(format!("not hex: {}", e)))?,
        );
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CipherError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self::new(key, mode))
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Encrypt one scalar.
    ///
    /// `Null` and `""` yield `None`; everything else is coerced to its
    /// string form first.
    pub fn encrypt_field(&self, value: &FieldValue) -> Option<String> {
        if value.is_empty() {
            return None;
        }
        let plaintext = value.to_plain_string()?;

        match self.mode {
            CipherMode::FixedIv => Some(hex::encode(self.encrypt_bytes(
                plaintext.as_bytes(),
                &[0u8; IV_LEN],
            ))),
            CipherMode::RandomIv => {
                let mut iv = [0u8; IV_LEN];
                rand::thread_rng().fill_bytes(&mut iv);
                let ciphertext = self.encrypt_bytes(plaintext.as_bytes(), &iv);
                Some(format!(
                    "{}{}{}",
                    hex::encode(iv),
                    RANDOM_IV_SEPARATOR,
                    hex::encode(ciphertext)
                ))
            }
        }
    }

    /// Decrypt one stored value.
    ///
    /// `null` and `""` decrypt to `Null`. Values that are not strings were
    /// never encrypted and come back unchanged.
    pub fn decrypt_field(&self, stored: &Value) -> Result<FieldValue, CipherError> {
        let text = match stored {
            Value::Null => return Ok(FieldValue::Null),
            Value::String(s) if s.is_empty() => return Ok(FieldValue::Null),
            Value::String(s) => s,
            other => return Ok(FieldValue::from(other.clone())),
        };

        let (iv, ciphertext_hex) = match text.split_once(RANDOM_IV_SEPARATOR) {
            Some((iv_hex, rest)) => {
                let iv: [u8; IV_LEN] = hex::decode(iv_hex)
                    .map_err(|e| CipherError::MalformedCiphertext(format!("iv: {}", e)))?
                    .try_into()
                    .map_err(|_| CipherError::MalformedCiphertext("iv length".to_string()))?;
                (iv, rest)
            }
            None => ([0u8; IV_LEN], text.as_str()),
        };

        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|e| CipherError::MalformedCiphertext(e.to_string()))?;
        if ciphertext.is_empty() || ciphertext.len() % IV_LEN != 0 {
            return Err(CipherError::MalformedCiphertext(format!(
                "length {} is not a positive multiple of {}",
                ciphertext.len(),
                IV_LEN
            )));
        }

        let plaintext = Aes256CbcDec::new(&(*self.key).into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext)
            .map(FieldValue::Text)
            .map_err(|_| CipherError::InvalidUtf8)
    }

    /// Encrypt every non-system field of a row
    pub fn encrypt_row(&self, row: &FieldMap) -> StoredFields {
        row.iter()
            .map(|(key, value)| {
                let stored = if is_system_field(key) {
                    value.to_json()
                } else {
                    self.encrypt_field(value)
                        .map(Value::String)
                        .unwrap_or(Value::Null)
                };
                (key.clone(), stored)
            })
            .collect()
    }

    /// Decrypt a stored row.
    ///
    /// Accepts either the raw field object or a document wrapper carrying
    /// the data under `_doc`. The first field that fails aborts the row.
    pub fn decrypt_row(&self, stored: &StoredFields) -> Result<FieldMap, CipherError> {
        let plain = match stored.get(DOCUMENT_DATA_KEY) {
            Some(Value::Object(inner)) => inner,
            _ => stored,
        };

        plain
            .iter()
            .map(|(key, value)| {
                let decrypted = if is_system_field(key) {
                    FieldValue::from(value.clone())
                } else {
                    self.decrypt_field(value).map_err(|e| CipherError::Field {
                        field: key.clone(),
                        source: Box::new(e),
                    })?
                };
                Ok((key.clone(), decrypted))
            })
            .collect()
    }

    /// Decrypt a document given as an arbitrary JSON value
    pub fn decrypt_document(&self, document: &Value) -> Result<FieldMap, CipherError> {
        match document {
            Value::Object(map) => self.decrypt_row(map),
            other => Err(CipherError::MalformedCiphertext(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    fn encrypt_bytes(&self, plaintext: &[u8], iv: &[u8; IV_LEN]) -> Vec<u8> {
        Aes256CbcEnc::new(&(*self.key).into(), &(*iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }
}
