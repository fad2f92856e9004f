use std::collections::BTreeMap;
use std::fmt::Debug;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CoreError, CoreResult, ValidationError};

use super::{KeyManagementService, KmsError};

const BLOB_VERSION: u8 = 1;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const WRAPPED_KEY_LEN: usize = KEY_LEN + TAG_LEN;
const MAX_KEY_ID_LEN: usize = u8::MAX as usize;

type KeyBytes = Zeroizing<[u8; KEY_LEN]>;

struct KeyRing {
    primary: String,
    keys: BTreeMap<String, KeyBytes>,
}

/// In-process envelope key service.
///
/// Each value gets a fresh 256-bit data key. The data key encrypts the value
/// with the caller's AAD; the primary key-encryption key wraps the data key.
/// Blob layout:
///
/// ```text
/// version(1) | key_id_len(1) | key_id | wrap_nonce(12) | wrapped_key(48) | data_nonce(12) | ciphertext
/// ```
///
/// [`rotate`](Self::rotate) installs a new primary key; blobs wrapped by
/// older keys in the ring still decrypt.
pub struct LocalKeyService {
    ring: RwLock<KeyRing>,
}

impl Debug for LocalKeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.read();
        f.debug_struct("LocalKeyService")
            .field("primary", &ring.primary)
            .field("keys", &ring.keys.len())
            .finish()
    }
}

impl LocalKeyService {
    /// Creates a service whose primary key is `key`.
    pub fn new(key_id: impl Into<String>, key: [u8; KEY_LEN]) -> CoreResult<Self> {
        let key_id = key_id.into();
        validate_key_id(&key_id)?;
        let mut keys = BTreeMap::new();
        keys.insert(key_id.clone(), Zeroizing::new(key));
        Ok(Self {
            ring: RwLock::new(KeyRing {
                primary: key_id,
                keys,
            }),
        })
    }

    /// Creates a service from a base64-encoded 256-bit key.
    pub fn from_base64_key(key_id: impl Into<String>, encoded: &str) -> CoreResult<Self> {
        let decoded = Zeroizing::new(BASE64.decode(encoded.trim().as_bytes()).map_err(|e| {
            CoreError::Validation(ValidationError::InvalidValue {
                field: "kms_key".to_string(),
                message: e.to_string(),
            })
        })?);
        let key: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            CoreError::Validation(ValidationError::InvalidValue {
                field: "kms_key".to_string(),
                message: format!("expected {} bytes, got {}", KEY_LEN, decoded.len()),
            })
        })?;
        Self::new(key_id, key)
    }

    /// Creates a service with a random primary key.
    ///
    /// Values encrypted under a generated key are unreadable once the process
    /// exits unless the key is exported elsewhere.
    pub fn generate(key_id: &str) -> CoreResult<Self> {
        validate_key_id(key_id)?;
        let mut keys = BTreeMap::new();
        keys.insert(key_id.to_string(), random_key());
        Ok(Self {
            ring: RwLock::new(KeyRing {
                primary: key_id.to_string(),
                keys,
            }),
        })
    }

    /// Returns the id of the key that wraps new data keys.
    pub fn primary_key_id(&self) -> String {
        self.ring.read().primary.clone()
    }

    /// Returns the ids of every key in the ring.
    pub fn key_ids(&self) -> Vec<String> {
        self.ring.read().keys.keys().cloned().collect()
    }

    /// Adds a random key and makes it primary.
    pub fn rotate(&self, new_key_id: impl Into<String>) -> CoreResult<()> {
        self.install(new_key_id.into(), random_key())
    }

    /// Adds the given key and makes it primary.
    pub fn rotate_to(&self, new_key_id: impl Into<String>, key: [u8; KEY_LEN]) -> CoreResult<()> {
        self.install(new_key_id.into(), Zeroizing::new(key))
    }

    fn install(&self, key_id: String, key: KeyBytes) -> CoreResult<()> {
        validate_key_id(&key_id)?;
        let mut ring = self.ring.write();
        if ring.keys.contains_key(&key_id) {
            return Err(CoreError::Validation(ValidationError::InvalidValue {
                field: "key_id".to_string(),
                message: format!("key '{}' already exists", key_id),
            }));
        }
        let previous = std::mem::replace(&mut ring.primary, key_id.clone());
        ring.keys.insert(key_id.clone(), key);
        tracing::info!(previous = %previous, primary = %key_id, "Rotated local key service");
        Ok(())
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        let ring = self.ring.read();
        let key_id = ring.primary.as_str();
        let kek = ring
            .keys
            .get(key_id)
            .ok_or_else(|| KmsError::KeyNotFound(key_id.to_string()))?;

        let dek = random_key();
        let wrap_nonce = random_nonce();
        let wrapped = cipher(kek.as_slice())?
            .encrypt(
                Nonce::from_slice(&wrap_nonce),
                Payload {
                    msg: dek.as_slice(),
                    aad: key_id.as_bytes(),
                },
            )
            .map_err(|_| KmsError::InvalidCiphertext("failed to wrap data key".to_string()))?;

        let data_nonce = random_nonce();
        let ciphertext = cipher(dek.as_slice())?
            .encrypt(
                Nonce::from_slice(&data_nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| KmsError::InvalidCiphertext("failed to encrypt value".to_string()))?;

        let mut blob = Vec::with_capacity(
            2 + key_id.len() + NONCE_LEN + WRAPPED_KEY_LEN + NONCE_LEN + ciphertext.len(),
        );
        let key_id_len = u8::try_from(key_id.len())
            .map_err(|_| KmsError::KeyNotFound(format!("key id of {} bytes", key_id.len())))?;
        blob.push(BLOB_VERSION);
        blob.push(key_id_len);
        blob.extend_from_slice(key_id.as_bytes());
        blob.extend_from_slice(&wrap_nonce);
        blob.extend_from_slice(&wrapped);
        blob.extend_from_slice(&data_nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open(&self, blob: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        let parsed = ParsedBlob::parse(blob)?;
        let ring = self.ring.read();
        let kek = ring
            .keys
            .get(parsed.key_id)
            .ok_or_else(|| KmsError::KeyNotFound(parsed.key_id.to_string()))?;

        let dek = Zeroizing::new(
            cipher(kek.as_slice())?
                .decrypt(
                    Nonce::from_slice(parsed.wrap_nonce),
                    Payload {
                        msg: parsed.wrapped_key,
                        aad: parsed.key_id.as_bytes(),
                    },
                )
                .map_err(|_| KmsError::AuthenticationFailed)?,
        );

        cipher(dek.as_slice())?
            .decrypt(
                Nonce::from_slice(parsed.data_nonce),
                Payload {
                    msg: parsed.ciphertext,
                    aad,
                },
            )
            .map_err(|_| KmsError::AuthenticationFailed)
    }
}

struct ParsedBlob<'a> {
    key_id: &'a str,
    wrap_nonce: &'a [u8],
    wrapped_key: &'a [u8],
    data_nonce: &'a [u8],
    ciphertext: &'a [u8],
}

impl<'a> ParsedBlob<'a> {
    fn parse(blob: &'a [u8]) -> Result<Self, KmsError> {
        let invalid = |message: &str| KmsError::InvalidCiphertext(message.to_string());

        let (&version, rest) = blob.split_first().ok_or_else(|| invalid("empty blob"))?;
        if version != BLOB_VERSION {
            return Err(invalid("unsupported blob version"));
        }
        let (&id_len, rest) = rest.split_first().ok_or_else(|| invalid("truncated header"))?;
        let id_len = usize::from(id_len);
        if rest.len() < id_len + NONCE_LEN + WRAPPED_KEY_LEN + NONCE_LEN + TAG_LEN {
            return Err(invalid("truncated blob"));
        }
        let (key_id, rest) = rest.split_at(id_len);
        let key_id = std::str::from_utf8(key_id).map_err(|_| invalid("key id is not UTF-8"))?;
        let (wrap_nonce, rest) = rest.split_at(NONCE_LEN);
        let (wrapped_key, rest) = rest.split_at(WRAPPED_KEY_LEN);
        let (data_nonce, ciphertext) = rest.split_at(NONCE_LEN);

        Ok(Self {
            key_id,
            wrap_nonce,
            wrapped_key,
            data_nonce,
            ciphertext,
        })
    }
}

fn validate_key_id(key_id: &str) -> CoreResult<()> {
    if key_id.is_empty() || key_id.len() > MAX_KEY_ID_LEN {
        return Err(CoreError::Validation(ValidationError::InvalidValue {
            field: "key_id".to_string(),
            message: format!("key id must be 1..={} bytes", MAX_KEY_ID_LEN),
        }));
    }
    Ok(())
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, KmsError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| KmsError::InvalidCiphertext("bad key length".to_string()))
}

fn random_key() -> KeyBytes {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[async_trait]
impl KeyManagementService for LocalKeyService {
    fn name(&self) -> &str {
        "local-kms"
    }

    async fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.seal(plaintext, aad)
    }

    async fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.open(ciphertext, aad)
    }
}
