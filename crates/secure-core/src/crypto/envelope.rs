use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use zeroize::Zeroize;

use crate::error::{CoreError, CoreResult, CryptoError, DependencyError};

use super::{EncryptionContext, KeyManagementService, KmsError};

/// Prefix of every ciphertext produced by [`EncryptionService`].
pub const CIPHERTEXT_TAG: &str = "v1:";

/// Encrypts and decrypts identifier values bound to their owning subject.
///
/// Ciphertexts are opaque text: a version tag followed by the base64 encoding
/// of the key service's output.
#[derive(Debug, Clone)]
pub struct EncryptionService {
    kms: Arc<dyn KeyManagementService>,
}

impl EncryptionService {
    /// Creates a service over the given key-management collaborator.
    pub fn new(kms: Arc<dyn KeyManagementService>) -> Self {
        Self { kms }
    }

    /// Encrypts `plaintext` bound to `subject_id`.
    pub async fn encrypt(&self, plaintext: &str, subject_id: &str) -> CoreResult<String> {
        let context = EncryptionContext::for_subject(subject_id);
        let sealed = self
            .kms
            .encrypt(plaintext.as_bytes(), &context.aad())
            .await
            .map_err(|e| self.map_kms_error(e, &context))?;
        Ok(format!("{}{}", CIPHERTEXT_TAG, BASE64.encode(sealed)))
    }

    /// Decrypts `ciphertext` that must have been bound to `subject_id`.
    pub async fn decrypt(&self, ciphertext: &str, subject_id: &str) -> CoreResult<String> {
        let context = EncryptionContext::for_subject(subject_id);
        let encoded = ciphertext.strip_prefix(CIPHERTEXT_TAG).ok_or_else(|| {
            CoreError::Crypto(CryptoError::MalformedCiphertext {
                message: "missing version tag".to_string(),
            })
        })?;
        let sealed = BASE64.decode(encoded.as_bytes()).map_err(|e| {
            CoreError::Crypto(CryptoError::MalformedCiphertext {
                message: e.to_string(),
            })
        })?;

        let plaintext = self
            .kms
            .decrypt(&sealed, &context.aad())
            .await
            .map_err(|e| self.map_kms_error(e, &context))?;

        String::from_utf8(plaintext).map_err(|e| {
            e.into_bytes().zeroize();
            CoreError::Crypto(CryptoError::MalformedCiphertext {
                message: "plaintext is not valid UTF-8".to_string(),
            })
        })
    }

    /// Returns true if a stored value carries this service's ciphertext tag.
    pub fn is_ciphertext(value: &str) -> bool {
        value.starts_with(CIPHERTEXT_TAG)
    }

    fn map_kms_error(&self, err: KmsError, context: &EncryptionContext) -> CoreError {
        match err {
            KmsError::Unavailable(message) => {
                tracing::warn!(service = self.kms.name(), "Key service unavailable");
                CoreError::Dependency(DependencyError::Unavailable {
                    service: self.kms.name().to_string(),
                    message,
                })
            }
            KmsError::AuthenticationFailed | KmsError::KeyNotFound(_) => {
                tracing::warn!(subject_id = context.subject_id(), "Ciphertext failed authentication");
                CoreError::Crypto(CryptoError::AuthenticationFailed {
                    subject_id: context.subject_id().to_string(),
                })
            }
            KmsError::InvalidCiphertext(message) => {
                CoreError::Crypto(CryptoError::MalformedCiphertext { message })
            }
        }
    }
}
