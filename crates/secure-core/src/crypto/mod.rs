//! Envelope encryption for sensitive identifier values.
//!
//! The [`EncryptionService`] binds every ciphertext to the subject that owns
//! it by passing an [`EncryptionContext`] as authenticated associated data to
//! a [`KeyManagementService`]. Decrypting under another subject fails with an
//! authentication error instead of yielding plaintext.
//!
//! Key material never leaves the key service. [`LocalKeyService`] is an
//! in-process implementation for development and tests: it keeps a ring of
//! AES-256-GCM key-encryption keys and wraps a fresh data key per value.
//!
//! ```
//! use std::sync::Arc;
//! use helios_secure_core::crypto::{EncryptionService, LocalKeyService};
//!
//! # tokio_test_block(async {
//! let service = EncryptionService::new(Arc::new(LocalKeyService::generate("local-1").unwrap()));
//! let ciphertext = service.encrypt("123456789012", "P1").await.unwrap();
//! assert_ne!(ciphertext, "123456789012");
//! assert_eq!(service.decrypt(&ciphertext, "P1").await.unwrap(), "123456789012");
//! assert!(service.decrypt(&ciphertext, "P2").await.unwrap_err().is_authentication());
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

mod envelope;
mod local;

pub use envelope::{EncryptionService, CIPHERTEXT_TAG};
pub use local::LocalKeyService;

/// Errors reported by a key-management service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KmsError {
    /// The service could not be reached.
    #[error("key service unavailable: {0}")]
    Unavailable(String),

    /// The ciphertext did not authenticate under the supplied context.
    #[error("ciphertext failed authentication")]
    AuthenticationFailed,

    /// The key named by the ciphertext is not known to the service.
    #[error("unknown key: {0}")]
    KeyNotFound(String),

    /// The ciphertext is structurally invalid.
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),
}

/// External key-management collaborator.
#[async_trait]
pub trait KeyManagementService: Send + Sync + Debug {
    /// Returns the service name used in errors.
    fn name(&self) -> &str;

    /// Encrypts `plaintext` bound to `aad`.
    async fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Decrypts `ciphertext` that was bound to `aad`.
    async fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError>;
}

/// The associated data that binds one ciphertext to its owning subject.
///
/// Built fresh for each encrypt or decrypt call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionContext {
    subject_id: String,
}

impl EncryptionContext {
    /// Creates the binding context for a subject.
    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
        }
    }

    /// Returns the bound subject id.
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Returns the AAD bytes.
    pub fn aad(&self) -> Vec<u8> {
        format!("helios:subject:{}", self.subject_id).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aad_is_subject_specific() {
        let a = EncryptionContext::for_subject("P1");
        let b = EncryptionContext::for_subject("P2");
        assert_eq!(a.aad(), b"helios:subject:P1".to_vec());
        assert_ne!(a.aad(), b.aad());
    }
}
