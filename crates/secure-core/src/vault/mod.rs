//! Identifier vault.
//!
//! Stores the identification numbers of subjects. National identification
//! numbers are encrypted bound to their owning subject; every other kind is
//! stored as given.
//!
//! ```no_run
//! use std::sync::Arc;
//! use helios_secure_core::audit::AuditTrail;
//! use helios_secure_core::context::AccessContext;
//! use helios_secure_core::crypto::{EncryptionService, LocalKeyService};
//! use helios_secure_core::source::SystemSource;
//! use helios_secure_core::store::{DynStore, RowStore};
//! use helios_secure_core::store::sqlite::SqliteStore;
//! use helios_secure_core::vault::{IdentifierKind, IdentifierVault, NewIdentifier};
//!
//! # async fn demo() -> helios_secure_core::CoreResult<()> {
//! let store = SqliteStore::in_memory()?;
//! store.init_schema().await?;
//! let store: DynStore = Arc::new(store);
//! let source = Arc::new(SystemSource);
//! let vault = IdentifierVault::new(
//!     store.clone(),
//!     EncryptionService::new(Arc::new(LocalKeyService::generate("local-1")?)),
//!     AuditTrail::new(store, source.clone()),
//!     source,
//! );
//!
//! let ctx = AccessContext::new("registrar");
//! let created = vault
//!     .create(&ctx, NewIdentifier::new("P1", IdentifierKind::NationalId, "123456789012"))
//!     .await?;
//! let revealed = vault.get(&ctx, &created.id, true).await?;
//! assert_eq!(revealed.value, "123456789012");
//! # Ok(())
//! # }
//! ```

mod service;
mod types;

pub use service::IdentifierVault;
pub use types::{
    IdentifierKind, IdentifierPatch, NewIdentifier, SensitiveIdentifier, VerificationStatus,
};
