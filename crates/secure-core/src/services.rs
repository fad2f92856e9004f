//! Wiring of one store, one key service and one clock into the services.

use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::config::CoreConfig;
use crate::crypto::{EncryptionService, KeyManagementService};
use crate::error::CoreResult;
use crate::source::{IdentitySource, SystemSource};
use crate::store::{open_store, DynStore};
use crate::vault::IdentifierVault;
use crate::versioned::{ClinicalRecordRepository, MedicationOrderRepository};

/// The services of the core sharing one store.
///
/// ```no_run
/// use helios_secure_core::config::CoreConfig;
/// use helios_secure_core::SecureCore;
///
/// # async fn demo() -> helios_secure_core::CoreResult<()> {
/// let config = CoreConfig::from_env();
/// let core = SecureCore::open(&config).await?;
/// let ctx = config.context("registrar");
/// let failures = core.audit().failed(&ctx, config.page_request(None, 0)).await?;
/// println!("{} failed accesses", failures.total);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SecureCore {
    store: DynStore,
    vault: IdentifierVault,
    audit: AuditTrail,
    clinical_records: ClinicalRecordRepository,
    medication_orders: MedicationOrderRepository,
}

impl SecureCore {
    /// Opens the configured store and key service.
    pub async fn open(config: &CoreConfig) -> CoreResult<Self> {
        let store = open_store(config).await?;
        let kms = Arc::new(config.key_service()?);
        Ok(Self::from_parts(store, kms, Arc::new(SystemSource), config))
    }

    /// Builds the services over an already initialized store.
    pub fn from_parts(
        store: DynStore,
        kms: Arc<dyn KeyManagementService>,
        source: Arc<dyn IdentitySource>,
        config: &CoreConfig,
    ) -> Self {
        let audit = AuditTrail::new(store.clone(), source.clone())
            .with_max_page_size(config.max_page_size);
        let vault = IdentifierVault::new(
            store.clone(),
            EncryptionService::new(kms),
            audit.clone(),
            source.clone(),
        )
        .with_max_page_size(config.max_page_size);
        let clinical_records = ClinicalRecordRepository::new(store.clone(), source.clone())
            .with_max_page_size(config.max_page_size);
        let medication_orders = MedicationOrderRepository::new(store.clone(), source)
            .with_max_page_size(config.max_page_size);

        tracing::info!(
            backend = store.backend_name(),
            dialect = %store.dialect(),
            "Secure core ready"
        );

        Self {
            store,
            vault,
            audit,
            clinical_records,
            medication_orders,
        }
    }

    /// Returns the shared store.
    pub fn store(&self) -> &DynStore {
        &self.store
    }

    /// Returns the identifier vault.
    pub fn vault(&self) -> &IdentifierVault {
        &self.vault
    }

    /// Returns the audit trail.
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Returns the clinical record repository.
    pub fn clinical_records(&self) -> &ClinicalRecordRepository {
        &self.clinical_records
    }

    /// Returns the medication order repository.
    pub fn medication_orders(&self) -> &MedicationOrderRepository {
        &self.medication_orders
    }
}
