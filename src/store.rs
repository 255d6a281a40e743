use crate::error::ProviderError;
use crate::kms::EncryptionContext;
use crate::provider::KeyProvider;
use crate::tenant::TenantId;

/// Record a tenant store returns for one tenant.
#[derive(Clone, Debug)]
pub struct LookupResponse {
    pub edk: String,
    pub key_id: String,
    pub encryption_context: EncryptionContext,
}

/// Persistence for per-tenant EDK records. Implemented outside this
/// crate (database, config service, …); the key-resolution layer only
/// calls it.
pub trait TenantStore: Send + Sync {
    /// Persist a freshly generated tenant record.
    ///
    /// Must be idempotent: when a record for `index` already exists
    /// (e.g. a concurrent create won the race), the stored record is
    /// returned — rebuilt onto `provider` via its `with_*` methods —
    /// and the existing row is never clobbered.
    fn create_tenant(
        &self,
        index: &TenantId,
        provider: KeyProvider,
    ) -> Result<KeyProvider, ProviderError>;

    /// Fetch the record for `index`. Fails with
    /// [`ProviderError::TenantNotFound`] when no such tenant exists.
    fn lookup_tenant_data(&self, index: &TenantId) -> Result<LookupResponse, ProviderError>;
}
