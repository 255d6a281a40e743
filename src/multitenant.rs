use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::Backend;
use crate::cache::KeyCache;
use crate::error::ProviderError;
use crate::keys::SymmetricKey;
use crate::kms::{EncryptionContext, KmsClient};
use crate::provider::KeyProvider;
use crate::store::TenantStore;
use crate::tenant::TenantId;

/// A data row, as the encryption pipeline hands it over.
pub type Row = serde_json::Map<String, Value>;

/// Resolves "which data key applies to this operation" by tenant.
///
/// Tenants materialize lazily: the first time an unknown tenant is
/// activated, its record is fetched from the configured
/// [`TenantStore`] exactly once and kept for the provider's lifetime.
/// The map only grows; there is no invalidation path.
///
/// One instance per request (or external locking): mutating
/// operations take `&mut self`, so the compiler rules out concurrent
/// mutation of the tenant map and the active pointer.
pub struct MultiTenantKeyProvider {
    tenants: HashMap<TenantId, KeyProvider>,
    active: Option<TenantId>,
    backend: Arc<dyn Backend>,
    kms: Option<Arc<dyn KmsClient>>,
    store: Option<Arc<dyn TenantStore>>,
    cache: Option<Arc<dyn KeyCache>>,
    tenant_column_map: HashMap<String, String>,
    blind_index_tenant: Option<TenantId>,
}

impl std::fmt::Debug for MultiTenantKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTenantKeyProvider")
            .field("tenants", &self.tenants.keys().collect::<Vec<_>>())
            .field("active", &self.active)
            .field("backend", &self.backend.prefix())
            .field("tenant_column_map", &self.tenant_column_map)
            .field("blind_index_tenant", &self.blind_index_tenant)
            .finish_non_exhaustive()
    }
}

impl MultiTenantKeyProvider {
    /// Build from pre-registered tenants. Every supplied provider must
    /// use the configured backend.
    pub fn new(
        providers: impl IntoIterator<Item = (TenantId, KeyProvider)>,
        active: Option<TenantId>,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, ProviderError> {
        let mut this = Self {
            tenants: HashMap::new(),
            active,
            backend,
            kms: None,
            store: None,
            cache: None,
            tenant_column_map: HashMap::new(),
            blind_index_tenant: None,
        };
        for (index, provider) in providers {
            this.add_tenant(index, provider)?;
        }
        Ok(this)
    }

    /// Register a tenant explicitly. Fails when the provider's backend
    /// does not match the configured one.
    pub fn add_tenant(
        &mut self,
        index: impl Into<TenantId>,
        provider: KeyProvider,
    ) -> Result<(), ProviderError> {
        let index = index.into();
        if provider.backend().prefix() != self.backend.prefix() {
            return Err(ProviderError::BackendTypeMismatch(index));
        }
        self.tenants.insert(index, provider);
        Ok(())
    }

    pub fn tenant(&self, index: &TenantId) -> Option<&KeyProvider> {
        self.tenants.get(index)
    }

    pub fn active_tenant(&self) -> Result<&KeyProvider, ProviderError> {
        let active = self.active.as_ref().ok_or(ProviderError::NoActiveTenant)?;
        self.tenants
            .get(active)
            .ok_or_else(|| ProviderError::TenantNotFound(active.clone()))
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Generate a data key for a new tenant and hand it to the store.
    ///
    /// The store's create is idempotent: if a record for `index`
    /// already exists (a racing create won), the canonical stored
    /// record comes back instead of the fresh one. Without a store the
    /// fresh provider is returned as-is; persisting it is then the
    /// caller's problem. The result is not added to the tenant map.
    pub fn create_tenant(
        &self,
        index: impl Into<TenantId>,
        key_id: &str,
        encryption_context: EncryptionContext,
    ) -> Result<KeyProvider, ProviderError> {
        let kms = self.kms.clone().ok_or(ProviderError::NoKmsConfigured)?;
        let fresh = KeyProvider::generate(
            kms,
            self.backend.clone(),
            key_id,
            encryption_context,
            self.cache.clone(),
        )?;
        match &self.store {
            Some(store) => store.create_tenant(&index.into(), fresh),
            None => Ok(fresh),
        }
    }

    /// Select the tenant all subsequent key and row operations apply
    /// to, materializing it from the store when it is unknown.
    ///
    /// Without a configured store an unknown tenant is accepted here;
    /// the failure surfaces as [`ProviderError::TenantNotFound`] once
    /// a key is actually requested.
    pub fn set_active_tenant(&mut self, index: impl Into<TenantId>) -> Result<(), ProviderError> {
        let index = index.into();
        if !self.tenants.contains_key(&index) && self.store.is_some() {
            self.lookup_edk_for(&index)?;
        }
        self.active = Some(index);
        Ok(())
    }

    /// Return the EDK for `index`, fetching the tenant record from
    /// the store at most once per provider lifetime.
    pub fn lookup_edk_for(&mut self, index: &TenantId) -> Result<String, ProviderError> {
        if let Some(tenant) = self.tenants.get(index) {
            // Already materialized; no store or KMS round trip.
            return Ok(tenant.encrypted_data_key().to_owned());
        }
        let store = self.store.clone().ok_or(ProviderError::NoStoreConfigured)?;
        let kms = self.kms.clone().ok_or(ProviderError::NoKmsConfigured)?;

        log::debug!("materializing tenant {index} from store");
        let response = store.lookup_tenant_data(index)?;
        // Build the provider fully before inserting, so a failure
        // leaves no half-registered tenant behind.
        let provider = KeyProvider::new(
            kms,
            self.backend.clone(),
            response.key_id,
            response.encryption_context,
            response.edk.clone(),
            self.cache.clone(),
        );
        self.tenants.insert(index.clone(), provider);
        Ok(response.edk)
    }

    /// Unwrap the active tenant's data key, resolving the tenant
    /// first when needed.
    pub fn symmetric_key(&mut self) -> Result<SymmetricKey, ProviderError> {
        let active = self.active.clone().ok_or(ProviderError::NoActiveTenant)?;
        if !self.tenants.contains_key(&active) && self.store.is_some() {
            self.lookup_edk_for(&active)?;
        }
        self.active_tenant()?.symmetric_key()
    }

    /// Extract the tenant id from a row of `table_name`.
    pub fn tenant_from_row(&self, row: &Row, table_name: &str) -> Result<TenantId, ProviderError> {
        let column = self
            .tenant_column_map
            .get(table_name)
            .ok_or_else(|| ProviderError::NoColumnForTable(table_name.to_owned()))?;
        let value = row
            .get(column)
            .ok_or_else(|| ProviderError::TenantMissing(column.clone()))?;
        TenantId::from_json(value).ok_or_else(|| ProviderError::TenantType {
            column: column.clone(),
            found: json_type_name(value),
        })
    }

    /// Stamp the active tenant id into a row of `table_name`. A row
    /// passes through untouched when no tenant is active.
    pub fn inject_tenant_metadata(
        &self,
        mut row: Row,
        table_name: &str,
    ) -> Result<Row, ProviderError> {
        let Some(active) = &self.active else {
            return Ok(row);
        };
        let column = self
            .tenant_column_map
            .get(table_name)
            .ok_or_else(|| ProviderError::NoColumnForTable(table_name.to_owned()))?;
        row.insert(column.clone(), active.to_json());
        Ok(row)
    }

    pub fn set_tenant_column_for_table(
        &mut self,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
    ) -> &mut Self {
        self.tenant_column_map
            .insert(table_name.into(), column_name.into());
        self
    }

    pub fn set_edk_lookup(&mut self, store: Arc<dyn TenantStore>) -> &mut Self {
        self.store = Some(store);
        self
    }

    pub fn set_data_key_cache(&mut self, cache: Arc<dyn KeyCache>) -> &mut Self {
        self.cache = Some(cache);
        self
    }

    pub fn set_kms_client(&mut self, kms: Arc<dyn KmsClient>) -> &mut Self {
        self.kms = Some(kms);
        self
    }

    /// Designated tenant whose key blinds search indexes, so index
    /// values stay identical no matter which tenant encrypted a row.
    pub fn static_blind_index_tenant(&self) -> Option<&TenantId> {
        self.blind_index_tenant.as_ref()
    }

    pub fn set_static_blind_index_tenant(&mut self, tenant: Option<TenantId>) {
        self.blind_index_tenant = tenant;
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
