use thiserror::Error;

use crate::tenant::TenantId;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no encrypted data key is set on this provider")]
    EdkNotSet,

    #[error("encrypted data key is intended for the wrong backend (expected prefix {expected:?})")]
    BackendMismatch { expected: &'static str },

    #[error("active tenant not set")]
    NoActiveTenant,

    #[error("no such tenant is defined: {0}")]
    TenantNotFound(TenantId),

    #[error("key provider for tenant {0} has the wrong backend")]
    BackendTypeMismatch(TenantId),

    #[error("no tenant column configured for table {0}")]
    NoColumnForTable(String),

    #[error("EDK lookup store not configured")]
    NoStoreConfigured,

    #[error("KMS client not configured")]
    NoKmsConfigured,

    #[error("tenant information is not provided in column {0}")]
    TenantMissing(String),

    #[error("tenant value in column {column} has the wrong type: {found}")]
    TenantType { column: String, found: &'static str },

    #[error("malformed encrypted data key: {0}")]
    InvalidEdk(String),

    #[error("KMS request failed: {0}")]
    Kms(String),

    #[error("tenant store failure: {0}")]
    Store(String),
}
