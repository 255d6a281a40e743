//! Envelope-encryption key management for multi-tenant data protection.
//!
//! Each tenant's data encryption key (DEK) is wrapped by a remote KMS
//! master key; only the wrapped form (EDK) is ever persisted. A
//! [`KeyProvider`] manages one tenant's envelope relationship —
//! generate, wrap, unwrap, optional decrypted-key caching — and a
//! [`MultiTenantKeyProvider`] resolves tenants lazily from an external
//! store and plumbs tenant ids through data rows.
//!
//! The serialized EDK is `<backend-prefix><base64url-unpadded blob>`,
//! and the backend prefix is also bound into the KMS encryption
//! context. Mixing backends therefore fails twice: locally at the
//! prefix check, and KMS-side at context authentication.

pub mod backend;
pub mod cache;
pub mod error;
pub mod keys;
pub mod kms;
pub mod multitenant;
pub mod provider;
pub mod store;
pub mod tenant;

pub use backend::{Backend, BoringCrypto, FipsCrypto};
pub use cache::{KeyCache, MemoryKeyCache};
pub use error::ProviderError;
pub use keys::SymmetricKey;
pub use kms::{EncryptionContext, GeneratedDataKey, KmsClient};
pub use multitenant::{MultiTenantKeyProvider, Row};
pub use provider::KeyProvider;
pub use store::{LookupResponse, TenantStore};
pub use tenant::TenantId;
