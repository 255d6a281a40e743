pub mod cloud;
pub mod local;

use std::collections::BTreeMap;

use crate::error::ProviderError;
use crate::keys::SymmetricKey;

/// Additional authenticated data bound to every KMS call.
///
/// Ordered map so the canonical serialization (used as AAD by
/// [`local::LocalKms`]) is deterministic.
pub type EncryptionContext = BTreeMap<String, String>;

/// Result of a `generate_data_key` call: the plaintext key and the
/// ciphertext blob wrapping it under the master key.
pub struct GeneratedDataKey {
    pub plaintext: SymmetricKey,
    pub ciphertext: Vec<u8>,
}

/// Synchronous interface to a key management service.
///
/// Implementations must authenticate the ciphertext-to-context
/// binding: `decrypt` with a context that differs from the one used at
/// encrypt time must fail. Retry and backoff live in the
/// implementation, never in the callers.
pub trait KmsClient: Send + Sync {
    /// Mint a fresh data key of `num_bytes` under the master key
    /// `key_id`, returning both plaintext and ciphertext.
    fn generate_data_key(
        &self,
        key_id: &str,
        num_bytes: usize,
        context: &EncryptionContext,
    ) -> Result<GeneratedDataKey, ProviderError>;

    /// Wrap externally supplied plaintext under the master key.
    fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Unwrap a ciphertext blob. Fails if `context` does not match the
    /// context the blob was wrapped under.
    fn decrypt(
        &self,
        key_id: &str,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError>;
}
