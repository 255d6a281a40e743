use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};

use crate::backend::Backend;
use crate::cache::KeyCache;
use crate::error::ProviderError;
use crate::keys::SymmetricKey;
use crate::kms::{EncryptionContext, KmsClient};

/// Reserved encryption-context entry carrying the backend prefix.
/// Always wins over a caller-supplied entry of the same name.
pub const CONTEXT_HEADER: &str = "header";

/// Size of a freshly generated data encryption key.
pub const DATA_KEY_BYTES: usize = 32;

/// One tenant's envelope-encryption relationship: a data key wrapped
/// by a KMS master key, persisted locally only in wrapped form.
///
/// Immutable once built; the `with_*` methods derive modified copies,
/// leaving the original reusable. The serialized EDK is
/// `<backend-prefix><base64url-unpadded(ciphertext)>`, safe to embed
/// in identifiers, filenames, or URLs.
#[derive(Clone)]
pub struct KeyProvider {
    kms: Arc<dyn KmsClient>,
    backend: Arc<dyn Backend>,
    key_id: String,
    encryption_context: EncryptionContext,
    edk: String,
    cache: Option<Arc<dyn KeyCache>>,
}

impl KeyProvider {
    /// Rehydrate a provider around a known EDK (possibly empty).
    pub fn new(
        kms: Arc<dyn KmsClient>,
        backend: Arc<dyn Backend>,
        key_id: impl Into<String>,
        encryption_context: EncryptionContext,
        edk: impl Into<String>,
        cache: Option<Arc<dyn KeyCache>>,
    ) -> Self {
        Self {
            kms,
            backend,
            key_id: key_id.into(),
            encryption_context,
            edk: edk.into(),
            cache,
        }
    }

    /// Mint a brand-new data key via the KMS. The plaintext half of
    /// the response is dropped (and zeroized) before this returns;
    /// only the wrapped form is kept.
    pub fn generate(
        kms: Arc<dyn KmsClient>,
        backend: Arc<dyn Backend>,
        key_id: impl Into<String>,
        encryption_context: EncryptionContext,
        cache: Option<Arc<dyn KeyCache>>,
    ) -> Result<Self, ProviderError> {
        let key_id = key_id.into();
        let prefix = backend.prefix();
        let generated = kms.generate_data_key(
            &key_id,
            DATA_KEY_BYTES,
            &bind_context(&encryption_context, prefix),
        )?;
        let edk = format!(
            "{prefix}{}",
            Base64UrlUnpadded::encode_string(&generated.ciphertext)
        );
        Ok(Self::new(kms, backend, key_id, encryption_context, edk, cache))
    }

    /// Wrap an externally supplied raw key (e.g. imported from legacy
    /// storage) under this provider's master key. Does not mutate the
    /// provider.
    pub fn encrypt_data_key(&self, key: &SymmetricKey) -> Result<String, ProviderError> {
        let prefix = self.backend.prefix();
        let ciphertext = self.kms.encrypt(
            &self.key_id,
            key.as_bytes(),
            &bind_context(&self.encryption_context, prefix),
        )?;
        Ok(format!(
            "{prefix}{}",
            Base64UrlUnpadded::encode_string(&ciphertext)
        ))
    }

    /// Unwrap this provider's EDK into usable key material.
    ///
    /// The backend-prefix check runs before any cache or network
    /// access: an EDK minted under a different backend is rejected
    /// locally. A configured cache is consulted by the exact EDK
    /// string and trusted once populated.
    pub fn symmetric_key(&self) -> Result<SymmetricKey, ProviderError> {
        if self.edk.is_empty() {
            return Err(ProviderError::EdkNotSet);
        }
        let prefix = self.backend.prefix();
        let Some(encoded) = self.edk.strip_prefix(prefix) else {
            return Err(ProviderError::BackendMismatch { expected: prefix });
        };

        if let Some(cache) = &self.cache {
            if let Some(key) = cache.get(&self.edk) {
                log::debug!("data key cache hit for key id {}", self.key_id);
                return Ok(key);
            }
        }

        let ciphertext = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|e| ProviderError::InvalidEdk(e.to_string()))?;
        let plaintext = self.kms.decrypt(
            &self.key_id,
            &ciphertext,
            &bind_context(&self.encryption_context, prefix),
        )?;
        let key = SymmetricKey::new(plaintext);
        if let Some(cache) = &self.cache {
            cache.set(&self.edk, key.clone());
        }
        Ok(key)
    }

    /// Copy with a different EDK. Fails when the new EDK carries a
    /// foreign backend prefix.
    pub fn with_encrypted_data_key(&self, edk: impl Into<String>) -> Result<Self, ProviderError> {
        let edk = edk.into();
        let prefix = self.backend.prefix();
        if !edk.starts_with(prefix) {
            return Err(ProviderError::BackendMismatch { expected: prefix });
        }
        let mut next = self.clone();
        next.edk = edk;
        Ok(next)
    }

    pub fn with_encryption_context(&self, encryption_context: EncryptionContext) -> Self {
        let mut next = self.clone();
        next.encryption_context = encryption_context;
        next
    }

    pub fn with_key_id(&self, key_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.key_id = key_id.into();
        next
    }

    pub fn with_data_key_cache(&self, cache: Arc<dyn KeyCache>) -> Self {
        let mut next = self.clone();
        next.cache = Some(cache);
        next
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn encrypted_data_key(&self) -> &str {
        &self.edk
    }

    pub fn encryption_context(&self) -> &EncryptionContext {
        &self.encryption_context
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn kms_client(&self) -> &Arc<dyn KmsClient> {
        &self.kms
    }
}

/// Merge the reserved backend-binding entry into a caller context.
fn bind_context(context: &EncryptionContext, prefix: &str) -> EncryptionContext {
    let mut bound = context.clone();
    bound.insert(CONTEXT_HEADER.to_owned(), prefix.to_owned());
    bound
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::{BoringCrypto, FipsCrypto};
    use crate::cache::MemoryKeyCache;
    use crate::kms::local::LocalKms;
    use crate::kms::GeneratedDataKey;

    const KEY_ID: &str = "master-key-1";

    /// Delegating KMS double that counts calls.
    struct CountingKms<K> {
        inner: K,
        decrypts: AtomicUsize,
    }

    impl<K> CountingKms<K> {
        fn new(inner: K) -> Self {
            Self {
                inner,
                decrypts: AtomicUsize::new(0),
            }
        }
    }

    impl<K: KmsClient> KmsClient for CountingKms<K> {
        fn generate_data_key(
            &self,
            key_id: &str,
            num_bytes: usize,
            context: &EncryptionContext,
        ) -> Result<GeneratedDataKey, ProviderError> {
            self.inner.generate_data_key(key_id, num_bytes, context)
        }

        fn encrypt(
            &self,
            key_id: &str,
            plaintext: &[u8],
            context: &EncryptionContext,
        ) -> Result<Vec<u8>, ProviderError> {
            self.inner.encrypt(key_id, plaintext, context)
        }

        fn decrypt(
            &self,
            key_id: &str,
            ciphertext: &[u8],
            context: &EncryptionContext,
        ) -> Result<Vec<u8>, ProviderError> {
            self.decrypts.fetch_add(1, Ordering::SeqCst);
            self.inner.decrypt(key_id, ciphertext, context)
        }
    }

    fn local_kms() -> Arc<dyn KmsClient> {
        Arc::new(LocalKms::new().with_random_key(KEY_ID))
    }

    #[test]
    fn generate_then_unwrap_round_trips() {
        for backend in [
            Arc::new(BoringCrypto) as Arc<dyn Backend>,
            Arc::new(FipsCrypto) as Arc<dyn Backend>,
        ] {
            let provider = KeyProvider::generate(
                local_kms(),
                backend.clone(),
                KEY_ID,
                EncryptionContext::new(),
                None,
            )
            .unwrap();
            assert!(provider.encrypted_data_key().starts_with(backend.prefix()));

            let key = provider.symmetric_key().unwrap();
            assert_eq!(key.len(), DATA_KEY_BYTES);
            // Unwrapping again yields the same key.
            let again = provider.symmetric_key().unwrap();
            assert_eq!(
                hex::encode(again.as_bytes()),
                hex::encode(key.as_bytes())
            );
        }
    }

    #[test]
    fn edk_is_url_safe_and_unpadded() {
        let provider = KeyProvider::generate(
            local_kms(),
            Arc::new(BoringCrypto),
            KEY_ID,
            EncryptionContext::new(),
            None,
        )
        .unwrap();
        let encoded = &provider.encrypted_data_key()["brng:".len()..];
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn wrap_external_key_round_trips() {
        let provider = KeyProvider::generate(
            local_kms(),
            Arc::new(BoringCrypto),
            KEY_ID,
            EncryptionContext::new(),
            None,
        )
        .unwrap();

        let imported = SymmetricKey::generate();
        let edk = provider.encrypt_data_key(&imported).unwrap();
        let unwrapped = provider
            .with_encrypted_data_key(edk)
            .unwrap()
            .symmetric_key()
            .unwrap();
        assert_eq!(
            hex::encode(unwrapped.as_bytes()),
            hex::encode(imported.as_bytes())
        );
    }

    #[test]
    fn empty_edk_is_a_configuration_error() {
        let provider = KeyProvider::new(
            local_kms(),
            Arc::new(BoringCrypto),
            KEY_ID,
            EncryptionContext::new(),
            "",
            None,
        );
        assert!(matches!(
            provider.symmetric_key(),
            Err(ProviderError::EdkNotSet)
        ));
    }

    #[test]
    fn foreign_backend_prefix_is_rejected_before_any_kms_call() {
        let counting = Arc::new(CountingKms::new(LocalKms::new().with_random_key(KEY_ID)));
        let minted = KeyProvider::generate(
            local_kms(),
            Arc::new(BoringCrypto),
            KEY_ID,
            EncryptionContext::new(),
            None,
        )
        .unwrap();

        // Same EDK string, provider configured for a different backend.
        let wrong = KeyProvider::new(
            counting.clone(),
            Arc::new(FipsCrypto),
            KEY_ID,
            EncryptionContext::new(),
            minted.encrypted_data_key(),
            None,
        );
        assert!(matches!(
            wrong.symmetric_key(),
            Err(ProviderError::BackendMismatch { expected: "fips:" })
        ));
        assert_eq!(counting.decrypts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn with_encrypted_data_key_validates_prefix() {
        let provider = KeyProvider::generate(
            local_kms(),
            Arc::new(BoringCrypto),
            KEY_ID,
            EncryptionContext::new(),
            None,
        )
        .unwrap();
        assert!(matches!(
            provider.with_encrypted_data_key("fips:AAAA"),
            Err(ProviderError::BackendMismatch { expected: "brng:" })
        ));
    }

    #[test]
    fn context_change_breaks_unwrap() {
        let mut context = EncryptionContext::new();
        context.insert("tenant".into(), "acme".into());
        let provider = KeyProvider::generate(
            local_kms(),
            Arc::new(BoringCrypto),
            KEY_ID,
            context,
            None,
        )
        .unwrap();
        assert!(provider.symmetric_key().is_ok());

        let mut other = EncryptionContext::new();
        other.insert("tenant".into(), "mallory".into());
        let err = provider
            .with_encryption_context(other)
            .symmetric_key()
            .unwrap_err();
        assert!(matches!(err, ProviderError::Kms(_)));
    }

    #[test]
    fn reserved_header_entry_overrides_caller_entry() {
        // A caller-supplied "header" entry must not displace the
        // backend binding: wrap with a spoofed header, unwrap without
        // one, and the bound contexts still agree.
        let mut spoofed = EncryptionContext::new();
        spoofed.insert(CONTEXT_HEADER.into(), "fips:".into());
        let provider = KeyProvider::generate(
            local_kms(),
            Arc::new(BoringCrypto),
            KEY_ID,
            spoofed,
            None,
        )
        .unwrap();
        assert!(
            provider
                .with_encryption_context(EncryptionContext::new())
                .symmetric_key()
                .is_ok()
        );
    }

    #[test]
    fn cache_hit_skips_the_kms() {
        let counting = Arc::new(CountingKms::new(LocalKms::new().with_random_key(KEY_ID)));
        let cache = Arc::new(MemoryKeyCache::new());
        let provider = KeyProvider::generate(
            counting.clone(),
            Arc::new(BoringCrypto),
            KEY_ID,
            EncryptionContext::new(),
            Some(cache.clone()),
        )
        .unwrap();

        let first = provider.symmetric_key().unwrap();
        assert_eq!(counting.decrypts.load(Ordering::SeqCst), 1);
        assert!(cache.has(provider.encrypted_data_key()));

        let second = provider.symmetric_key().unwrap();
        assert_eq!(counting.decrypts.load(Ordering::SeqCst), 1);
        assert_eq!(
            hex::encode(second.as_bytes()),
            hex::encode(first.as_bytes())
        );
    }

    #[test]
    fn with_methods_leave_the_original_untouched() {
        let provider = KeyProvider::generate(
            local_kms(),
            Arc::new(BoringCrypto),
            KEY_ID,
            EncryptionContext::new(),
            None,
        )
        .unwrap();
        let original_edk = provider.encrypted_data_key().to_owned();

        let _changed = provider.with_key_id("other-master");
        assert_eq!(provider.key_id(), KEY_ID);
        assert_eq!(provider.encrypted_data_key(), original_edk);
    }
}
