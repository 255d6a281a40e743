use std::collections::HashMap;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use argon2::Argon2;
use zeroize::Zeroizing;

use super::{EncryptionContext, GeneratedDataKey, KmsClient};
use crate::error::ProviderError;
use crate::keys::SymmetricKey;

/// Fixed salt for passphrase derivation. In production, store a
/// random salt alongside the tenant records and pass it in.
const DEFAULT_SALT: &[u8; 16] = b"tenantkms-salt-0";

/// In-process KMS backed by AES-256-GCM.
///
/// Holds one 32-byte master key per key id. The encryption context is
/// fed to the cipher as AAD in canonical JSON form, so a context
/// mismatch at decrypt time is an authentication failure, same as a
/// remote KMS would report. Intended for tests, development, and
/// air-gapped deployments.
#[derive(Default)]
pub struct LocalKms {
    master_keys: HashMap<String, [u8; 32]>,
}

impl LocalKms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_master_key(mut self, key_id: impl Into<String>, key: [u8; 32]) -> Self {
        self.master_keys.insert(key_id.into(), key);
        self
    }

    pub fn with_random_key(mut self, key_id: impl Into<String>) -> Self {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).expect("getrandom failed");
        self.master_keys.insert(key_id.into(), key);
        self
    }

    /// Derive a master key from a passphrase via Argon2id.
    pub fn with_passphrase_key(
        mut self,
        key_id: impl Into<String>,
        passphrase: &str,
    ) -> Result<Self, ProviderError> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), DEFAULT_SALT, &mut key)
            .map_err(|e| ProviderError::Kms(format!("argon2 failed: {e}")))?;
        self.master_keys.insert(key_id.into(), key);
        Ok(self)
    }

    fn cipher_for(&self, key_id: &str) -> Result<Aes256Gcm, ProviderError> {
        let key = self
            .master_keys
            .get(key_id)
            .ok_or_else(|| ProviderError::Kms(format!("unknown master key id: {key_id}")))?;
        Aes256Gcm::new_from_slice(key)
            .map_err(|e| ProviderError::Kms(format!("bad master key: {e}")))
    }

    fn context_aad(context: &EncryptionContext) -> Vec<u8> {
        // BTreeMap iteration order makes this canonical.
        serde_json::to_vec(context).expect("string map serializes")
    }
}

impl KmsClient for LocalKms {
    fn generate_data_key(
        &self,
        key_id: &str,
        num_bytes: usize,
        context: &EncryptionContext,
    ) -> Result<GeneratedDataKey, ProviderError> {
        let mut plaintext = Zeroizing::new(vec![0u8; num_bytes]);
        getrandom::getrandom(plaintext.as_mut_slice()).expect("getrandom failed");
        let ciphertext = self.encrypt(key_id, &plaintext, context)?;
        Ok(GeneratedDataKey {
            plaintext: SymmetricKey::new(plaintext.to_vec()),
            ciphertext,
        })
    }

    fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError> {
        let cipher = self.cipher_for(key_id)?;
        let mut nonce_bytes = [0u8; 12];
        getrandom::getrandom(&mut nonce_bytes).expect("getrandom failed");
        let aad = Self::context_aad(context);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| ProviderError::Kms(format!("wrap failed: {e}")))?;
        // Blob layout: nonce || ciphertext+tag.
        let mut blob = Vec::with_capacity(12 + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    fn decrypt(
        &self,
        key_id: &str,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError> {
        if ciphertext.len() < 12 {
            return Err(ProviderError::Kms("ciphertext blob too short".into()));
        }
        let cipher = self.cipher_for(key_id)?;
        let (nonce_bytes, sealed) = ciphertext.split_at(12);
        let aad = Self::context_aad(context);
        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                ProviderError::Kms("unwrap rejected: ciphertext or context mismatch".into())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> EncryptionContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn generate_then_decrypt_round_trips() {
        let kms = LocalKms::new().with_random_key("master-a");
        let context = ctx(&[("tenant", "acme")]);
        let generated = kms.generate_data_key("master-a", 32, &context).unwrap();
        assert_eq!(generated.plaintext.len(), 32);

        let unwrapped = kms
            .decrypt("master-a", &generated.ciphertext, &context)
            .unwrap();
        assert_eq!(unwrapped, generated.plaintext.as_bytes());
    }

    #[test]
    fn decrypt_fails_under_different_context() {
        let kms = LocalKms::new().with_random_key("master-a");
        let generated = kms
            .generate_data_key("master-a", 32, &ctx(&[("tenant", "acme")]))
            .unwrap();

        let err = kms
            .decrypt("master-a", &generated.ciphertext, &ctx(&[("tenant", "evil")]))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Kms(_)));
    }

    #[test]
    fn decrypt_fails_with_empty_context_when_wrapped_with_one() {
        let kms = LocalKms::new().with_random_key("master-a");
        let generated = kms
            .generate_data_key("master-a", 32, &ctx(&[("tenant", "acme")]))
            .unwrap();
        assert!(
            kms.decrypt("master-a", &generated.ciphertext, &EncryptionContext::new())
                .is_err()
        );
    }

    #[test]
    fn unknown_master_key_is_an_error() {
        let kms = LocalKms::new();
        let err = kms
            .encrypt("nope", b"key material", &EncryptionContext::new())
            .unwrap_err();
        assert!(matches!(err, ProviderError::Kms(_)));
    }

    #[test]
    fn passphrase_derivation_is_stable() {
        let a = LocalKms::new()
            .with_passphrase_key("m", "correct horse")
            .unwrap();
        let b = LocalKms::new()
            .with_passphrase_key("m", "correct horse")
            .unwrap();
        let context = EncryptionContext::new();
        let wrapped = a.encrypt("m", b"payload", &context).unwrap();
        assert_eq!(b.decrypt("m", &wrapped, &context).unwrap(), b"payload");
    }
}
