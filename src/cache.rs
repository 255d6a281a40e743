use std::collections::HashMap;

use parking_lot::RwLock;

use crate::keys::SymmetricKey;

/// Decrypted-data-key cache, keyed by the serialized EDK string.
///
/// Once populated, an entry is trusted: lookups are not re-validated
/// against the KMS. Racing callers may both miss and both decrypt;
/// the redundant KMS call is accepted.
pub trait KeyCache: Send + Sync {
    fn has(&self, key: &str) -> bool;
    fn get(&self, key: &str) -> Option<SymmetricKey>;
    fn set(&self, key: &str, value: SymmetricKey);
}

/// Process-local cache. No eviction; suitable for request-scoped or
/// short-lived providers.
#[derive(Default)]
pub struct MemoryKeyCache {
    entries: RwLock<HashMap<String, SymmetricKey>>,
}

impl MemoryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyCache for MemoryKeyCache {
    fn has(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    fn get(&self, key: &str) -> Option<SymmetricKey> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: SymmetricKey) {
        self.entries.write().insert(key.to_owned(), value);
    }
}
