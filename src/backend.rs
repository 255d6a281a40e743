/// A cryptographic backend, as seen by the key-management layer.
///
/// Only the identifying prefix matters here; the actual row ciphers
/// live in the encryption pipeline. The prefix tags every serialized
/// EDK and is bound into the KMS encryption context, so an EDK wrapped
/// under one backend can never be unwrapped under another.
pub trait Backend: Send + Sync {
    /// Short constant tag, e.g. `"brng:"`.
    fn prefix(&self) -> &'static str;
}

/// Default backend (XChaCha20 + BLAKE2b family).
pub struct BoringCrypto;

impl Backend for BoringCrypto {
    fn prefix(&self) -> &'static str {
        "brng:"
    }
}

/// FIPS 140-2 friendly backend (AES-CTR + HMAC-SHA-384 family).
pub struct FipsCrypto;

impl Backend for FipsCrypto {
    fn prefix(&self) -> &'static str {
        "fips:"
    }
}
