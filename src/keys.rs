use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw symmetric key material. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: Vec<u8>,
}

impl SymmetricKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Mint a fresh random 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(***)")
    }
}
