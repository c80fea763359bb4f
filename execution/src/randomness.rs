//! Encrypted randomness.
//!
//! The oracle hands out fresh uniformly random bytes as ciphertexts only: the
//! plaintext is encrypted the moment it is drawn and then dropped, and no call
//! returns it. Whoever holds the seed can still replay the draw stream.
//!
//! ## Stream derivation
//!
//! ```text
//! key = sha256(namespace || "randomness" || seed)
//! draw[n] = ChaCha20(key)[n]
//! ```
//!
//! Blinding factors for the ciphertexts come from a second, independently keyed
//! stream so that observing ciphertexts says nothing about the draw stream.

use commonware_cryptography::{sha256::Sha256, Hasher};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use veiled_types::{
    cipher::{CipherError, EncryptedValue, EncryptionKey},
    NAMESPACE, ValueType,
};

/// Domain of every value the oracle produces.
pub const RANDOM_VALUE_TYPE: ValueType = ValueType::Uint8;

/// Source of encrypted random bytes.
pub trait RandomnessOracle {
    /// Draw one encrypted byte, independent of every previous draw.
    fn random_u8(&mut self, key: &EncryptionKey) -> Result<EncryptedValue, CipherError>;
}

/// ChaCha20-backed oracle.
pub struct ChaChaOracle {
    draws: ChaCha20Rng,
    blinding: ChaCha20Rng,
}

impl ChaChaOracle {
    pub fn new(seed: &[u8]) -> Self {
        Self {
            draws: ChaCha20Rng::from_seed(derive_key(seed, b"randomness")),
            blinding: ChaCha20Rng::from_seed(derive_key(seed, b"blinding")),
        }
    }
}

fn derive_key(seed: &[u8], label: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(NAMESPACE);
    hasher.update(label);
    hasher.update(seed);
    hasher.finalize().0
}

impl RandomnessOracle for ChaChaOracle {
    fn random_u8(&mut self, key: &EncryptionKey) -> Result<EncryptedValue, CipherError> {
        let value: u8 = self.draws.gen();
        EncryptedValue::encrypt(&mut self.blinding, key, value, RANDOM_VALUE_TYPE.domain())
    }
}
