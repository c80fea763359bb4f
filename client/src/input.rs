use crate::Result;
use commonware_cryptography::ed25519::PublicKey;
use rand::{CryptoRng, RngCore};
use veiled_types::{
    cipher::EncryptionKey,
    input::{self, EncryptedInputBundle, InputContext},
    Address, ValueType,
};

/// Collects plaintext arguments for one contract call and encrypts them into a
/// proven bundle.
///
/// The bundle is bound to the contract, the submitting participant and the
/// nonce of the transaction that will carry it.
#[derive(Clone, Debug)]
pub struct EncryptedInput<'a> {
    contract: Address,
    owner: &'a PublicKey,
    values: Vec<(ValueType, u8)>,
}

impl<'a> EncryptedInput<'a> {
    pub fn new(contract: Address, owner: &'a PublicKey) -> Self {
        Self {
            contract,
            owner,
            values: Vec::new(),
        }
    }

    pub fn add_bool(&mut self, value: bool) -> &mut Self {
        self.values.push((ValueType::Bool, value as u8));
        self
    }

    /// Queue a 4-bit value; values above 15 are rejected by [`Self::encrypt`].
    pub fn add4(&mut self, value: u8) -> &mut Self {
        self.values.push((ValueType::Uint4, value));
        self
    }

    pub fn add8(&mut self, value: u8) -> &mut Self {
        self.values.push((ValueType::Uint8, value));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        key: &EncryptionKey,
        nonce: u64,
    ) -> Result<EncryptedInputBundle> {
        let context = InputContext {
            contract: self.contract,
            owner: self.owner,
            nonce,
        };
        Ok(input::prove(rng, key, &context, &self.values)?)
    }
}
