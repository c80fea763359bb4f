use crate::{cipher::EncryptedValue, execution::NAMESPACE};
use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::{
    ed25519::PublicKey,
    sha256::{Digest, Sha256},
    Hasher,
};
use commonware_utils::{from_hex, hex};
use std::{fmt, str::FromStr};
use thiserror::Error as ThisError;

/// Length of a contract address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Address of the contract that owns a set of ciphertexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address must be {expected} hex characters, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("address is not valid hex")]
    InvalidHex,
}

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Deterministically derive the address of a contract deployed by `deployer`.
    pub fn derive(deployer: &PublicKey, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(NAMESPACE);
        hasher.update(b"contract");
        hasher.update(deployer.as_ref());
        hasher.update(&nonce.to_be_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest.as_ref()[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;
        if raw.len() != ADDRESS_LENGTH * 2 {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_LENGTH * 2,
                got: raw.len(),
            });
        }
        let decoded = from_hex(raw).ok_or(AddressError::InvalidHex)?;
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

impl Write for Address {
    fn write(&self, writer: &mut impl BufMut) {
        writer.put_slice(&self.0);
    }
}

impl Read for Address {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        if reader.remaining() < ADDRESS_LENGTH {
            return Err(Error::EndOfBuffer);
        }
        let mut bytes = [0u8; ADDRESS_LENGTH];
        reader.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }
}

impl FixedSize for Address {
    const SIZE: usize = ADDRESS_LENGTH;
}

/// Plaintext type carried by a ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    Bool = 0,
    Uint4 = 1,
    Uint8 = 2,
}

impl ValueType {
    /// Number of distinct plaintexts of this type.
    pub const fn domain(&self) -> usize {
        match self {
            Self::Bool => 2,
            Self::Uint4 => 16,
            Self::Uint8 => 256,
        }
    }
}

impl Write for ValueType {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for ValueType {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        match value {
            0 => Ok(Self::Bool),
            1 => Ok(Self::Uint4),
            2 => Ok(Self::Uint8),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for ValueType {
    const SIZE: usize = 1;
}

/// How a ciphertext came to exist. Folded into its handle id so that two
/// ciphertexts with different histories can never share a handle.
#[derive(Clone, Copy, Debug)]
pub enum Origin<'a> {
    /// Submitted by `owner` as the `index`-th value of the call made at `nonce`.
    Input {
        owner: &'a PublicKey,
        nonce: u64,
        index: u8,
    },
    /// Drawn by the randomness oracle.
    Random,
    /// Output of the bounding function applied to `parent`.
    Bounded { parent: &'a Digest },
}

/// Opaque, immutable reference to a ciphertext held by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CiphertextHandle {
    pub id: Digest,
    pub value_type: ValueType,
    pub contract: Address,
}

impl CiphertextHandle {
    pub fn new(
        contract: Address,
        value_type: ValueType,
        origin: Origin<'_>,
        value: &EncryptedValue,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(NAMESPACE);
        hasher.update(contract.as_ref());
        hasher.update(&[value_type as u8]);
        match origin {
            Origin::Input {
                owner,
                nonce,
                index,
            } => {
                hasher.update(b"input");
                hasher.update(owner.as_ref());
                hasher.update(&nonce.to_be_bytes());
                hasher.update(&[index]);
            }
            Origin::Random => {
                hasher.update(b"random");
            }
            Origin::Bounded { parent } => {
                hasher.update(b"bounded");
                hasher.update(parent.as_ref());
            }
        }
        hasher.update(value.digest().as_ref());
        Self {
            id: hasher.finalize(),
            value_type,
            contract,
        }
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex(self.id.as_ref()))
    }
}

impl Write for CiphertextHandle {
    fn write(&self, writer: &mut impl BufMut) {
        self.id.write(writer);
        self.value_type.write(writer);
        self.contract.write(writer);
    }
}

impl Read for CiphertextHandle {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            id: Digest::read(reader)?,
            value_type: ValueType::read(reader)?,
            contract: Address::read(reader)?,
        })
    }
}

impl FixedSize for CiphertextHandle {
    const SIZE: usize = Digest::SIZE + ValueType::SIZE + Address::SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{DecryptionKey, EncryptedValue};
    use commonware_codec::{DecodeExt, Encode};
    use commonware_cryptography::{ed25519::PrivateKey, Signer};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_address_parse_and_display() {
        let address: Address = "0x00112233445566778899aabbccddeeff00112233".parse().unwrap();
        assert_eq!(address.as_bytes()[1], 0x11);
        assert_eq!(
            address.to_string(),
            "0x00112233445566778899aabbccddeeff00112233"
        );

        assert_eq!(
            "00112233445566778899aabbccddeeff00112233".parse::<Address>(),
            Err(AddressError::MissingPrefix)
        );
        assert_eq!(
            "0x0011".parse::<Address>(),
            Err(AddressError::InvalidLength {
                expected: 40,
                got: 4
            })
        );
        assert_eq!(
            "0xzz112233445566778899aabbccddeeff00112233".parse::<Address>(),
            Err(AddressError::InvalidHex)
        );
    }

    #[test]
    fn test_address_derivation_depends_on_nonce() {
        let deployer = PrivateKey::from_seed(1).public_key();
        let a = Address::derive(&deployer, 0);
        let b = Address::derive(&deployer, 1);
        assert_ne!(a, b);
        assert_eq!(a, Address::derive(&deployer, 0));
    }

    #[test]
    fn test_handle_ids_bind_origin() {
        let mut rng = StdRng::seed_from_u64(7);
        let key = DecryptionKey::generate(&mut rng).public();
        let value = EncryptedValue::encrypt(&mut rng, &key, 3, 16).unwrap();
        let owner = PrivateKey::from_seed(1).public_key();
        let contract = Address::new([9; ADDRESS_LENGTH]);

        let input = |nonce, index| {
            CiphertextHandle::new(
                contract,
                ValueType::Uint4,
                Origin::Input {
                    owner: &owner,
                    nonce,
                    index,
                },
                &value,
            )
        };
        assert_eq!(input(0, 0), input(0, 0));
        assert_ne!(input(0, 0).id, input(1, 0).id);
        assert_ne!(input(0, 0).id, input(0, 1).id);

        let random = CiphertextHandle::new(contract, ValueType::Uint4, Origin::Random, &value);
        let bounded = CiphertextHandle::new(
            contract,
            ValueType::Uint4,
            Origin::Bounded { parent: &random.id },
            &value,
        );
        assert_ne!(random.id, bounded.id);

        let decoded = CiphertextHandle::decode(bounded.encode()).unwrap();
        assert_eq!(decoded, bounded);
    }

    #[test]
    fn test_value_type_rejects_unknown_tag() {
        assert!(ValueType::decode([3u8].as_ref()).is_err());
        assert_eq!(ValueType::Uint8.domain(), 256);
    }
}
