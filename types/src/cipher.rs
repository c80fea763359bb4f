//! One-hot exponential ElGamal over Ristretto255.
//!
//! A plaintext `v` drawn from a domain of size `D` is stored as `D` ciphertexts,
//! where slot `v` encrypts `1` and every other slot encrypts `0`. Because the
//! scheme is additively homomorphic, any lookup table `g` can be evaluated on
//! ciphertexts by summing input slot `i` into output slot `g(i)`. Decryption
//! only ever has to tell the identity from the basepoint, so no discrete log is
//! required.

use bytes::{Buf, BufMut};
use commonware_codec::{Encode, EncodeSize, Error, FixedSize, RangeCfg, Read, Write};
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use curve25519_dalek::{
    constants::{RISTRETTO_BASEPOINT_POINT as G, RISTRETTO_BASEPOINT_TABLE},
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
    traits::Identity,
};
use rand::{CryptoRng, RngCore};
use std::ops::{Add, AddAssign};
use thiserror::Error as ThisError;

/// Size of a compressed Ristretto point.
pub const POINT_SIZE: usize = 32;

/// Size of a canonical scalar encoding.
pub const SCALAR_SIZE: usize = 32;

/// Largest one-hot domain (a full byte).
pub const MAX_SLOTS: usize = 256;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("plaintext {value} outside domain of {domain}")]
    PlaintextOutOfDomain { value: u8, domain: usize },
    #[error("lookup maps into slot {slot} outside domain of {domain}")]
    LookupOutOfDomain { slot: usize, domain: usize },
    #[error("domain of {0} slots is not supported")]
    UnsupportedDomain(usize),
    #[error("decrypted slots are not a one-hot vector")]
    NotOneHot,
    #[error("too many values in one input: {0}")]
    TooManyValues(usize),
    #[error("slot count mismatch: expected {expected}, got {got}")]
    SlotMismatch { expected: usize, got: usize },
    #[error("invalid threshold {threshold} for {members} members")]
    InvalidThreshold { threshold: u32, members: u32 },
    #[error("not enough valid partial decryptions: need {needed}, have {have}")]
    InsufficientPartials { needed: usize, have: usize },
    #[error("partial decryption from member {0} failed verification")]
    InvalidPartial(u32),
    #[error("unknown committee member {0}")]
    UnknownMember(u32),
}

/// Draw a uniformly random scalar with full entropy.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut bytes = [0u8; 64];
    rng.fill_bytes(&mut bytes);
    Scalar::from_bytes_mod_order_wide(&bytes)
}

/// Multiply the Ristretto basepoint by `scalar` using the precomputed table.
pub fn mul_base(scalar: &Scalar) -> RistrettoPoint {
    scalar * RISTRETTO_BASEPOINT_TABLE
}

pub fn write_point(point: &RistrettoPoint, writer: &mut impl BufMut) {
    writer.put_slice(point.compress().as_bytes());
}

pub fn read_point(reader: &mut impl Buf) -> Result<RistrettoPoint, Error> {
    if reader.remaining() < POINT_SIZE {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = [0u8; POINT_SIZE];
    reader.copy_to_slice(&mut bytes);
    CompressedRistretto(bytes)
        .decompress()
        .ok_or(Error::Invalid("RistrettoPoint", "not a canonical encoding"))
}

pub fn write_scalar(scalar: &Scalar, writer: &mut impl BufMut) {
    writer.put_slice(scalar.as_bytes());
}

pub fn read_scalar(reader: &mut impl Buf) -> Result<Scalar, Error> {
    if reader.remaining() < SCALAR_SIZE {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = [0u8; SCALAR_SIZE];
    reader.copy_to_slice(&mut bytes);
    Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
        .ok_or(Error::Invalid("Scalar", "not a canonical encoding"))
}

/// Public key under which every ledger value is encrypted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncryptionKey(RistrettoPoint);

impl EncryptionKey {
    pub const fn from_point(point: RistrettoPoint) -> Self {
        Self(point)
    }

    pub fn point(&self) -> &RistrettoPoint {
        &self.0
    }
}

impl Write for EncryptionKey {
    fn write(&self, writer: &mut impl BufMut) {
        write_point(&self.0, writer);
    }
}

impl Read for EncryptionKey {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(read_point(reader)?))
    }
}

impl FixedSize for EncryptionKey {
    const SIZE: usize = POINT_SIZE;
}

/// Full decryption scalar.
///
/// Exists only long enough for a dealer to split it into committee shares (and
/// in tests, where it is convenient to decrypt directly).
pub struct DecryptionKey(Scalar);

impl DecryptionKey {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(random_scalar(rng))
    }

    pub fn public(&self) -> EncryptionKey {
        EncryptionKey(mul_base(&self.0))
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.0
    }

    pub fn decrypt(&self, value: &EncryptedValue) -> Result<u8, CipherError> {
        let messages: Vec<RistrettoPoint> = value
            .slots()
            .iter()
            .map(|slot| slot.d - self.0 * slot.c)
            .collect();
        decode_one_hot(&messages)
    }
}

/// Exponential ElGamal ciphertext `(rG, mG + rX)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    pub c: RistrettoPoint,
    pub d: RistrettoPoint,
}

impl Ciphertext {
    /// Encryption of zero with no randomness.
    pub fn zero() -> Self {
        Self {
            c: RistrettoPoint::identity(),
            d: RistrettoPoint::identity(),
        }
    }

    pub fn encrypt_bit(key: &EncryptionKey, bit: bool, blinding: &Scalar) -> Self {
        let c = mul_base(blinding);
        let mut d = blinding * key.point();
        if bit {
            d += G;
        }
        Self { c, d }
    }
}

impl Add for Ciphertext {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            c: self.c + other.c,
            d: self.d + other.d,
        }
    }
}

impl AddAssign for Ciphertext {
    fn add_assign(&mut self, other: Self) {
        self.c += other.c;
        self.d += other.d;
    }
}

impl Write for Ciphertext {
    fn write(&self, writer: &mut impl BufMut) {
        write_point(&self.c, writer);
        write_point(&self.d, writer);
    }
}

impl Read for Ciphertext {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            c: read_point(reader)?,
            d: read_point(reader)?,
        })
    }
}

impl FixedSize for Ciphertext {
    const SIZE: usize = POINT_SIZE * 2;
}

/// A small integer encrypted as a one-hot vector of ciphertexts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedValue {
    slots: Vec<Ciphertext>,
}

impl EncryptedValue {
    pub fn from_slots(slots: Vec<Ciphertext>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[Ciphertext] {
        &self.slots
    }

    pub fn domain(&self) -> usize {
        self.slots.len()
    }

    pub fn encrypt<R: RngCore + CryptoRng>(
        rng: &mut R,
        key: &EncryptionKey,
        value: u8,
        domain: usize,
    ) -> Result<Self, CipherError> {
        Ok(Self::encrypt_with_openings(rng, key, value, domain)?.0)
    }

    /// Encrypt `value` and return the per-slot blinding factors alongside it.
    pub(crate) fn encrypt_with_openings<R: RngCore + CryptoRng>(
        rng: &mut R,
        key: &EncryptionKey,
        value: u8,
        domain: usize,
    ) -> Result<(Self, Vec<Scalar>), CipherError> {
        if domain == 0 || domain > MAX_SLOTS {
            return Err(CipherError::UnsupportedDomain(domain));
        }
        if value as usize >= domain {
            return Err(CipherError::PlaintextOutOfDomain { value, domain });
        }
        let openings: Vec<Scalar> = (0..domain).map(|_| random_scalar(rng)).collect();
        let slots = openings
            .iter()
            .enumerate()
            .map(|(slot, blinding)| Ciphertext::encrypt_bit(key, slot == value as usize, blinding))
            .collect();
        Ok((Self { slots }, openings))
    }

    /// Evaluate `lookup` homomorphically, producing a value over `domain` slots.
    ///
    /// Output slot `j` is the sum of every input slot `i` with `lookup(i) == j`,
    /// so exactly one output slot is hot whenever exactly one input slot is.
    pub fn map(&self, domain: usize, lookup: impl Fn(u8) -> u8) -> Result<Self, CipherError> {
        if domain == 0 || domain > MAX_SLOTS {
            return Err(CipherError::UnsupportedDomain(domain));
        }
        let mut slots = vec![Ciphertext::zero(); domain];
        for (input, ciphertext) in self.slots.iter().enumerate() {
            let output = lookup(input as u8) as usize;
            let slot = slots
                .get_mut(output)
                .ok_or(CipherError::LookupOutOfDomain {
                    slot: output,
                    domain,
                })?;
            *slot += *ciphertext;
        }
        Ok(Self { slots })
    }

    pub fn digest(&self) -> Digest {
        Sha256::hash(&self.encode())
    }
}

impl Write for EncryptedValue {
    fn write(&self, writer: &mut impl BufMut) {
        self.slots.write(writer);
    }
}

impl Read for EncryptedValue {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let slots = Vec::<Ciphertext>::read_cfg(reader, &(RangeCfg::from(1..=MAX_SLOTS), ()))?;
        Ok(Self { slots })
    }
}

impl EncodeSize for EncryptedValue {
    fn encode_size(&self) -> usize {
        self.slots.encode_size()
    }
}

/// Recover a plaintext from decrypted slot messages (`0·G` or `1·G`).
pub fn decode_one_hot(messages: &[RistrettoPoint]) -> Result<u8, CipherError> {
    if messages.is_empty() || messages.len() > MAX_SLOTS {
        return Err(CipherError::UnsupportedDomain(messages.len()));
    }
    let identity = RistrettoPoint::identity();
    let mut hot = None;
    for (slot, message) in messages.iter().enumerate() {
        if *message == identity {
            continue;
        }
        if *message != G || hot.is_some() {
            return Err(CipherError::NotOneHot);
        }
        hot = Some(slot as u8);
    }
    hot.ok_or(CipherError::NotOneHot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::DecodeExt;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_encrypt_decrypt() {
        let mut rng = StdRng::seed_from_u64(0);
        let secret = DecryptionKey::generate(&mut rng);
        let key = secret.public();
        for value in [0u8, 1, 9, 15] {
            let encrypted = EncryptedValue::encrypt(&mut rng, &key, value, 16).unwrap();
            assert_eq!(encrypted.domain(), 16);
            assert_eq!(secret.decrypt(&encrypted).unwrap(), value);
        }
    }

    #[test]
    fn test_encrypt_rejects_out_of_domain() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = DecryptionKey::generate(&mut rng).public();
        assert_eq!(
            EncryptedValue::encrypt(&mut rng, &key, 2, 2),
            Err(CipherError::PlaintextOutOfDomain {
                value: 2,
                domain: 2
            })
        );
        assert_eq!(
            EncryptedValue::encrypt(&mut rng, &key, 0, 0),
            Err(CipherError::UnsupportedDomain(0))
        );
    }

    #[test]
    fn test_map_evaluates_lookup() {
        let mut rng = StdRng::seed_from_u64(1);
        let secret = DecryptionKey::generate(&mut rng);
        let key = secret.public();
        let encrypted = EncryptedValue::encrypt(&mut rng, &key, 13, 16).unwrap();

        let halved = encrypted.map(8, |v| v / 2).unwrap();
        assert_eq!(halved.domain(), 8);
        assert_eq!(secret.decrypt(&halved).unwrap(), 6);

        assert_eq!(
            encrypted.map(4, |v| v),
            Err(CipherError::LookupOutOfDomain { slot: 4, domain: 4 })
        );
    }

    #[test]
    fn test_decode_one_hot_rejects_malformed() {
        let identity = RistrettoPoint::identity();
        assert_eq!(decode_one_hot(&[identity, G, identity]), Ok(1));
        assert_eq!(decode_one_hot(&[identity, identity]), Err(CipherError::NotOneHot));
        assert_eq!(decode_one_hot(&[G, G]), Err(CipherError::NotOneHot));
        assert_eq!(decode_one_hot(&[G + G]), Err(CipherError::NotOneHot));
    }

    #[test]
    fn test_codec_rejects_bad_points() {
        let mut rng = StdRng::seed_from_u64(2);
        let key = DecryptionKey::generate(&mut rng).public();
        let encrypted = EncryptedValue::encrypt(&mut rng, &key, 1, 2).unwrap();
        let mut encoded = encrypted.encode().to_vec();
        assert_eq!(EncryptedValue::decode(encoded.as_ref()).unwrap(), encrypted);

        // A set high bit is never a canonical field element.
        let last = encoded.len() - 1;
        encoded[last] = 0xff;
        assert!(EncryptedValue::decode(encoded.as_ref()).is_err());
    }
}
