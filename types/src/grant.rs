//! User decryption grants and the wire types of the decryption protocol.

use crate::{
    cipher::{read_point, write_point, POINT_SIZE},
    execution::NAMESPACE,
    handle::Address,
    threshold::{SealedPartial, MAX_COMMITTEE},
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, RangeCfg, Read, ReadExt, Write};
use commonware_cryptography::{
    ed25519::{PublicKey, Signature},
    sha256::Digest,
    Verifier,
};
use commonware_utils::union;
use curve25519_dalek::ristretto::RistrettoPoint;
use std::time::SystemTime;

pub const GRANT_SUFFIX: &[u8] = b"_GRANT";

/// Validity window of every grant built by clients.
pub const GRANT_DURATION_DAYS: u32 = 7;

/// Longest window the decryption service will honor.
pub const MAX_GRANT_DURATION_DAYS: u32 = 365;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Maximum number of contracts a single grant may name.
pub const MAX_GRANT_CONTRACTS: usize = 16;

/// Maximum number of handles in one decryption request.
pub const MAX_DECRYPT_HANDLES: usize = 64;

#[inline]
pub fn grant_namespace(namespace: &[u8]) -> Vec<u8> {
    union(namespace, GRANT_SUFFIX)
}

/// Whole seconds since the unix epoch, clamped to zero for earlier times.
pub fn unix_seconds(now: SystemTime) -> u64 {
    match now.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    }
}

/// The structured message a participant signs to authorize user decryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantMessage {
    /// Ephemeral key the decryption service seals its response to.
    pub public_key: RistrettoPoint,
    /// Contracts whose ciphertexts may be decrypted.
    pub contracts: Vec<Address>,
    /// Unix timestamp (seconds) the grant becomes valid.
    pub start: u64,
    pub duration_days: u32,
}

impl GrantMessage {
    pub fn new(public_key: RistrettoPoint, contracts: Vec<Address>, start: u64) -> Self {
        Self {
            public_key,
            contracts,
            start,
            duration_days: GRANT_DURATION_DAYS,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.encode_size());
        self.write(&mut payload);
        payload
    }

    /// First second at which the grant is no longer valid.
    pub fn expires_at(&self) -> u64 {
        self.start
            .saturating_add(self.duration_days as u64 * SECONDS_PER_DAY)
    }

    /// Whether `now` falls in `[start, start + duration)`.
    pub fn is_active(&self, now: u64) -> bool {
        self.start <= now && now < self.expires_at()
    }

    pub fn allows(&self, contract: &Address) -> bool {
        self.contracts.contains(contract)
    }
}

impl Write for GrantMessage {
    fn write(&self, writer: &mut impl BufMut) {
        write_point(&self.public_key, writer);
        self.contracts.write(writer);
        self.start.write(writer);
        self.duration_days.write(writer);
    }
}

impl Read for GrantMessage {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let public_key = read_point(reader)?;
        let contracts =
            Vec::<Address>::read_cfg(reader, &(RangeCfg::from(0..=MAX_GRANT_CONTRACTS), ()))?;
        let start = u64::read(reader)?;
        let duration_days = u32::read(reader)?;
        Ok(Self {
            public_key,
            contracts,
            start,
            duration_days,
        })
    }
}

impl EncodeSize for GrantMessage {
    fn encode_size(&self) -> usize {
        POINT_SIZE + self.contracts.encode_size() + u64::SIZE + u32::SIZE
    }
}

/// A handle and the contract the caller claims owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleContractPair {
    pub handle: Digest,
    pub contract: Address,
}

impl Write for HandleContractPair {
    fn write(&self, writer: &mut impl BufMut) {
        self.handle.write(writer);
        self.contract.write(writer);
    }
}

impl Read for HandleContractPair {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            handle: Digest::read(reader)?,
            contract: Address::read(reader)?,
        })
    }
}

impl FixedSize for HandleContractPair {
    const SIZE: usize = Digest::SIZE + Address::SIZE;
}

/// A signed grant together with the handles it is being used for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionRequest {
    pub pairs: Vec<HandleContractPair>,
    pub grant: GrantMessage,
    pub signer: PublicKey,
    pub signature: Signature,
}

impl DecryptionRequest {
    pub fn verify_signature(&self) -> bool {
        self.signer.verify(
            &grant_namespace(NAMESPACE),
            &self.grant.payload(),
            &self.signature,
        )
    }
}

impl Write for DecryptionRequest {
    fn write(&self, writer: &mut impl BufMut) {
        self.pairs.write(writer);
        self.grant.write(writer);
        self.signer.write(writer);
        self.signature.write(writer);
    }
}

impl Read for DecryptionRequest {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let pairs = Vec::<HandleContractPair>::read_cfg(
            reader,
            &(RangeCfg::from(0..=MAX_DECRYPT_HANDLES), ()),
        )?;
        let grant = GrantMessage::read(reader)?;
        let signer = PublicKey::read(reader)?;
        let signature = Signature::read(reader)?;
        Ok(Self {
            pairs,
            grant,
            signer,
            signature,
        })
    }
}

impl EncodeSize for DecryptionRequest {
    fn encode_size(&self) -> usize {
        self.pairs.encode_size()
            + self.grant.encode_size()
            + self.signer.encode_size()
            + self.signature.encode_size()
    }
}

/// Sealed partial decryptions for one requested handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleShares {
    pub handle: Digest,
    pub partials: Vec<SealedPartial>,
}

impl Write for HandleShares {
    fn write(&self, writer: &mut impl BufMut) {
        self.handle.write(writer);
        self.partials.write(writer);
    }
}

impl Read for HandleShares {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let handle = Digest::read(reader)?;
        let partials =
            Vec::<SealedPartial>::read_cfg(reader, &(RangeCfg::from(0..=MAX_COMMITTEE), ()))?;
        Ok(Self { handle, partials })
    }
}

impl EncodeSize for HandleShares {
    fn encode_size(&self) -> usize {
        self.handle.encode_size() + self.partials.encode_size()
    }
}

/// Response of the decryption service, in request order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionResponse {
    pub shares: Vec<HandleShares>,
}

impl Write for DecryptionResponse {
    fn write(&self, writer: &mut impl BufMut) {
        self.shares.write(writer);
    }
}

impl Read for DecryptionResponse {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let shares =
            Vec::<HandleShares>::read_cfg(reader, &(RangeCfg::from(0..=MAX_DECRYPT_HANDLES), ()))?;
        Ok(Self { shares })
    }
}

impl EncodeSize for DecryptionResponse {
    fn encode_size(&self) -> usize {
        self.shares.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{mul_base, random_scalar};
    use commonware_codec::{DecodeExt, Encode};
    use commonware_cryptography::{ed25519::PrivateKey, sha256::Sha256, Hasher, Signer};
    use rand::{rngs::StdRng, SeedableRng};

    fn request(signer: &PrivateKey, grant: GrantMessage) -> DecryptionRequest {
        let signature = signer.sign(&grant_namespace(NAMESPACE), &grant.payload());
        DecryptionRequest {
            pairs: vec![HandleContractPair {
                handle: Sha256::hash(b"handle"),
                contract: Address::new([1; 20]),
            }],
            grant,
            signer: signer.public_key(),
            signature,
        }
    }

    #[test]
    fn test_window_is_half_open() {
        let mut rng = StdRng::seed_from_u64(0);
        let grant = GrantMessage::new(mul_base(&random_scalar(&mut rng)), vec![], 1_000);
        assert_eq!(grant.duration_days, GRANT_DURATION_DAYS);
        assert!(!grant.is_active(999));
        assert!(grant.is_active(1_000));
        let end = 1_000 + 7 * SECONDS_PER_DAY;
        assert_eq!(grant.expires_at(), end);
        assert!(grant.is_active(end - 1));
        assert!(!grant.is_active(end));
    }

    #[test]
    fn test_signature_covers_message() {
        let mut rng = StdRng::seed_from_u64(1);
        let signer = PrivateKey::from_seed(1);
        let contract = Address::new([1; 20]);
        let grant = GrantMessage::new(mul_base(&random_scalar(&mut rng)), vec![contract], 5);
        let signed = request(&signer, grant);
        assert!(signed.verify_signature());
        assert!(signed.grant.allows(&contract));
        assert!(!signed.grant.allows(&Address::new([2; 20])));

        // Widening the contract list after signing invalidates the grant.
        let mut widened = signed.clone();
        widened.grant.contracts.push(Address::new([2; 20]));
        assert!(!widened.verify_signature());

        // Claiming another signer invalidates it too.
        let mut impostor = signed.clone();
        impostor.signer = PrivateKey::from_seed(2).public_key();
        assert!(!impostor.verify_signature());

        let decoded = DecryptionRequest::decode(signed.encode()).unwrap();
        assert_eq!(decoded, signed);
    }
}
