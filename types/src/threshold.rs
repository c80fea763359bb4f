//! Threshold decryption key material.
//!
//! A dealer splits the decryption scalar `x` into Shamir shares `x_i` and
//! publishes the commitments `X_i = x_i·G`. To decrypt a ciphertext slot
//! `(C, D)` each member returns `x_i·C` with a proof that it used the same
//! exponent as its commitment. Partials are sealed to a caller-chosen key so
//! only the holder of the matching secret can read them, and any `t` verified
//! partials interpolate `x·C` without `x` ever being reassembled.

use crate::{
    cipher::{
        decode_one_hot, mul_base, random_scalar, read_point, read_scalar, write_point,
        write_scalar, CipherError, Ciphertext, DecryptionKey, EncryptedValue, EncryptionKey,
        MAX_SLOTS, POINT_SIZE, SCALAR_SIZE,
    },
    execution::NAMESPACE,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, RangeCfg, Read, ReadExt, Write};
use commonware_cryptography::sha256::Digest;
use commonware_utils::quorum;
use curve25519_dalek::{
    ristretto::RistrettoPoint,
    scalar::Scalar,
    traits::{Identity, VartimeMultiscalarMul},
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;

/// Largest committee supported by the wire format.
pub const MAX_COMMITTEE: usize = 64;

const TRANSCRIPT_LABEL: &[u8] = b"veiled-partial-v1";

/// Public description of a decryption committee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    key: EncryptionKey,
    threshold: u32,
    commitments: Vec<RistrettoPoint>,
}

impl Committee {
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn size(&self) -> u32 {
        self.commitments.len() as u32
    }

    /// Commitment `x_i·G` of member `index` (1-based).
    pub fn commitment(&self, index: u32) -> Option<&RistrettoPoint> {
        index
            .checked_sub(1)
            .and_then(|i| self.commitments.get(i as usize))
    }
}

/// One member's share of the decryption scalar.
#[derive(Clone)]
pub struct Share {
    index: u32,
    secret: Scalar,
}

impl Share {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Produce this member's partial decryption of every slot of `value`,
    /// sealed to `recipient`.
    pub fn partial<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        handle: &Digest,
        value: &EncryptedValue,
        recipient: &RistrettoPoint,
    ) -> SealedPartial {
        let commitment = mul_base(&self.secret);
        let slots = value
            .slots()
            .iter()
            .enumerate()
            .map(|(slot, ciphertext)| {
                let partial = self.secret * ciphertext.c;
                let proof = DleqProof::prove(
                    rng,
                    &self.secret,
                    &transcript(handle, self.index, slot),
                    &commitment,
                    ciphertext,
                    &partial,
                );
                let k = random_scalar(rng);
                SealedSlot {
                    ephemeral: mul_base(&k),
                    sealed: partial + k * recipient,
                    proof,
                }
            })
            .collect();
        SealedPartial {
            index: self.index,
            slots,
        }
    }
}

/// Split `secret` into `members` shares, any `threshold` of which can decrypt.
///
/// When `threshold` is `None` the Byzantine quorum of `members` is used.
pub fn deal<R: RngCore + CryptoRng>(
    rng: &mut R,
    secret: &DecryptionKey,
    members: u32,
    threshold: Option<u32>,
) -> Result<(Committee, Vec<Share>), CipherError> {
    if members == 0 || members as usize > MAX_COMMITTEE {
        return Err(CipherError::InvalidThreshold {
            threshold: threshold.unwrap_or(0),
            members,
        });
    }
    let threshold = threshold.unwrap_or_else(|| quorum(members));
    if threshold == 0 || threshold > members {
        return Err(CipherError::InvalidThreshold { threshold, members });
    }

    let mut coefficients = Vec::with_capacity(threshold as usize);
    coefficients.push(*secret.scalar());
    for _ in 1..threshold {
        coefficients.push(random_scalar(rng));
    }

    let shares: Vec<Share> = (1..=members)
        .map(|index| {
            // Horner evaluation of the polynomial at `index`.
            let x = Scalar::from(index as u64);
            let secret = coefficients
                .iter()
                .rev()
                .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient);
            Share { index, secret }
        })
        .collect();
    let committee = Committee {
        key: secret.public(),
        threshold,
        commitments: shares.iter().map(|share| mul_base(&share.secret)).collect(),
    };
    Ok((committee, shares))
}

fn transcript(handle: &Digest, member: u32, slot: usize) -> Transcript {
    let mut transcript = Transcript::new(TRANSCRIPT_LABEL);
    transcript.append_message(b"namespace", NAMESPACE);
    transcript.append_message(b"handle", handle.as_ref());
    transcript.append_u64(b"member", member as u64);
    transcript.append_u64(b"slot", slot as u64);
    transcript
}

/// Proof that `log_G(X_i) == log_C(P)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DleqProof {
    c: Scalar,
    z: Scalar,
}

impl DleqProof {
    fn challenge(
        mut transcript: Transcript,
        commitment: &RistrettoPoint,
        ciphertext: &Ciphertext,
        partial: &RistrettoPoint,
        a: &RistrettoPoint,
        b: &RistrettoPoint,
    ) -> Scalar {
        transcript.append_message(b"X", commitment.compress().as_bytes());
        transcript.append_message(b"C", ciphertext.c.compress().as_bytes());
        transcript.append_message(b"P", partial.compress().as_bytes());
        transcript.append_message(b"A", a.compress().as_bytes());
        transcript.append_message(b"B", b.compress().as_bytes());
        let mut bytes = [0u8; 64];
        transcript.challenge_bytes(b"challenge", &mut bytes);
        Scalar::from_bytes_mod_order_wide(&bytes)
    }

    fn prove<R: RngCore + CryptoRng>(
        rng: &mut R,
        secret: &Scalar,
        transcript: &Transcript,
        commitment: &RistrettoPoint,
        ciphertext: &Ciphertext,
        partial: &RistrettoPoint,
    ) -> Self {
        let k = random_scalar(rng);
        let a = mul_base(&k);
        let b = k * ciphertext.c;
        let c = Self::challenge(transcript.clone(), commitment, ciphertext, partial, &a, &b);
        Self { c, z: k + c * secret }
    }

    fn verify(
        &self,
        transcript: &Transcript,
        commitment: &RistrettoPoint,
        ciphertext: &Ciphertext,
        partial: &RistrettoPoint,
    ) -> bool {
        let a = RistrettoPoint::vartime_double_scalar_mul_basepoint(&-self.c, commitment, &self.z);
        let b = RistrettoPoint::vartime_multiscalar_mul([self.z, -self.c], [ciphertext.c, *partial]);
        Self::challenge(transcript.clone(), commitment, ciphertext, partial, &a, &b) == self.c
    }
}

/// A partial decryption of one slot, ElGamal-sealed to the recipient:
/// `(k·G, x_i·C + k·E)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SealedSlot {
    ephemeral: RistrettoPoint,
    sealed: RistrettoPoint,
    proof: DleqProof,
}

/// All slot partials one member produced for one ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedPartial {
    index: u32,
    slots: Vec<SealedSlot>,
}

impl SealedPartial {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Unseal with `recipient_secret` and verify every slot against the
    /// member's commitment, yielding the raw partials `x_i·C`.
    pub fn open(
        &self,
        committee: &Committee,
        recipient_secret: &Scalar,
        handle: &Digest,
        value: &EncryptedValue,
    ) -> Result<Vec<RistrettoPoint>, CipherError> {
        let commitment = committee
            .commitment(self.index)
            .ok_or(CipherError::UnknownMember(self.index))?;
        if self.slots.len() != value.domain() {
            return Err(CipherError::SlotMismatch {
                expected: value.domain(),
                got: self.slots.len(),
            });
        }
        self.slots
            .iter()
            .zip(value.slots())
            .enumerate()
            .map(|(slot, (sealed, ciphertext))| {
                let partial = sealed.sealed - recipient_secret * sealed.ephemeral;
                let transcript = transcript(handle, self.index, slot);
                if !sealed
                    .proof
                    .verify(&transcript, commitment, ciphertext, &partial)
                {
                    return Err(CipherError::InvalidPartial(self.index));
                }
                Ok(partial)
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&mut self) {
        if let Some(slot) = self.slots.first_mut() {
            slot.sealed += curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
        }
    }
}

/// Lagrange coefficient at zero for `index` over the set `indices`.
fn lagrange(index: u32, indices: &[u32]) -> Scalar {
    let xi = Scalar::from(index as u64);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for &other in indices {
        if other == index {
            continue;
        }
        let xj = Scalar::from(other as u64);
        numerator *= xj;
        denominator *= xj - xi;
    }
    numerator * denominator.invert()
}

/// Combine opened partials (keyed by member index) into the plaintext of `value`.
///
/// Uses the `threshold` lowest member indices present in `partials`.
pub fn combine(
    committee: &Committee,
    value: &EncryptedValue,
    partials: &BTreeMap<u32, Vec<RistrettoPoint>>,
) -> Result<u8, CipherError> {
    let needed = committee.threshold as usize;
    if partials.len() < needed {
        return Err(CipherError::InsufficientPartials {
            needed,
            have: partials.len(),
        });
    }
    let chosen: Vec<(&u32, &Vec<RistrettoPoint>)> = partials.iter().take(needed).collect();
    let indices: Vec<u32> = chosen.iter().map(|(index, _)| **index).collect();
    let coefficients: Vec<Scalar> = indices
        .iter()
        .map(|index| lagrange(*index, &indices))
        .collect();

    let mut messages = Vec::with_capacity(value.domain());
    for (slot, ciphertext) in value.slots().iter().enumerate() {
        let mut shared = RistrettoPoint::identity();
        for ((_, points), coefficient) in chosen.iter().zip(coefficients.iter()) {
            let point = points.get(slot).ok_or(CipherError::SlotMismatch {
                expected: value.domain(),
                got: points.len(),
            })?;
            shared += coefficient * point;
        }
        messages.push(ciphertext.d - shared);
    }
    decode_one_hot(&messages)
}

impl Write for Committee {
    fn write(&self, writer: &mut impl BufMut) {
        self.key.write(writer);
        self.threshold.write(writer);
        (self.commitments.len() as u32).write(writer);
        for commitment in &self.commitments {
            write_point(commitment, writer);
        }
    }
}

impl Read for Committee {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let key = EncryptionKey::read(reader)?;
        let threshold = u32::read(reader)?;
        let members = u32::read(reader)?;
        if members == 0 || members as usize > MAX_COMMITTEE {
            return Err(Error::Invalid("Committee", "invalid member count"));
        }
        if threshold == 0 || threshold > members {
            return Err(Error::Invalid("Committee", "invalid threshold"));
        }
        let commitments = (0..members)
            .map(|_| read_point(reader))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            key,
            threshold,
            commitments,
        })
    }
}

impl EncodeSize for Committee {
    fn encode_size(&self) -> usize {
        EncryptionKey::SIZE + u32::SIZE + u32::SIZE + self.commitments.len() * POINT_SIZE
    }
}

impl Write for SealedSlot {
    fn write(&self, writer: &mut impl BufMut) {
        write_point(&self.ephemeral, writer);
        write_point(&self.sealed, writer);
        write_scalar(&self.proof.c, writer);
        write_scalar(&self.proof.z, writer);
    }
}

impl Read for SealedSlot {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            ephemeral: read_point(reader)?,
            sealed: read_point(reader)?,
            proof: DleqProof {
                c: read_scalar(reader)?,
                z: read_scalar(reader)?,
            },
        })
    }
}

impl FixedSize for SealedSlot {
    const SIZE: usize = POINT_SIZE * 2 + SCALAR_SIZE * 2;
}

impl Write for SealedPartial {
    fn write(&self, writer: &mut impl BufMut) {
        self.index.write(writer);
        self.slots.write(writer);
    }
}

impl Read for SealedPartial {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let index = u32::read(reader)?;
        let slots = Vec::<SealedSlot>::read_cfg(reader, &(RangeCfg::from(1..=MAX_SLOTS), ()))?;
        Ok(Self { index, slots })
    }
}

impl EncodeSize for SealedPartial {
    fn encode_size(&self) -> usize {
        self.index.encode_size() + self.slots.encode_size()
    }
}
