//! Encrypted input bundles and the proof that binds them to their submitter.
//!
//! Each submitted value is a one-hot vector of ciphertexts. The proof shows,
//! without revealing the plaintext, that every slot encrypts `0` or `1` (a
//! disjunctive Chaum-Pedersen proof per slot) and that the slots sum to an
//! encryption of `1` (a discrete-log equality proof on the aggregate). All
//! challenges come from a transcript seeded with the target contract, the
//! submitter, the account nonce and the handle of each value, so a bundle can
//! only be consumed by the call it was built for.

use crate::{
    cipher::{
        mul_base, random_scalar, read_scalar, write_scalar, CipherError, Ciphertext,
        EncryptedValue, EncryptionKey, SCALAR_SIZE,
    },
    execution::NAMESPACE,
    handle::{Address, CiphertextHandle, Origin, ValueType},
};
use bytes::{Buf, BufMut};
use commonware_codec::{
    DecodeExt, Encode, EncodeSize, Error, FixedSize, RangeCfg, Read, ReadExt, ReadRangeExt, Write,
};
use commonware_cryptography::ed25519::PublicKey;
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT as G, ristretto::RistrettoPoint, scalar::Scalar,
    traits::VartimeMultiscalarMul,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};

/// Maximum number of values in a single bundle.
pub const MAX_INPUT_VALUES: usize = 8;

/// Maximum size of an encoded input proof.
pub const MAX_PROOF_BYTES: usize = 1 << 20;

const TRANSCRIPT_LABEL: &[u8] = b"veiled-input-v1";

/// Ciphertext handles plus the proof that they are well formed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedInputBundle {
    pub handles: Vec<CiphertextHandle>,
    pub proof: Vec<u8>,
}

impl Write for EncryptedInputBundle {
    fn write(&self, writer: &mut impl BufMut) {
        self.handles.write(writer);
        self.proof.write(writer);
    }
}

impl Read for EncryptedInputBundle {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let handles = Vec::<CiphertextHandle>::read_cfg(
            reader,
            &(RangeCfg::from(0..=MAX_INPUT_VALUES), ()),
        )?;
        let proof = Vec::<u8>::read_range(reader, 0..=MAX_PROOF_BYTES)?;
        Ok(Self { handles, proof })
    }
}

impl EncodeSize for EncryptedInputBundle {
    fn encode_size(&self) -> usize {
        self.handles.encode_size() + self.proof.encode_size()
    }
}

/// Who a bundle is for: the contract it targets, the participant submitting it
/// and the account nonce of the call that carries it.
#[derive(Clone, Copy, Debug)]
pub struct InputContext<'a> {
    pub contract: Address,
    pub owner: &'a PublicKey,
    pub nonce: u64,
}

impl InputContext<'_> {
    fn transcript(&self, values: usize) -> Transcript {
        let mut transcript = Transcript::new(TRANSCRIPT_LABEL);
        transcript.append_message(b"namespace", NAMESPACE);
        transcript.append_message(b"contract", self.contract.as_ref());
        transcript.append_message(b"owner", self.owner.as_ref());
        transcript.append_u64(b"nonce", self.nonce);
        transcript.append_u64(b"values", values as u64);
        transcript
    }

    fn handle(&self, index: u8, value_type: ValueType, value: &EncryptedValue) -> CiphertextHandle {
        CiphertextHandle::new(
            self.contract,
            value_type,
            Origin::Input {
                owner: self.owner,
                nonce: self.nonce,
                index,
            },
            value,
        )
    }
}

/// Proof that a ciphertext encrypts either `0` or `1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BitProof {
    c0: Scalar,
    z0: Scalar,
    c1: Scalar,
    z1: Scalar,
}

/// Proof that an aggregate ciphertext encrypts exactly `1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SumProof {
    c: Scalar,
    z: Scalar,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ValueProof {
    value_type: ValueType,
    ciphertext: EncryptedValue,
    bits: Vec<BitProof>,
    sum: SumProof,
}

/// Serialized form of [`EncryptedInputBundle::proof`].
#[derive(Clone, Debug, PartialEq, Eq)]
struct InputProof {
    values: Vec<ValueProof>,
}

fn append_point(transcript: &mut Transcript, label: &'static [u8], point: &RistrettoPoint) {
    transcript.append_message(label, point.compress().as_bytes());
}

fn challenge(transcript: &mut Transcript) -> Scalar {
    let mut bytes = [0u8; 64];
    transcript.challenge_bytes(b"challenge", &mut bytes);
    Scalar::from_bytes_mod_order_wide(&bytes)
}

/// Recompute `z·G - c·C` and `z·X - c·T`.
fn commitments(
    key: &EncryptionKey,
    c: &Scalar,
    z: &Scalar,
    base: &RistrettoPoint,
    target: &RistrettoPoint,
) -> (RistrettoPoint, RistrettoPoint) {
    let a = RistrettoPoint::vartime_double_scalar_mul_basepoint(&-c, base, z);
    let b = RistrettoPoint::vartime_multiscalar_mul([*z, -c], [*key.point(), *target]);
    (a, b)
}

fn slot_transcript(
    base: &Transcript,
    slot: usize,
    ciphertext: &Ciphertext,
) -> Transcript {
    let mut transcript = base.clone();
    transcript.append_u64(b"slot", slot as u64);
    append_point(&mut transcript, b"C", &ciphertext.c);
    append_point(&mut transcript, b"D", &ciphertext.d);
    transcript
}

fn prove_bit<R: RngCore + CryptoRng>(
    rng: &mut R,
    key: &EncryptionKey,
    transcript: &Transcript,
    slot: usize,
    ciphertext: &Ciphertext,
    bit: bool,
    blinding: &Scalar,
) -> BitProof {
    // Simulate the branch that is false, answer the true branch honestly.
    let fake_c = random_scalar(rng);
    let fake_z = random_scalar(rng);
    let fake_target = if bit { ciphertext.d } else { ciphertext.d - G };
    let (fake_a, fake_b) = commitments(key, &fake_c, &fake_z, &ciphertext.c, &fake_target);

    let k = random_scalar(rng);
    let real_a = mul_base(&k);
    let real_b = k * key.point();

    let (a0, b0, a1, b1) = if bit {
        (fake_a, fake_b, real_a, real_b)
    } else {
        (real_a, real_b, fake_a, fake_b)
    };
    let mut transcript = slot_transcript(transcript, slot, ciphertext);
    append_point(&mut transcript, b"A0", &a0);
    append_point(&mut transcript, b"B0", &b0);
    append_point(&mut transcript, b"A1", &a1);
    append_point(&mut transcript, b"B1", &b1);
    let c = challenge(&mut transcript);

    let real_c = c - fake_c;
    let real_z = k + real_c * blinding;
    if bit {
        BitProof {
            c0: fake_c,
            z0: fake_z,
            c1: real_c,
            z1: real_z,
        }
    } else {
        BitProof {
            c0: real_c,
            z0: real_z,
            c1: fake_c,
            z1: fake_z,
        }
    }
}

fn verify_bit(
    key: &EncryptionKey,
    transcript: &Transcript,
    slot: usize,
    ciphertext: &Ciphertext,
    proof: &BitProof,
) -> bool {
    let (a0, b0) = commitments(key, &proof.c0, &proof.z0, &ciphertext.c, &ciphertext.d);
    let (a1, b1) = commitments(key, &proof.c1, &proof.z1, &ciphertext.c, &(ciphertext.d - G));
    let mut transcript = slot_transcript(transcript, slot, ciphertext);
    append_point(&mut transcript, b"A0", &a0);
    append_point(&mut transcript, b"B0", &b0);
    append_point(&mut transcript, b"A1", &a1);
    append_point(&mut transcript, b"B1", &b1);
    challenge(&mut transcript) == proof.c0 + proof.c1
}

fn sum_of(value: &EncryptedValue) -> Ciphertext {
    value
        .slots()
        .iter()
        .fold(Ciphertext::zero(), |acc, slot| acc + *slot)
}

fn prove_sum<R: RngCore + CryptoRng>(
    rng: &mut R,
    key: &EncryptionKey,
    transcript: &Transcript,
    value: &EncryptedValue,
    openings: &[Scalar],
) -> SumProof {
    let total = sum_of(value);
    let blinding: Scalar = openings.iter().sum();
    let k = random_scalar(rng);
    let mut transcript = transcript.clone();
    append_point(&mut transcript, b"sum-C", &total.c);
    append_point(&mut transcript, b"sum-D", &total.d);
    append_point(&mut transcript, b"sum-A", &mul_base(&k));
    append_point(&mut transcript, b"sum-B", &(k * key.point()));
    let c = challenge(&mut transcript);
    SumProof {
        c,
        z: k + c * blinding,
    }
}

fn verify_sum(
    key: &EncryptionKey,
    transcript: &Transcript,
    value: &EncryptedValue,
    proof: &SumProof,
) -> bool {
    let total = sum_of(value);
    let (a, b) = commitments(key, &proof.c, &proof.z, &total.c, &(total.d - G));
    let mut transcript = transcript.clone();
    append_point(&mut transcript, b"sum-C", &total.c);
    append_point(&mut transcript, b"sum-D", &total.d);
    append_point(&mut transcript, b"sum-A", &a);
    append_point(&mut transcript, b"sum-B", &b);
    challenge(&mut transcript) == proof.c
}

fn value_transcript(base: &Transcript, handle: &CiphertextHandle) -> Transcript {
    let mut transcript = base.clone();
    transcript.append_message(b"handle", handle.id.as_ref());
    transcript.append_message(b"value-type", &[handle.value_type as u8]);
    transcript
}

/// Encrypt `values` under `key` and prove them for `context`.
pub fn prove<R: RngCore + CryptoRng>(
    rng: &mut R,
    key: &EncryptionKey,
    context: &InputContext<'_>,
    values: &[(ValueType, u8)],
) -> Result<EncryptedInputBundle, CipherError> {
    if values.len() > MAX_INPUT_VALUES {
        return Err(CipherError::TooManyValues(values.len()));
    }
    let base = context.transcript(values.len());
    let mut handles = Vec::with_capacity(values.len());
    let mut proofs = Vec::with_capacity(values.len());
    for (index, (value_type, value)) in values.iter().enumerate() {
        let (ciphertext, openings) =
            EncryptedValue::encrypt_with_openings(rng, key, *value, value_type.domain())?;
        let handle = context.handle(index as u8, *value_type, &ciphertext);
        let transcript = value_transcript(&base, &handle);
        let bits = ciphertext
            .slots()
            .iter()
            .zip(openings.iter())
            .enumerate()
            .map(|(slot, (slot_ciphertext, blinding))| {
                prove_bit(
                    rng,
                    key,
                    &transcript,
                    slot,
                    slot_ciphertext,
                    slot == *value as usize,
                    blinding,
                )
            })
            .collect();
        let sum = prove_sum(rng, key, &transcript, &ciphertext, &openings);
        handles.push(handle);
        proofs.push(ValueProof {
            value_type: *value_type,
            ciphertext,
            bits,
            sum,
        });
    }
    let proof = InputProof { values: proofs }.encode().to_vec();
    Ok(EncryptedInputBundle { handles, proof })
}

/// Why a bundle failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyError {
    /// The proof bytes do not decode.
    Malformed,
    /// Handle count or order disagrees with the proof.
    HandleMismatch,
    /// A handle id does not recompute from the context.
    UnboundHandle(usize),
    /// A slot is not an encryption of a bit.
    InvalidBit { value: usize, slot: usize },
    /// The slots of a value do not sum to one.
    InvalidSum(usize),
}

/// Check `bundle` against `context`, returning its ciphertexts in handle order.
pub fn verify(
    key: &EncryptionKey,
    context: &InputContext<'_>,
    bundle: &EncryptedInputBundle,
) -> Result<Vec<EncryptedValue>, VerifyError> {
    let proof = InputProof::decode(bundle.proof.as_slice()).map_err(|_| VerifyError::Malformed)?;
    if proof.values.len() != bundle.handles.len() {
        return Err(VerifyError::HandleMismatch);
    }
    let base = context.transcript(bundle.handles.len());
    let mut ciphertexts = Vec::with_capacity(proof.values.len());
    for (index, (handle, value)) in bundle.handles.iter().zip(proof.values).enumerate() {
        if handle.value_type != value.value_type {
            return Err(VerifyError::HandleMismatch);
        }
        let expected = context.handle(index as u8, value.value_type, &value.ciphertext);
        if expected != *handle {
            return Err(VerifyError::UnboundHandle(index));
        }
        let transcript = value_transcript(&base, handle);
        for (slot, (slot_ciphertext, bit)) in value
            .ciphertext
            .slots()
            .iter()
            .zip(value.bits.iter())
            .enumerate()
        {
            if !verify_bit(key, &transcript, slot, slot_ciphertext, bit) {
                return Err(VerifyError::InvalidBit { value: index, slot });
            }
        }
        if !verify_sum(key, &transcript, &value.ciphertext, &value.sum) {
            return Err(VerifyError::InvalidSum(index));
        }
        ciphertexts.push(value.ciphertext);
    }
    Ok(ciphertexts)
}

impl Write for BitProof {
    fn write(&self, writer: &mut impl BufMut) {
        write_scalar(&self.c0, writer);
        write_scalar(&self.z0, writer);
        write_scalar(&self.c1, writer);
        write_scalar(&self.z1, writer);
    }
}

impl Read for BitProof {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            c0: read_scalar(reader)?,
            z0: read_scalar(reader)?,
            c1: read_scalar(reader)?,
            z1: read_scalar(reader)?,
        })
    }
}

impl FixedSize for BitProof {
    const SIZE: usize = SCALAR_SIZE * 4;
}

impl Write for SumProof {
    fn write(&self, writer: &mut impl BufMut) {
        write_scalar(&self.c, writer);
        write_scalar(&self.z, writer);
    }
}

impl Read for SumProof {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            c: read_scalar(reader)?,
            z: read_scalar(reader)?,
        })
    }
}

impl FixedSize for SumProof {
    const SIZE: usize = SCALAR_SIZE * 2;
}

impl Write for ValueProof {
    fn write(&self, writer: &mut impl BufMut) {
        self.value_type.write(writer);
        self.ciphertext.write(writer);
        self.bits.write(writer);
        self.sum.write(writer);
    }
}

impl Read for ValueProof {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value_type = ValueType::read(reader)?;
        let ciphertext = EncryptedValue::read(reader)?;
        if ciphertext.domain() != value_type.domain() {
            return Err(Error::Invalid("ValueProof", "domain does not match value type"));
        }
        let domain = value_type.domain();
        let bits = Vec::<BitProof>::read_cfg(reader, &(RangeCfg::from(domain..=domain), ()))?;
        let sum = SumProof::read(reader)?;
        Ok(Self {
            value_type,
            ciphertext,
            bits,
            sum,
        })
    }
}

impl EncodeSize for ValueProof {
    fn encode_size(&self) -> usize {
        self.value_type.encode_size()
            + self.ciphertext.encode_size()
            + self.bits.encode_size()
            + self.sum.encode_size()
    }
}

impl Write for InputProof {
    fn write(&self, writer: &mut impl BufMut) {
        self.values.write(writer);
    }
}

impl Read for InputProof {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let values =
            Vec::<ValueProof>::read_cfg(reader, &(RangeCfg::from(0..=MAX_INPUT_VALUES), ()))?;
        Ok(Self { values })
    }
}

impl EncodeSize for InputProof {
    fn encode_size(&self) -> usize {
        self.values.encode_size()
    }
}
