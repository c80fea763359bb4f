use crate::{
    cipher::EncryptedValue,
    error::ProtocolError,
    handle::CiphertextHandle,
    input::EncryptedInputBundle,
    threshold::MAX_COMMITTEE,
};
use bytes::{Buf, BufMut};
use commonware_codec::{Encode, EncodeSize, Error, RangeCfg, Read, ReadExt, Write};
use commonware_cryptography::{
    ed25519::{self, PublicKey},
    sha256::{Digest, Sha256},
    Digestible, Hasher, Signer, Verifier,
};
use commonware_utils::union;

pub const NAMESPACE: &[u8] = b"_VEILED";
pub const TRANSACTION_SUFFIX: &[u8] = b"_TX";

/// Side length of the grid. Coordinates live in `1..=MAP_SIZE`.
pub const MAP_SIZE: u8 = 10;

/// Slots in a bounded coordinate (slot `0` is never hot).
pub const COORDINATE_DOMAIN: usize = MAP_SIZE as usize + 1;

/// Map any byte onto the grid.
pub const fn bound_coordinate(value: u8) -> u8 {
    value % MAP_SIZE + 1
}

#[inline]
pub fn transaction_namespace(namespace: &[u8]) -> Vec<u8> {
    union(namespace, TRANSACTION_SUFFIX)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub instruction: Instruction,

    pub public: ed25519::PublicKey,
    pub signature: ed25519::Signature,
}

impl Transaction {
    fn payload(nonce: &u64, instruction: &Instruction) -> Vec<u8> {
        let mut payload = Vec::new();
        nonce.write(&mut payload);
        instruction.write(&mut payload);

        payload
    }

    pub fn sign(private: &ed25519::PrivateKey, nonce: u64, instruction: Instruction) -> Self {
        let signature = private.sign(
            &transaction_namespace(NAMESPACE),
            &Self::payload(&nonce, &instruction),
        );

        Self {
            nonce,
            instruction,
            public: private.public_key(),
            signature,
        }
    }

    pub fn verify(&self) -> bool {
        self.public.verify(
            &transaction_namespace(NAMESPACE),
            &Self::payload(&self.nonce, &self.instruction),
            &self.signature,
        )
    }
}

impl Write for Transaction {
    fn write(&self, writer: &mut impl BufMut) {
        self.nonce.write(writer);
        self.instruction.write(writer);
        self.public.write(writer);
        self.signature.write(writer);
    }
}

impl Read for Transaction {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let nonce = u64::read(reader)?;
        let instruction = Instruction::read(reader)?;
        let public = ed25519::PublicKey::read(reader)?;
        let signature = ed25519::Signature::read(reader)?;

        Ok(Self {
            nonce,
            instruction,
            public,
            signature,
        })
    }
}

impl EncodeSize for Transaction {
    fn encode_size(&self) -> usize {
        self.nonce.encode_size()
            + self.instruction.encode_size()
            + self.public.encode_size()
            + self.signature.encode_size()
    }
}

impl Digestible for Transaction {
    type Digest = Digest;

    fn digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(self.nonce.to_be_bytes().as_ref());
        hasher.update(self.instruction.encode().as_ref());
        hasher.update(self.public.as_ref());
        // We don't include the signature as part of the digest (any valid
        // signature will be valid for the transaction)
        hasher.finalize()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Claim a hidden position on the grid (tag 0).
    Join,
    /// Anchor a structure at the two encrypted coordinates in `inputs` (tag 1).
    Build { inputs: EncryptedInputBundle },
}

impl Write for Instruction {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Join => 0u8.write(writer),
            Self::Build { inputs } => {
                1u8.write(writer);
                inputs.write(writer);
            }
        }
    }
}

impl Read for Instruction {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Join),
            1 => Ok(Self::Build {
                inputs: EncryptedInputBundle::read(reader)?,
            }),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Instruction {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Join => 0,
            Self::Build { inputs } => inputs.encode_size(),
        }
    }
}

/// Minimal account structure for transaction nonce tracking.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct Account {
    pub nonce: u64,
}

impl Write for Account {
    fn write(&self, writer: &mut impl BufMut) {
        self.nonce.write(writer);
    }
}

impl Read for Account {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            nonce: u64::read(reader)?,
        })
    }
}

impl EncodeSize for Account {
    fn encode_size(&self) -> usize {
        self.nonce.encode_size()
    }
}

/// An encrypted `(x, y)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Coordinates {
    pub x: CiphertextHandle,
    pub y: CiphertextHandle,
}

impl Write for Coordinates {
    fn write(&self, writer: &mut impl BufMut) {
        self.x.write(writer);
        self.y.write(writer);
    }
}

impl Read for Coordinates {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            x: CiphertextHandle::read(reader)?,
            y: CiphertextHandle::read(reader)?,
        })
    }
}

impl EncodeSize for Coordinates {
    fn encode_size(&self) -> usize {
        self.x.encode_size() + self.y.encode_size()
    }
}

/// Per-participant grid state. The joined/built flags are derived from which
/// coordinates are present, so they can never disagree with them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParticipantState {
    pub position: Option<Coordinates>,
    pub building: Option<Coordinates>,
}

impl ParticipantState {
    pub fn joined(&self) -> bool {
        self.position.is_some()
    }

    pub fn built(&self) -> bool {
        self.building.is_some()
    }
}

impl Write for ParticipantState {
    fn write(&self, writer: &mut impl BufMut) {
        self.position.write(writer);
        self.building.write(writer);
    }
}

impl Read for ParticipantState {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            position: Option::<Coordinates>::read(reader)?,
            building: Option::<Coordinates>::read(reader)?,
        })
    }
}

impl EncodeSize for ParticipantState {
    fn encode_size(&self) -> usize {
        self.position.encode_size() + self.building.encode_size()
    }
}

/// A ciphertext held by the ledger along with who may request its decryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredCiphertext {
    pub handle: CiphertextHandle,
    pub value: EncryptedValue,
    pub acl: Vec<PublicKey>,
}

impl StoredCiphertext {
    pub fn allows(&self, participant: &PublicKey) -> bool {
        self.acl.contains(participant)
    }
}

impl Write for StoredCiphertext {
    fn write(&self, writer: &mut impl BufMut) {
        self.handle.write(writer);
        self.value.write(writer);
        self.acl.write(writer);
    }
}

impl Read for StoredCiphertext {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let handle = CiphertextHandle::read(reader)?;
        let value = EncryptedValue::read(reader)?;
        let acl = Vec::<PublicKey>::read_cfg(reader, &(RangeCfg::from(0..=MAX_COMMITTEE), ()))?;
        Ok(Self { handle, value, acl })
    }
}

impl EncodeSize for StoredCiphertext {
    fn encode_size(&self) -> usize {
        self.handle.encode_size() + self.value.encode_size() + self.acl.encode_size()
    }
}

#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Debug)]
pub enum Key {
    /// Account for nonce tracking (tag 0)
    Account(PublicKey),
    /// Grid state of a participant (tag 1)
    Participant(PublicKey),
    /// Ciphertext by handle id (tag 2)
    Ciphertext(Digest),
}

impl Write for Key {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Account(pk) => {
                0u8.write(writer);
                pk.write(writer);
            }
            Self::Participant(pk) => {
                1u8.write(writer);
                pk.write(writer);
            }
            Self::Ciphertext(id) => {
                2u8.write(writer);
                id.write(writer);
            }
        }
    }
}

impl Read for Key {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Account(PublicKey::read(reader)?)),
            1 => Ok(Self::Participant(PublicKey::read(reader)?)),
            2 => Ok(Self::Ciphertext(Digest::read(reader)?)),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Key {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Account(pk) | Self::Participant(pk) => pk.encode_size(),
            Self::Ciphertext(id) => id.encode_size(),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Value {
    Account(Account),
    Participant(ParticipantState),
    Ciphertext(StoredCiphertext),
}

impl Write for Value {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Account(account) => {
                0u8.write(writer);
                account.write(writer);
            }
            Self::Participant(state) => {
                1u8.write(writer);
                state.write(writer);
            }
            Self::Ciphertext(stored) => {
                2u8.write(writer);
                stored.write(writer);
            }
        }
    }
}

impl Read for Value {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Account(Account::read(reader)?)),
            1 => Ok(Self::Participant(ParticipantState::read(reader)?)),
            2 => Ok(Self::Ciphertext(StoredCiphertext::read(reader)?)),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Value {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Account(account) => account.encode_size(),
            Self::Participant(state) => state.encode_size(),
            Self::Ciphertext(stored) => stored.encode_size(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    PlayerJoined {
        participant: PublicKey,
        position: Coordinates,
    },
    BuildingPlaced {
        participant: PublicKey,
        building: Coordinates,
    },
    /// The instruction failed and none of its writes were applied.
    Reverted {
        participant: PublicKey,
        error: ProtocolError,
    },
}

impl Write for Event {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::PlayerJoined {
                participant,
                position,
            } => {
                0u8.write(writer);
                participant.write(writer);
                position.write(writer);
            }
            Self::BuildingPlaced {
                participant,
                building,
            } => {
                1u8.write(writer);
                participant.write(writer);
                building.write(writer);
            }
            Self::Reverted { participant, error } => {
                2u8.write(writer);
                participant.write(writer);
                error.write(writer);
            }
        }
    }
}

impl Read for Event {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::PlayerJoined {
                participant: PublicKey::read(reader)?,
                position: Coordinates::read(reader)?,
            }),
            1 => Ok(Self::BuildingPlaced {
                participant: PublicKey::read(reader)?,
                building: Coordinates::read(reader)?,
            }),
            2 => Ok(Self::Reverted {
                participant: PublicKey::read(reader)?,
                error: ProtocolError::read(reader)?,
            }),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Event {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::PlayerJoined {
                participant,
                position: coordinates,
            }
            | Self::BuildingPlaced {
                participant,
                building: coordinates,
            } => participant.encode_size() + coordinates.encode_size(),
            Self::Reverted { participant, error } => {
                participant.encode_size() + error.encode_size()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Event(Event),
    Transaction(Transaction),
}

impl Write for Output {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Event(event) => {
                0u8.write(writer);
                event.write(writer);
            }
            Self::Transaction(transaction) => {
                1u8.write(writer);
                transaction.write(writer);
            }
        }
    }
}

impl Read for Output {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Event(Event::read(reader)?)),
            1 => Ok(Self::Transaction(Transaction::read(reader)?)),
            _ => Err(Error::InvalidEnum(kind)),
        }
    }
}

impl EncodeSize for Output {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Event(event) => event.encode_size(),
            Self::Transaction(transaction) => transaction.encode_size(),
        }
    }
}
