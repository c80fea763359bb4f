use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, ReadExt, Write};
use thiserror::Error as ThisError;

/// Failures surfaced by the encrypted grid protocol.
///
/// Ledger-side variants travel inside `Event::Reverted`, so each variant has a
/// stable one-byte code.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolError {
    #[error("participant already joined")]
    AlreadyJoined,
    #[error("participant has not joined")]
    NotJoined,
    #[error("encrypted input proof rejected")]
    InvalidProof,
    #[error("encrypted input addressed to another contract")]
    InvalidTargetContract,
    #[error("decryption not authorized")]
    DecryptionUnauthorized,
    #[error("transport failure")]
    TransportFailure,
}

impl ProtocolError {
    pub const fn code(&self) -> u8 {
        match self {
            Self::AlreadyJoined => 1,
            Self::NotJoined => 2,
            Self::InvalidProof => 3,
            Self::InvalidTargetContract => 4,
            Self::DecryptionUnauthorized => 5,
            Self::TransportFailure => 6,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::AlreadyJoined),
            2 => Some(Self::NotJoined),
            3 => Some(Self::InvalidProof),
            4 => Some(Self::InvalidTargetContract),
            5 => Some(Self::DecryptionUnauthorized),
            6 => Some(Self::TransportFailure),
            _ => None,
        }
    }
}

impl Write for ProtocolError {
    fn write(&self, writer: &mut impl BufMut) {
        self.code().write(writer);
    }
}

impl Read for ProtocolError {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let code = u8::read(reader)?;
        Self::from_code(code).ok_or(Error::InvalidEnum(code))
    }
}

impl FixedSize for ProtocolError {
    const SIZE: usize = u8::SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    #[test]
    fn test_codes_are_stable() {
        let all = [
            ProtocolError::AlreadyJoined,
            ProtocolError::NotJoined,
            ProtocolError::InvalidProof,
            ProtocolError::InvalidTargetContract,
            ProtocolError::DecryptionUnauthorized,
            ProtocolError::TransportFailure,
        ];
        for (i, err) in all.iter().enumerate() {
            assert_eq!(err.code() as usize, i + 1);
            let encoded = err.encode();
            assert_eq!(encoded.len(), ProtocolError::SIZE);
            assert_eq!(ProtocolError::decode(encoded).unwrap(), *err);
        }
        assert!(ProtocolError::decode([0u8].as_ref()).is_err());
        assert!(ProtocolError::decode([7u8].as_ref()).is_err());
    }
}
