//! Client SDK for veiled.
//!
//! The ledger and the decryption committee are reached through the [`Ledger`] and
//! [`DecryptionService`] ports; participants sign through a [`Wallet`]. On top of
//! those sit the encrypted input builder, the [`ClearanceGrantBuilder`] that turns
//! a signed grant into plaintexts, and the [`SyncController`] that sequences the
//! four user actions.

pub mod grant;
pub mod input;
pub mod ledger;
pub mod signer;
pub mod sync;

pub use grant::ClearanceGrantBuilder;
pub use input::EncryptedInput;
pub use ledger::{DecryptionService, Ledger};
pub use signer::{GrantSigner, Wallet};
pub use sync::{Action, Flags, Level, Notice, Outcome, Phase, SyncController};

use thiserror::Error;
use veiled_types::{cipher::CipherError, ProtocolError};

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{0} already pending")]
    ActionPending(Action),
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
    #[error("signer failed: {0}")]
    Signer(String),
    #[error("malformed response: {0}")]
    Malformed(&'static str),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
}

impl Error {
    /// The protocol-level classification of this error, if it has one.
    pub fn protocol(&self) -> Option<ProtocolError> {
        match self {
            Self::Protocol(err) => Some(*err),
            Self::Transport(_) => Some(ProtocolError::TransportFailure),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
