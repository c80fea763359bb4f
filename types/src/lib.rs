//! Common types for veiled: the ledger data model, the one-hot encryption scheme
//! used for confidential coordinates, encrypted input proofs, threshold key
//! material and the user decryption grant.

pub mod cipher;
pub mod error;
pub mod execution;
pub mod grant;
pub mod handle;
pub mod input;
pub mod threshold;

pub use error::ProtocolError;
pub use execution::{bound_coordinate, MAP_SIZE, NAMESPACE};
pub use handle::{Address, CiphertextHandle, ValueType};
