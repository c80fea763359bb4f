//! Veiled execution layer.
//!
//! This crate contains the deterministic transaction execution logic (`Layer`) that
//! maintains the encrypted grid: participants join at a random hidden position and
//! place buildings at hidden coordinates of their choosing. Every coordinate the
//! ledger holds is a ciphertext under the decryption committee's key.
//!
//! ## Determinism requirements
//! - Do not use wall-clock time inside execution.
//! - Only draw randomness from the provided [`RandomnessOracle`].
//! - Avoid iteration order of hash-based collections influencing outputs.
//!
//! ## Atomicity
//! A transaction whose nonce matches always consumes it. Its instruction either
//! applies in full or emits a single `Reverted` event and leaves grid state untouched.
//!
//! The primary entrypoint is [`Layer`].
//!
//! ## Minimal execution pipeline (example)
//! ```rust,ignore
//! use veiled_execution::{ChaChaOracle, Layer, Memory, State};
//!
//! # async fn example(
//! #     state: &mut Memory,
//! #     contract: veiled_types::Address,
//! #     key: veiled_types::cipher::EncryptionKey,
//! #     transactions: Vec<veiled_types::execution::Transaction>,
//! # ) -> anyhow::Result<()> {
//! let mut oracle = ChaChaOracle::new(b"seed");
//! let mut layer = Layer::new(state, contract, key, &mut oracle);
//! let (outputs, _nonces) = layer.execute(transactions).await?;
//! let changes = layer.commit();
//! state.apply(changes).await?;
//! # let _ = outputs;
//! # Ok(())
//! # }
//! ```

pub mod randomness;
pub mod verifier;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

mod layer;

mod state;

pub use layer::Layer;
pub use randomness::{ChaChaOracle, RandomnessOracle, RANDOM_VALUE_TYPE};
#[cfg(any(test, feature = "mocks"))]
pub use state::Memory;
pub use state::{ciphertext, nonce, participant, PrepareError, State, Status};
pub use verifier::ProofVerifier;
