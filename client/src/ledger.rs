//! Ports to the ledger and to the decryption committee.
//!
//! Futures returned here are not required to be `Send`: a client drives one
//! cooperative session at a time.

use crate::Result;
use commonware_cryptography::{ed25519::PublicKey, sha256::Digest};
use std::{future::Future, sync::Arc};
use veiled_types::{
    execution::{Coordinates, Event, ParticipantState, StoredCiphertext, Transaction},
    grant::{DecryptionRequest, DecryptionResponse},
    threshold::Committee,
    Address,
};

/// Read and write access to the contract holding the encrypted grid.
pub trait Ledger {
    /// Address of the grid contract.
    fn contract(&self) -> impl Future<Output = Result<Address>>;

    /// Side length of the grid.
    fn map_size(&self) -> impl Future<Output = Result<u8>>;

    /// Next nonce `participant` must sign with.
    fn nonce(&self, participant: &PublicKey) -> impl Future<Output = Result<u64>>;

    fn participant(&self, participant: &PublicKey)
        -> impl Future<Output = Result<ParticipantState>>;

    /// Stored ciphertext behind `handle`, if it still exists.
    fn ciphertext(&self, handle: &Digest) -> impl Future<Output = Result<Option<StoredCiphertext>>>;

    /// Submit a signed transaction and wait for the events it produced.
    ///
    /// A transaction the ledger drops (bad signature or stale nonce) is a
    /// transport failure.
    fn submit(&self, transaction: Transaction) -> impl Future<Output = Result<Vec<Event>>>;

    fn has_joined(&self, participant: &PublicKey) -> impl Future<Output = Result<bool>> {
        async move { Ok(self.participant(participant).await?.joined()) }
    }

    fn has_building(&self, participant: &PublicKey) -> impl Future<Output = Result<bool>> {
        async move { Ok(self.participant(participant).await?.built()) }
    }

    /// Position handles of `participant`, or `None` before it joined.
    fn player_position(
        &self,
        participant: &PublicKey,
    ) -> impl Future<Output = Result<Option<Coordinates>>> {
        async move { Ok(self.participant(participant).await?.position) }
    }

    /// Building handles of `participant`, or `None` before its first build.
    fn building_position(
        &self,
        participant: &PublicKey,
    ) -> impl Future<Output = Result<Option<Coordinates>>> {
        async move { Ok(self.participant(participant).await?.building) }
    }
}

/// The threshold committee that serves user decryption requests.
pub trait DecryptionService {
    /// Public key material of the committee: the network encryption key and
    /// every member's share commitment.
    fn committee(&self) -> impl Future<Output = Result<Committee>>;

    /// Ask every reachable member for sealed partial decryptions.
    fn user_decrypt(
        &self,
        request: DecryptionRequest,
    ) -> impl Future<Output = Result<DecryptionResponse>>;
}

impl<L: Ledger + ?Sized> Ledger for &L {
    fn contract(&self) -> impl Future<Output = Result<Address>> {
        (**self).contract()
    }

    fn map_size(&self) -> impl Future<Output = Result<u8>> {
        (**self).map_size()
    }

    fn nonce(&self, participant: &PublicKey) -> impl Future<Output = Result<u64>> {
        (**self).nonce(participant)
    }

    fn participant(
        &self,
        participant: &PublicKey,
    ) -> impl Future<Output = Result<ParticipantState>> {
        (**self).participant(participant)
    }

    fn ciphertext(&self, handle: &Digest) -> impl Future<Output = Result<Option<StoredCiphertext>>> {
        (**self).ciphertext(handle)
    }

    fn submit(&self, transaction: Transaction) -> impl Future<Output = Result<Vec<Event>>> {
        (**self).submit(transaction)
    }
}

impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    fn contract(&self) -> impl Future<Output = Result<Address>> {
        (**self).contract()
    }

    fn map_size(&self) -> impl Future<Output = Result<u8>> {
        (**self).map_size()
    }

    fn nonce(&self, participant: &PublicKey) -> impl Future<Output = Result<u64>> {
        (**self).nonce(participant)
    }

    fn participant(
        &self,
        participant: &PublicKey,
    ) -> impl Future<Output = Result<ParticipantState>> {
        (**self).participant(participant)
    }

    fn ciphertext(&self, handle: &Digest) -> impl Future<Output = Result<Option<StoredCiphertext>>> {
        (**self).ciphertext(handle)
    }

    fn submit(&self, transaction: Transaction) -> impl Future<Output = Result<Vec<Event>>> {
        (**self).submit(transaction)
    }
}

impl<D: DecryptionService + ?Sized> DecryptionService for &D {
    fn committee(&self) -> impl Future<Output = Result<Committee>> {
        (**self).committee()
    }

    fn user_decrypt(
        &self,
        request: DecryptionRequest,
    ) -> impl Future<Output = Result<DecryptionResponse>> {
        (**self).user_decrypt(request)
    }
}

impl<D: DecryptionService + ?Sized> DecryptionService for Arc<D> {
    fn committee(&self) -> impl Future<Output = Result<Committee>> {
        (**self).committee()
    }

    fn user_decrypt(
        &self,
        request: DecryptionRequest,
    ) -> impl Future<Output = Result<DecryptionResponse>> {
        (**self).user_decrypt(request)
    }
}
