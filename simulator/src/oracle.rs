//! Threshold decryption committee serving user decryption requests.
//!
//! Each member holds a Shamir share of the network decryption key and answers
//! an authorized request with sealed partial decryptions. No member, and not
//! the committee as a whole, ever reconstructs the key.

use crate::Simulator;
use commonware_runtime::Clock;
use rand::{CryptoRng, Rng};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{debug, warn};
use veiled_client::{DecryptionService, Error, Ledger, Result};
use veiled_types::{
    cipher::{CipherError, DecryptionKey},
    execution::StoredCiphertext,
    grant::{
        unix_seconds, DecryptionRequest, DecryptionResponse, HandleShares, MAX_DECRYPT_HANDLES,
        MAX_GRANT_DURATION_DAYS,
    },
    threshold::{self, Committee, Share},
    ProtocolError,
};

/// How a member answers requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Behavior {
    #[default]
    Honest,
    /// Never answers.
    Offline,
    /// Answers with partials that fail verification.
    Faulty,
}

/// Generate a fresh network key and split it across `members`.
///
/// The key itself is dropped before returning.
pub fn deal<R: Rng + CryptoRng>(
    rng: &mut R,
    members: u32,
    threshold: Option<u32>,
) -> std::result::Result<(Committee, Vec<Share>), CipherError> {
    let secret = DecryptionKey::generate(rng);
    threshold::deal(rng, &secret, members, threshold)
}

/// Why a request was refused. Never shown to the requester.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Denial {
    Empty,
    TooManyHandles,
    NoContracts,
    InvalidDuration,
    InvalidSignature,
    Inactive,
    ContractNotAllowed,
    UnknownHandle,
    ContractMismatch,
    NotInAcl,
}

/// A decryption committee whose members run in process, reading ciphertexts
/// from `L`.
pub struct Oracle<E: Clock + Rng + CryptoRng + Clone, L: Ledger = Arc<Simulator>> {
    context: E,
    ledger: L,
    committee: Committee,
    members: Vec<Share>,
    behavior: Mutex<BTreeMap<u32, Behavior>>,
}

impl<E: Clock + Rng + CryptoRng + Clone, L: Ledger> Oracle<E, L> {
    pub fn new(context: E, ledger: L, committee: Committee, members: Vec<Share>) -> Self {
        Self {
            context,
            ledger,
            committee,
            members,
            behavior: Mutex::new(BTreeMap::new()),
        }
    }

    /// Change how member `index` (1-based) answers subsequent requests.
    pub fn set_behavior(&self, index: u32, behavior: Behavior) {
        self.behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, behavior);
    }

    fn behavior(&self, index: u32) -> Behavior {
        self.behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .copied()
            .unwrap_or_default()
    }

    /// Check `request` against the grant rules and the ledger, returning the
    /// ciphertexts it may decrypt in request order.
    ///
    /// The outer error is a ledger read failure, the inner one a refusal.
    async fn authorize(
        &self,
        request: &DecryptionRequest,
    ) -> Result<std::result::Result<Vec<StoredCiphertext>, Denial>> {
        Ok(match self.check(request) {
            Err(denial) => Err(denial),
            Ok(()) => self.lookup(request).await?,
        })
    }

    /// Checks that need nothing but the request and the clock.
    fn check(&self, request: &DecryptionRequest) -> std::result::Result<(), Denial> {
        let grant = &request.grant;
        if request.pairs.is_empty() {
            return Err(Denial::Empty);
        }
        if request.pairs.len() > MAX_DECRYPT_HANDLES {
            return Err(Denial::TooManyHandles);
        }
        if grant.contracts.is_empty() {
            return Err(Denial::NoContracts);
        }
        if grant.duration_days == 0 || grant.duration_days > MAX_GRANT_DURATION_DAYS {
            return Err(Denial::InvalidDuration);
        }
        if !request.verify_signature() {
            return Err(Denial::InvalidSignature);
        }
        if !grant.is_active(unix_seconds(self.context.current())) {
            return Err(Denial::Inactive);
        }
        Ok(())
    }

    /// Resolve every requested handle and check it against the grant and the
    /// ciphertext's ACL.
    async fn lookup(
        &self,
        request: &DecryptionRequest,
    ) -> Result<std::result::Result<Vec<StoredCiphertext>, Denial>> {
        let grant = &request.grant;
        let mut authorized = Vec::with_capacity(request.pairs.len());
        for pair in &request.pairs {
            if !grant.allows(&pair.contract) {
                return Ok(Err(Denial::ContractNotAllowed));
            }
            let Some(stored) = self.ledger.ciphertext(&pair.handle).await? else {
                return Ok(Err(Denial::UnknownHandle));
            };
            if stored.handle.contract != pair.contract {
                return Ok(Err(Denial::ContractMismatch));
            }
            if !stored.allows(&request.signer) {
                return Ok(Err(Denial::NotInAcl));
            }
            authorized.push(stored);
        }
        Ok(Ok(authorized))
    }
}

impl<E: Clock + Rng + CryptoRng + Clone, L: Ledger> DecryptionService for Oracle<E, L> {
    async fn committee(&self) -> Result<Committee> {
        Ok(self.committee.clone())
    }

    async fn user_decrypt(&self, request: DecryptionRequest) -> Result<DecryptionResponse> {
        let authorized = match self.authorize(&request).await {
            Ok(Ok(authorized)) => authorized,
            Err(err) => {
                warn!(signer = ?request.signer, %err, "ciphertext lookup failed");
                return Err(Error::Transport(err.to_string()));
            }
            Ok(Err(denial)) => {
                warn!(signer = ?request.signer, ?denial, "user decryption denied");
                return Err(Error::Protocol(ProtocolError::DecryptionUnauthorized));
            }
        };

        let mut rng = self.context.clone();
        let recipient = request.grant.public_key;
        let mut shares = Vec::with_capacity(authorized.len());
        for stored in &authorized {
            let handle = stored.handle.id;
            let mut partials = Vec::with_capacity(self.members.len());
            for member in &self.members {
                match self.behavior(member.index()) {
                    Behavior::Honest => {
                        partials.push(member.partial(&mut rng, &handle, &stored.value, &recipient));
                    }
                    Behavior::Faulty => {
                        // Sealed to a key nobody holds, so the proof will not check out.
                        let stray = DecryptionKey::generate(&mut rng).public();
                        partials.push(member.partial(
                            &mut rng,
                            &handle,
                            &stored.value,
                            stray.point(),
                        ));
                    }
                    Behavior::Offline => {}
                }
            }
            shares.push(HandleShares { handle, partials });
        }
        debug!(signer = ?request.signer, handles = shares.len(), "served user decryption");
        Ok(DecryptionResponse { shares })
    }
}
