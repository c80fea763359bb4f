//! User decryption through a signed, time-bounded grant.
//!
//! The pipeline is linear:
//!
//! ```text
//! ephemeral keypair -> grant message -> participant signature -> request
//!     -> sealed partials -> unseal + verify -> Lagrange combine -> plaintext
//! ```
//!
//! The ephemeral secret never leaves this module; the committee seals every
//! partial decryption to its public half.

use crate::{DecryptionService, Error, GrantSigner, Ledger, Result};
use commonware_cryptography::sha256::Digest;
use commonware_runtime::Clock;
use rand::{CryptoRng, Rng};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use veiled_types::{
    cipher::{mul_base, random_scalar},
    grant::{unix_seconds, DecryptionRequest, GrantMessage, HandleContractPair},
    threshold::{self, Committee},
    Address, CiphertextHandle,
};

/// Builds grants for one participant and redeems them with the committee.
pub struct ClearanceGrantBuilder<'a, S: GrantSigner, L: Ledger, D: DecryptionService> {
    signer: &'a S,
    ledger: &'a L,
    service: &'a D,
    committee: &'a Committee,
}

impl<'a, S: GrantSigner, L: Ledger, D: DecryptionService> ClearanceGrantBuilder<'a, S, L, D> {
    pub fn new(signer: &'a S, ledger: &'a L, service: &'a D, committee: &'a Committee) -> Self {
        Self {
            signer,
            ledger,
            service,
            committee,
        }
    }

    /// Decrypt `handles` under a fresh grant for `contract`, valid from now
    /// for seven days.
    pub async fn decrypt<E: Clock + Rng + CryptoRng>(
        &self,
        context: &mut E,
        contract: Address,
        handles: &[CiphertextHandle],
    ) -> Result<BTreeMap<Digest, u8>> {
        if handles.is_empty() {
            return Err(Error::Precondition("no handles to decrypt"));
        }

        // Ephemeral keypair for this grant only
        let ephemeral = random_scalar(context);
        let grant = GrantMessage::new(
            mul_base(&ephemeral),
            vec![contract],
            unix_seconds(context.current()),
        );
        let signature = self.signer.sign_grant(&grant).await?;
        let request = DecryptionRequest {
            pairs: handles
                .iter()
                .map(|handle| HandleContractPair {
                    handle: handle.id,
                    contract: handle.contract,
                })
                .collect(),
            grant,
            signer: self.signer.signer(),
            signature,
        };
        debug!(handles = handles.len(), %contract, "requesting user decryption");
        let response = self.service.user_decrypt(request).await?;
        if response.shares.len() != handles.len() {
            return Err(Error::Malformed("response does not cover every handle"));
        }

        let mut plaintexts = BTreeMap::new();
        for (handle, shares) in handles.iter().zip(response.shares) {
            if shares.handle != handle.id {
                return Err(Error::Malformed("response out of request order"));
            }
            let stored = self
                .ledger
                .ciphertext(&handle.id)
                .await?
                .ok_or(Error::Malformed("response for unknown ciphertext"))?;

            let mut opened = BTreeMap::new();
            for partial in &shares.partials {
                match partial.open(self.committee, &ephemeral, &handle.id, &stored.value) {
                    Ok(points) => {
                        opened.insert(partial.index(), points);
                    }
                    Err(err) => {
                        warn!(member = partial.index(), handle = %handle, ?err, "discarding partial decryption");
                    }
                }
            }
            let plaintext = threshold::combine(self.committee, &stored.value, &opened)?;
            plaintexts.insert(handle.id, plaintext);
        }
        Ok(plaintexts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_cryptography::{
        ed25519::{PrivateKey, PublicKey},
        Signer,
    };
    use commonware_runtime::{deterministic::Runner, Runner as _};
    use rand::{rngs::StdRng, SeedableRng};
    use std::cell::RefCell;
    use veiled_execution::mocks::create_committee;
    use veiled_types::{
        cipher::EncryptedValue,
        execution::{Event, ParticipantState, StoredCiphertext, Transaction},
        grant::{DecryptionResponse, HandleShares},
        handle::Origin,
        threshold::Share,
        ProtocolError, ValueType,
    };

    const CONTRACT: Address = Address::new([0x42; 20]);

    /// Read-only ledger holding a fixed set of ciphertexts.
    #[derive(Default)]
    struct Ciphertexts(BTreeMap<Digest, StoredCiphertext>);

    impl Ledger for Ciphertexts {
        async fn contract(&self) -> Result<Address> {
            Ok(CONTRACT)
        }

        async fn map_size(&self) -> Result<u8> {
            Ok(veiled_types::MAP_SIZE)
        }

        async fn nonce(&self, _: &PublicKey) -> Result<u64> {
            Ok(0)
        }

        async fn participant(&self, _: &PublicKey) -> Result<ParticipantState> {
            Ok(ParticipantState::default())
        }

        async fn ciphertext(&self, handle: &Digest) -> Result<Option<StoredCiphertext>> {
            Ok(self.0.get(handle).cloned())
        }

        async fn submit(&self, _: Transaction) -> Result<Vec<Event>> {
            Err(Error::Transport("read-only ledger".to_string()))
        }
    }

    /// Committee members that answer every request without checking the grant.
    /// Members listed in `forged` seal to the wrong key.
    struct Members<'a> {
        ledger: &'a Ciphertexts,
        committee: Committee,
        shares: Vec<Share>,
        forged: Vec<u32>,
        rng: RefCell<StdRng>,
        requests: RefCell<Vec<DecryptionRequest>>,
    }

    impl DecryptionService for Members<'_> {
        async fn committee(&self) -> Result<Committee> {
            Ok(self.committee.clone())
        }

        async fn user_decrypt(&self, request: DecryptionRequest) -> Result<DecryptionResponse> {
            let mut rng = self.rng.borrow_mut();
            let mut shares = Vec::new();
            for pair in &request.pairs {
                let stored = self.ledger.0.get(&pair.handle).ok_or(Error::Protocol(
                    ProtocolError::DecryptionUnauthorized,
                ))?;
                let partials = self
                    .shares
                    .iter()
                    .map(|share| {
                        let recipient = if self.forged.contains(&share.index()) {
                            mul_base(&random_scalar(&mut *rng))
                        } else {
                            request.grant.public_key
                        };
                        share.partial(&mut *rng, &pair.handle, &stored.value, &recipient)
                    })
                    .collect();
                shares.push(HandleShares {
                    handle: pair.handle,
                    partials,
                });
            }
            self.requests.borrow_mut().push(request);
            Ok(DecryptionResponse { shares })
        }
    }

    fn store(
        ledger: &mut Ciphertexts,
        rng: &mut StdRng,
        committee: &Committee,
        owner: &PublicKey,
        value: u8,
    ) -> CiphertextHandle {
        let encrypted = EncryptedValue::encrypt(rng, committee.key(), value, 256).unwrap();
        let handle = CiphertextHandle::new(CONTRACT, ValueType::Uint8, Origin::Random, &encrypted);
        ledger.0.insert(
            handle.id,
            StoredCiphertext {
                handle,
                value: encrypted,
                acl: vec![owner.clone()],
            },
        );
        handle
    }

    fn members<'a>(
        ledger: &'a Ciphertexts,
        committee: &Committee,
        shares: &[Share],
        forged: Vec<u32>,
    ) -> Members<'a> {
        Members {
            ledger,
            committee: committee.clone(),
            shares: shares.to_vec(),
            forged,
            rng: RefCell::new(StdRng::seed_from_u64(99)),
            requests: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_decrypt_combines_threshold_partials() {
        let executor = Runner::default();
        executor.start(|mut context| async move {
            let mut rng = StdRng::seed_from_u64(0);
            let (_, committee, shares) = create_committee(4, 3);
            let signer = PrivateKey::from_seed(1);
            let mut ledger = Ciphertexts::default();
            let x = store(&mut ledger, &mut rng, &committee, &signer.public_key(), 7);
            let y = store(&mut ledger, &mut rng, &committee, &signer.public_key(), 200);

            let service = members(&ledger, &committee, &shares, Vec::new());
            let builder = ClearanceGrantBuilder::new(&signer, &ledger, &service, &committee);
            let plain = builder.decrypt(&mut context, CONTRACT, &[x, y]).await.unwrap();
            assert_eq!(plain.get(&x.id), Some(&7));
            assert_eq!(plain.get(&y.id), Some(&200));

            // The grant names exactly one contract and is signed by the participant.
            let requests = service.requests.borrow();
            let request = &requests[0];
            assert_eq!(request.grant.contracts, vec![CONTRACT]);
            assert_eq!(request.signer, signer.public_key());
            assert!(request.verify_signature());
            assert_eq!(request.pairs.len(), 2);
        });
    }

    #[test]
    fn test_repeated_decrypt_is_stable() {
        let executor = Runner::default();
        executor.start(|mut context| async move {
            let mut rng = StdRng::seed_from_u64(1);
            let (_, committee, shares) = create_committee(3, 2);
            let signer = PrivateKey::from_seed(1);
            let mut ledger = Ciphertexts::default();
            let handle = store(&mut ledger, &mut rng, &committee, &signer.public_key(), 42);

            let service = members(&ledger, &committee, &shares, Vec::new());
            let builder = ClearanceGrantBuilder::new(&signer, &ledger, &service, &committee);
            let first = builder.decrypt(&mut context, CONTRACT, &[handle]).await.unwrap();
            let second = builder.decrypt(&mut context, CONTRACT, &[handle]).await.unwrap();
            assert_eq!(first, second);

            // Every grant gets its own ephemeral key.
            let requests = service.requests.borrow();
            assert_ne!(requests[0].grant.public_key, requests[1].grant.public_key);
        });
    }

    #[test]
    fn test_forged_partials_are_discarded() {
        let executor = Runner::default();
        executor.start(|mut context| async move {
            let mut rng = StdRng::seed_from_u64(2);
            let (_, committee, shares) = create_committee(3, 2);
            let signer = PrivateKey::from_seed(1);
            let mut ledger = Ciphertexts::default();
            let handle = store(&mut ledger, &mut rng, &committee, &signer.public_key(), 9);

            // One bad member out of three still leaves a quorum.
            let service = members(&ledger, &committee, &shares, vec![2]);
            let builder = ClearanceGrantBuilder::new(&signer, &ledger, &service, &committee);
            let plain = builder.decrypt(&mut context, CONTRACT, &[handle]).await.unwrap();
            assert_eq!(plain.get(&handle.id), Some(&9));

            // Two bad members do not.
            let service = members(&ledger, &committee, &shares, vec![1, 3]);
            let builder = ClearanceGrantBuilder::new(&signer, &ledger, &service, &committee);
            assert!(matches!(
                builder.decrypt(&mut context, CONTRACT, &[handle]).await,
                Err(Error::Cipher(_))
            ));
        });
    }

    #[test]
    fn test_empty_request_rejected_locally() {
        let executor = Runner::default();
        executor.start(|mut context| async move {
            let (_, committee, shares) = create_committee(1, 1);
            let signer = PrivateKey::from_seed(1);
            let ledger = Ciphertexts::default();
            let service = members(&ledger, &committee, &shares, Vec::new());
            let builder = ClearanceGrantBuilder::new(&signer, &ledger, &service, &committee);
            assert!(matches!(
                builder.decrypt(&mut context, CONTRACT, &[]).await,
                Err(Error::Precondition(_))
            ));
            assert!(service.requests.borrow().is_empty());
        });
    }
}
