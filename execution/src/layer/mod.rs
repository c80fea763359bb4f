use anyhow::{Context as _, Result};
use commonware_cryptography::ed25519::PublicKey;
use std::collections::BTreeMap;
use tracing::debug;
use veiled_types::{
    cipher::EncryptionKey,
    execution::{Event, Instruction, Key, Output, Transaction, Value},
    Address,
};

use crate::randomness::RandomnessOracle;
use crate::state::{load_account, validate_and_increment_nonce, PrepareError, State, Status};
use crate::verifier::ProofVerifier;

mod handlers;

/// Staged view of the ledger for one batch of transactions.
///
/// Writes go to `pending` and only reach the underlying state when the caller
/// applies [`Layer::commit`]. Handlers perform every check before their first
/// write, so a reverted instruction leaves nothing behind but the consumed
/// nonce.
pub struct Layer<'a, S: State, R: RandomnessOracle> {
    state: &'a S,
    pending: BTreeMap<Key, Status>,

    contract: Address,
    key: EncryptionKey,
    verifier: ProofVerifier,
    randomness: &'a mut R,
}

impl<'a, S: State, R: RandomnessOracle> Layer<'a, S, R> {
    pub fn new(state: &'a S, contract: Address, key: EncryptionKey, randomness: &'a mut R) -> Self {
        Self {
            state,
            pending: BTreeMap::new(),

            contract,
            key,
            verifier: ProofVerifier::new(contract, key),
            randomness,
        }
    }

    fn insert(&mut self, key: Key, value: Value) {
        self.pending.insert(key, Status::Update(value));
    }

    fn remove(&mut self, key: Key) {
        self.pending.insert(key, Status::Delete);
    }

    async fn prepare(&mut self, transaction: &Transaction) -> Result<(), PrepareError> {
        let mut account = load_account(self, &transaction.public)
            .await
            .map_err(PrepareError::State)?;
        validate_and_increment_nonce(&mut account, transaction.nonce)?;
        self.insert(
            Key::Account(transaction.public.clone()),
            Value::Account(account),
        );

        Ok(())
    }

    async fn apply(&mut self, transaction: &Transaction) -> Result<Vec<Event>> {
        let public = &transaction.public;
        match &transaction.instruction {
            Instruction::Join => self.apply_join(public).await,
            Instruction::Build { inputs } => {
                self.apply_build(public, transaction.nonce, inputs).await
            }
        }
    }

    pub async fn execute(
        &mut self,
        transactions: Vec<Transaction>,
    ) -> Result<(Vec<Output>, BTreeMap<PublicKey, u64>)> {
        let mut processed_nonces = BTreeMap::new();
        let mut outputs = Vec::new();

        for tx in transactions {
            match self.prepare(&tx).await {
                Ok(()) => {}
                Err(PrepareError::NonceMismatch { expected, got }) => {
                    debug!(
                        public = ?tx.public,
                        expected,
                        got,
                        "nonce mismatch; dropping transaction"
                    );
                    continue;
                }
                Err(PrepareError::State(err)) => {
                    return Err(err).context("state error during prepare");
                }
            }
            processed_nonces.insert(tx.public.clone(), tx.nonce.saturating_add(1));
            outputs.extend(self.apply(&tx).await?.into_iter().map(Output::Event));
            outputs.push(Output::Transaction(tx));
        }

        Ok((outputs, processed_nonces))
    }

    pub fn commit(self) -> Vec<(Key, Status)> {
        self.pending.into_iter().collect()
    }
}

impl<'a, S: State, R: RandomnessOracle> State for Layer<'a, S, R> {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(match self.pending.get(key) {
            Some(Status::Update(value)) => Some(value.clone()),
            Some(Status::Delete) => None,
            None => self.state.get(key).await?,
        })
    }

    async fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.pending.insert(key, Status::Update(value));
        Ok(())
    }

    async fn delete(&mut self, key: &Key) -> Result<()> {
        self.pending.insert(key.clone(), Status::Delete);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{create_account_keypair, create_committee};
    use crate::randomness::ChaChaOracle;
    use crate::state::{ciphertext, nonce, participant, Memory};
    use commonware_cryptography::ed25519::PrivateKey;
    use commonware_macros::test_traced;
    use commonware_runtime::deterministic::Runner;
    use commonware_runtime::Runner as _;
    use rand::{rngs::StdRng, SeedableRng};
    use veiled_types::{
        cipher::DecryptionKey,
        execution::Coordinates,
        input::{self, InputContext},
        CiphertextHandle, ProtocolError, ValueType, MAP_SIZE,
    };

    const CONTRACT: Address = Address::new([0xAB; 20]);

    #[allow(clippy::too_many_arguments)]
    fn build_tx(
        rng: &mut StdRng,
        key: &EncryptionKey,
        contract: Address,
        signer: &PrivateKey,
        public: &PublicKey,
        nonce: u64,
        x: u8,
        y: u8,
    ) -> Transaction {
        let context = InputContext {
            contract,
            owner: public,
            nonce,
        };
        let inputs = input::prove(
            rng,
            key,
            &context,
            &[(ValueType::Uint8, x), (ValueType::Uint8, y)],
        )
        .unwrap();
        Transaction::sign(signer, nonce, Instruction::Build { inputs })
    }

    async fn reveal<S: State>(state: &S, secret: &DecryptionKey, handle: &CiphertextHandle) -> u8 {
        let stored = ciphertext(state, &handle.id).await.unwrap().unwrap();
        secret.decrypt(&stored.value).unwrap()
    }

    async fn reveal_pair<S: State>(
        state: &S,
        secret: &DecryptionKey,
        coordinates: &Coordinates,
    ) -> (u8, u8) {
        (
            reveal(state, secret, &coordinates.x).await,
            reveal(state, secret, &coordinates.y).await,
        )
    }

    #[test]
    fn test_nonce_validation() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let state = Memory::default();
            let (_, committee, _) = create_committee(1, 1);
            let mut oracle = ChaChaOracle::new(b"test");
            let mut layer = Layer::new(&state, CONTRACT, *committee.key(), &mut oracle);

            let (signer, _) = create_account_keypair(1);

            // Wrong nonce should fail
            let tx = Transaction::sign(&signer, 1, Instruction::Join);
            assert!(layer.prepare(&tx).await.is_err());

            // Correct nonce should succeed
            let tx = Transaction::sign(&signer, 0, Instruction::Join);
            assert!(layer.prepare(&tx).await.is_ok());

            let _ = layer.commit();
        });
    }

    #[test_traced("INFO")]
    fn test_join_assigns_position_on_grid() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let mut state = Memory::default();
            let (secret, committee, _) = create_committee(1, 1);
            let mut oracle = ChaChaOracle::new(b"test");
            let (signer, public) = create_account_keypair(1);

            let mut layer = Layer::new(&state, CONTRACT, *committee.key(), &mut oracle);
            let tx = Transaction::sign(&signer, 0, Instruction::Join);
            let (outputs, nonces) = layer.execute(vec![tx]).await.unwrap();
            assert_eq!(nonces.get(&public), Some(&1));
            let position = match &outputs[0] {
                Output::Event(Event::PlayerJoined {
                    participant,
                    position,
                }) => {
                    assert_eq!(participant, &public);
                    *position
                }
                other => panic!("unexpected output: {other:?}"),
            };
            state.apply(layer.commit()).await.unwrap();

            let stored = participant(&state, &public).await.unwrap();
            assert!(stored.joined());
            assert!(!stored.built());
            assert_eq!(stored.position, Some(position));
            assert_eq!(position.x.contract, CONTRACT);
            assert_ne!(position.x.id, position.y.id);

            let (x, y) = reveal_pair(&state, &secret, &position).await;
            assert!((1..=MAP_SIZE).contains(&x));
            assert!((1..=MAP_SIZE).contains(&y));

            let acl = ciphertext(&state, &position.x.id).await.unwrap().unwrap().acl;
            assert_eq!(acl, vec![public]);
        });
    }

    #[test]
    fn test_second_join_reverts() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let mut state = Memory::default();
            let (_, committee, _) = create_committee(1, 1);
            let mut oracle = ChaChaOracle::new(b"test");
            let (signer, public) = create_account_keypair(1);

            let mut layer = Layer::new(&state, CONTRACT, *committee.key(), &mut oracle);
            layer
                .execute(vec![Transaction::sign(&signer, 0, Instruction::Join)])
                .await
                .unwrap();
            state.apply(layer.commit()).await.unwrap();
            let before = participant(&state, &public).await.unwrap();
            let entries = state.len();

            let mut layer = Layer::new(&state, CONTRACT, *committee.key(), &mut oracle);
            let (outputs, _) = layer
                .execute(vec![Transaction::sign(&signer, 1, Instruction::Join)])
                .await
                .unwrap();
            assert_eq!(
                outputs[0],
                Output::Event(Event::Reverted {
                    participant: public.clone(),
                    error: ProtocolError::AlreadyJoined,
                })
            );

            // Only the nonce moved.
            let changes = layer.commit();
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].0, Key::Account(public.clone()));
            state.apply(changes).await.unwrap();
            assert_eq!(participant(&state, &public).await.unwrap(), before);
            assert_eq!(state.len(), entries);
            assert_eq!(nonce(&state, &public).await.unwrap(), 2);
        });
    }

    #[test]
    fn test_build_requires_join() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let state = Memory::default();
            let mut rng = StdRng::seed_from_u64(0);
            let (_, committee, _) = create_committee(1, 1);
            let mut oracle = ChaChaOracle::new(b"test");
            let (signer, public) = create_account_keypair(1);

            let mut layer = Layer::new(&state, CONTRACT, *committee.key(), &mut oracle);
            let tx = build_tx(&mut rng, committee.key(), CONTRACT, &signer, &public, 0, 1, 1);
            let (outputs, _) = layer.execute(vec![tx]).await.unwrap();
            assert_eq!(
                outputs[0],
                Output::Event(Event::Reverted {
                    participant: public.clone(),
                    error: ProtocolError::NotJoined,
                })
            );
            assert!(!participant(&layer, &public).await.unwrap().built());
        });
    }

    #[test_traced("INFO")]
    fn test_build_bounds_coordinates() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let mut state = Memory::default();
            let mut rng = StdRng::seed_from_u64(0);
            let (secret, committee, _) = create_committee(1, 1);
            let key = *committee.key();
            let mut oracle = ChaChaOracle::new(b"test");
            let (signer, public) = create_account_keypair(1);

            let mut layer = Layer::new(&state, CONTRACT, key, &mut oracle);
            let join = Transaction::sign(&signer, 0, Instruction::Join);
            let build = build_tx(&mut rng, &key, CONTRACT, &signer, &public, 1, 12, 0);
            let (outputs, _) = layer.execute(vec![join, build]).await.unwrap();
            let building = outputs
                .iter()
                .find_map(|output| match output {
                    Output::Event(Event::BuildingPlaced { building, .. }) => Some(*building),
                    _ => None,
                })
                .expect("building placed");
            state.apply(layer.commit()).await.unwrap();

            let stored = participant(&state, &public).await.unwrap();
            assert!(stored.built());
            assert_eq!(stored.building, Some(building));
            assert_eq!(reveal_pair(&state, &secret, &building).await, (3, 1));
        });
    }

    #[test]
    fn test_rebuild_overwrites_building() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let mut state = Memory::default();
            let mut rng = StdRng::seed_from_u64(1);
            let (secret, committee, _) = create_committee(1, 1);
            let key = *committee.key();
            let mut oracle = ChaChaOracle::new(b"test");
            let (signer, public) = create_account_keypair(1);

            let mut layer = Layer::new(&state, CONTRACT, key, &mut oracle);
            let join = Transaction::sign(&signer, 0, Instruction::Join);
            let first = build_tx(&mut rng, &key, CONTRACT, &signer, &public, 1, 4, 5);
            layer.execute(vec![join, first]).await.unwrap();
            state.apply(layer.commit()).await.unwrap();
            let old = participant(&state, &public).await.unwrap().building.unwrap();

            let mut layer = Layer::new(&state, CONTRACT, key, &mut oracle);
            let second = build_tx(&mut rng, &key, CONTRACT, &signer, &public, 2, 27, 99);
            layer.execute(vec![second]).await.unwrap();
            state.apply(layer.commit()).await.unwrap();

            let stored = participant(&state, &public).await.unwrap();
            assert!(stored.built());
            let new = stored.building.unwrap();
            assert_ne!(new, old);
            assert_eq!(reveal_pair(&state, &secret, &new).await, (8, 10));

            // Superseded ciphertexts are pruned.
            assert!(ciphertext(&state, &old.x.id).await.unwrap().is_none());
            assert!(ciphertext(&state, &old.y.id).await.unwrap().is_none());
        });
    }

    #[test]
    fn test_build_rejects_bad_inputs() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let mut state = Memory::default();
            let mut rng = StdRng::seed_from_u64(2);
            let (_, committee, _) = create_committee(1, 1);
            let key = *committee.key();
            let mut oracle = ChaChaOracle::new(b"test");
            let (signer, public) = create_account_keypair(1);
            let (thief, thief_public) = create_account_keypair(2);

            let mut layer = Layer::new(&state, CONTRACT, key, &mut oracle);
            layer
                .execute(vec![
                    Transaction::sign(&signer, 0, Instruction::Join),
                    Transaction::sign(&thief, 0, Instruction::Join),
                ])
                .await
                .unwrap();
            state.apply(layer.commit()).await.unwrap();

            let other = Address::new([0xCD; 20]);
            let foreign = build_tx(&mut rng, &key, other, &signer, &public, 1, 1, 1);

            // A valid bundle lifted into another participant's transaction.
            let honest = build_tx(&mut rng, &key, CONTRACT, &signer, &public, 1, 1, 1);
            let Instruction::Build { inputs } = honest.instruction.clone() else {
                unreachable!()
            };
            let lifted = Transaction::sign(&thief, 1, Instruction::Build { inputs });

            let mut layer = Layer::new(&state, CONTRACT, key, &mut oracle);
            let (outputs, _) = layer.execute(vec![foreign, lifted]).await.unwrap();
            let errors: Vec<ProtocolError> = outputs
                .iter()
                .filter_map(|output| match output {
                    Output::Event(Event::Reverted { error, .. }) => Some(*error),
                    _ => None,
                })
                .collect();
            assert_eq!(
                errors,
                vec![
                    ProtocolError::InvalidTargetContract,
                    ProtocolError::InvalidProof
                ]
            );
            assert!(!participant(&layer, &public).await.unwrap().built());
            assert!(!participant(&layer, &thief_public).await.unwrap().built());
        });
    }

    #[test]
    fn test_execute_is_deterministic_for_identical_inputs() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let (_, committee, _) = create_committee(1, 1);
            let (signer, _) = create_account_keypair(1);
            let tx = Transaction::sign(&signer, 0, Instruction::Join);

            let run = |tx: Transaction| {
                let key = *committee.key();
                async move {
                    let state = Memory::default();
                    let mut oracle = ChaChaOracle::new(b"same seed");
                    let mut layer = Layer::new(&state, CONTRACT, key, &mut oracle);
                    let (outputs, _) = layer.execute(vec![tx]).await.unwrap();
                    (outputs, layer.commit())
                }
            };
            assert_eq!(run(tx.clone()).await, run(tx).await);
        });
    }
}
