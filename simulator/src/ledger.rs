use commonware_cryptography::{ed25519::PublicKey, sha256::Digest};
use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    lock::Mutex,
};
use tracing::{debug, info, warn};
use veiled_client::{Error, Ledger, Result};
use veiled_execution::{ciphertext, nonce, participant, ChaChaOracle, Layer, Memory, State};
use veiled_types::{
    cipher::EncryptionKey,
    execution::{Event, Output, ParticipantState, StoredCiphertext, Transaction},
    Address, MAP_SIZE,
};

struct Inner {
    state: Memory,
    randomness: ChaChaOracle,
    height: u64,
    log: Vec<Output>,
    subscribers: Vec<UnboundedSender<Event>>,
}

/// In-process ledger hosting the grid contract.
///
/// Every submission executes as its own block; the mutex serializes them so
/// each mutating call is one atomic transition.
pub struct Simulator {
    contract: Address,
    key: EncryptionKey,
    inner: Mutex<Inner>,
}

impl Simulator {
    pub fn new(contract: Address, key: EncryptionKey, seed: &[u8]) -> Self {
        Self {
            contract,
            key,
            inner: Mutex::new(Inner {
                state: Memory::default(),
                randomness: ChaChaOracle::new(seed),
                height: 0,
                log: Vec::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    /// Number of blocks executed so far.
    pub async fn height(&self) -> u64 {
        self.inner.lock().await.height
    }

    /// Every output (events and the transactions that produced them) in order.
    pub async fn log(&self) -> Vec<Output> {
        self.inner.lock().await.log.clone()
    }

    /// Receive every event emitted from now on.
    pub async fn subscribe(&self) -> UnboundedReceiver<Event> {
        let (sender, receiver) = unbounded();
        self.inner.lock().await.subscribers.push(sender);
        receiver
    }

    fn unavailable(err: anyhow::Error) -> Error {
        Error::Transport(format!("{err:#}"))
    }
}

impl Ledger for Simulator {
    async fn contract(&self) -> Result<Address> {
        Ok(self.contract)
    }

    async fn map_size(&self) -> Result<u8> {
        Ok(MAP_SIZE)
    }

    async fn nonce(&self, public: &PublicKey) -> Result<u64> {
        let inner = self.inner.lock().await;
        nonce(&inner.state, public).await.map_err(Self::unavailable)
    }

    async fn participant(&self, public: &PublicKey) -> Result<ParticipantState> {
        let inner = self.inner.lock().await;
        participant(&inner.state, public)
            .await
            .map_err(Self::unavailable)
    }

    async fn ciphertext(&self, handle: &Digest) -> Result<Option<StoredCiphertext>> {
        let inner = self.inner.lock().await;
        ciphertext(&inner.state, handle)
            .await
            .map_err(Self::unavailable)
    }

    async fn submit(&self, transaction: Transaction) -> Result<Vec<Event>> {
        if !transaction.verify() {
            warn!(public = ?transaction.public, "rejected transaction with invalid signature");
            return Err(Error::Transport("invalid transaction signature".to_string()));
        }

        let mut inner = self.inner.lock().await;
        let Inner {
            state,
            randomness,
            height,
            log,
            subscribers,
        } = &mut *inner;

        let mut layer = Layer::new(&*state, self.contract, self.key, randomness);
        let (outputs, _) = layer
            .execute(vec![transaction])
            .await
            .map_err(Self::unavailable)?;
        let changes = layer.commit();
        if outputs.is_empty() {
            return Err(Error::Transport("transaction dropped: stale nonce".to_string()));
        }
        state.apply(changes).await.map_err(Self::unavailable)?;
        *height += 1;

        let mut events = Vec::new();
        for output in outputs {
            if let Output::Event(event) = &output {
                match event {
                    Event::PlayerJoined { participant, .. } => {
                        info!(height = *height, ?participant, "player joined")
                    }
                    Event::BuildingPlaced { participant, .. } => {
                        info!(height = *height, ?participant, "building placed")
                    }
                    Event::Reverted { participant, error } => {
                        debug!(height = *height, ?participant, %error, "instruction reverted")
                    }
                }
                subscribers.retain(|subscriber| subscriber.unbounded_send(event.clone()).is_ok());
                events.push(event.clone());
            }
            log.push(output);
        }
        Ok(events)
    }
}
