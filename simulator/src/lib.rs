//! Local backend for veiled.
//!
//! [`Simulator`] hosts the grid contract in process and [`Oracle`] plays the
//! threshold decryption committee. Together they implement the client ports,
//! so a [`SyncController`] can run full sessions without a network.

mod config;
mod ledger;
mod oracle;

pub use config::{Config, ConfigError, ValidatedConfig};
pub use ledger::Simulator;
pub use oracle::{deal, Behavior, Oracle};

use commonware_cryptography::{
    ed25519::{PrivateKey, PublicKey},
    Signer,
};
use commonware_runtime::Clock;
use rand::{rngs::StdRng, CryptoRng, Rng, SeedableRng};
use std::sync::Arc;
use tracing::{info, warn};
use veiled_client::{Level, SyncController};
use veiled_types::{cipher::CipherError, Address};

/// A ledger and the committee that holds its decryption key.
pub struct Network<E: Clock + Rng + CryptoRng + Clone> {
    pub ledger: Arc<Simulator>,
    pub oracle: Arc<Oracle<E>>,
}

impl<E: Clock + Rng + CryptoRng + Clone> Network<E> {
    /// Deal a committee of `members` and deploy the grid contract, all derived
    /// from `seed`.
    pub fn new(
        context: E,
        seed: u64,
        members: u32,
        threshold: Option<u32>,
    ) -> Result<Self, CipherError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let (committee, shares) = deal(&mut rng, members, threshold)?;
        let deployer = PrivateKey::from_seed(seed).public_key();
        let contract = Address::derive(&deployer, 0);
        info!(%contract, members, threshold = committee.threshold(), "deployed grid contract");

        let ledger = Arc::new(Simulator::new(
            contract,
            *committee.key(),
            &seed.to_be_bytes(),
        ));
        let oracle = Arc::new(Oracle::new(context, ledger.clone(), committee, shares));
        Ok(Self { ledger, oracle })
    }

    /// Connect `wallet` to this network.
    pub async fn connect(
        &self,
        context: E,
        wallet: PrivateKey,
    ) -> veiled_client::Result<SyncController<E, PrivateKey, Arc<Simulator>, Arc<Oracle<E>>>> {
        SyncController::connect(context, wallet, self.ledger.clone(), self.oracle.clone()).await
    }
}

/// What one scripted session observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub participant: PublicKey,
    pub position: (u8, u8),
    /// Raw coordinates the participant asked to build at.
    pub target: (u8, u8),
    pub building: (u8, u8),
}

/// Join, reveal the position, build at `target` and reveal the building.
pub async fn run_session<E: Clock + Rng + CryptoRng + Clone>(
    context: E,
    network: &Network<E>,
    wallet: PrivateKey,
    target: (u8, u8),
) -> veiled_client::Result<SessionReport> {
    let controller = network.connect(context, wallet).await?;
    let result: veiled_client::Result<SessionReport> = async {
        controller.join().await?;
        let position = controller.reveal_position().await?;
        controller.build(target.0, target.1).await?;
        let building = controller.reveal_building().await?;
        Ok(SessionReport {
            participant: controller.participant(),
            position,
            target,
            building,
        })
    }
    .await;

    for notice in controller.drain_notices() {
        match notice.level {
            Level::Info => info!(action = %notice.action, "{}", notice.message),
            Level::Error => warn!(action = %notice.action, "{}", notice.message),
        }
    }
    result
}
