//! Sequencing of the four user actions.
//!
//! Every action runs through the same phase machine:
//!
//! ```text
//! Idle -> Pending -> Done | Failed -> Idle
//! ```
//!
//! `Done` and `Failed` are passed through on settlement: the phase is back to
//! `Idle` as soon as the call returns, and the outcome is kept as the action's
//! [`Outcome`] until its next settlement.
//!
//! An action that is already `Pending` cannot be started again; the second
//! call fails with [`Error::ActionPending`] and leaves the first untouched.
//! Whatever the outcome, the participant's flags are re-read from the ledger
//! and a [`Notice`] is queued for display.

use crate::{
    ClearanceGrantBuilder, DecryptionService, EncryptedInput, Error, Ledger, Result, Wallet,
};
use commonware_cryptography::ed25519::PublicKey;
use commonware_runtime::Clock;
use rand::{CryptoRng, Rng};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{info, warn};
use veiled_types::{
    execution::{Coordinates, Event, Instruction},
    threshold::Committee,
    Address,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Join,
    Build,
    RevealPosition,
    RevealBuilding,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Join => "join",
            Self::Build => "build",
            Self::RevealPosition => "reveal position",
            Self::RevealBuilding => "reveal building",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Pending,
}

/// How the last settled call of an action ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

/// A user-visible outcome of an action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub action: Action,
    pub level: Level,
    pub message: String,
}

/// Participant flags as last read from the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub joined: bool,
    pub built: bool,
}

#[derive(Default)]
struct Session {
    phases: BTreeMap<Action, Phase>,
    outcomes: BTreeMap<Action, Outcome>,
    flags: Flags,
    position: Option<(u8, u8)>,
    building: Option<(u8, u8)>,
    notices: Vec<Notice>,
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks an action pending until settled. Dropping it unsettled (the caller
/// abandoned the future) returns the action to `Idle`.
struct Pending<'a> {
    session: &'a Mutex<Session>,
    action: Action,
    settled: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled {
            lock(self.session).phases.insert(self.action, Phase::Idle);
        }
    }
}

/// Drives one participant's session against the ledger and the committee.
pub struct SyncController<E, W, L, D> {
    context: E,
    wallet: W,
    ledger: L,
    service: D,

    contract: Address,
    committee: Committee,
    session: Mutex<Session>,
}

impl<E, W, L, D> SyncController<E, W, L, D>
where
    E: Clock + Rng + CryptoRng + Clone,
    W: Wallet,
    L: Ledger,
    D: DecryptionService,
{
    /// Resolve the contract and committee, then load the participant's flags.
    pub async fn connect(context: E, wallet: W, ledger: L, service: D) -> Result<Self> {
        let contract = ledger.contract().await?;
        let committee = service.committee().await?;
        let controller = Self {
            context,
            wallet,
            ledger,
            service,

            contract,
            committee,
            session: Mutex::new(Session::default()),
        };
        controller.refresh().await?;
        Ok(controller)
    }

    pub fn participant(&self) -> PublicKey {
        self.wallet.signer()
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn phase(&self, action: Action) -> Phase {
        lock(&self.session)
            .phases
            .get(&action)
            .copied()
            .unwrap_or_default()
    }

    /// Outcome of the last settled call of `action`, if any.
    pub fn last_outcome(&self, action: Action) -> Option<Outcome> {
        lock(&self.session).outcomes.get(&action).copied()
    }

    pub fn flags(&self) -> Flags {
        lock(&self.session).flags
    }

    /// Last revealed `(x, y)` of the participant's position.
    pub fn revealed_position(&self) -> Option<(u8, u8)> {
        lock(&self.session).position
    }

    /// Last revealed `(x, y)` of the participant's building.
    pub fn revealed_building(&self) -> Option<(u8, u8)> {
        lock(&self.session).building
    }

    /// Take every notice queued since the last call.
    pub fn drain_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut lock(&self.session).notices)
    }

    pub async fn map_size(&self) -> Result<u8> {
        self.ledger.map_size().await
    }

    /// Re-read the participant's flags from the ledger.
    pub async fn refresh(&self) -> Result<Flags> {
        let state = self.ledger.participant(&self.wallet.signer()).await?;
        let flags = Flags {
            joined: state.joined(),
            built: state.built(),
        };
        lock(&self.session).flags = flags;
        Ok(flags)
    }

    /// Claim a random hidden position on the grid.
    pub async fn join(&self) -> Result<Coordinates> {
        let pending = self.begin(Action::Join)?;
        let result = self.submit_join().await;
        if result.is_ok() {
            lock(&self.session).position = None;
        }
        self.settle(pending, &result, "joined the grid").await;
        result
    }

    /// Place (or move) the participant's building at the bounded image of
    /// `(x, y)`.
    pub async fn build(&self, x: u8, y: u8) -> Result<Coordinates> {
        let pending = self.begin(Action::Build)?;
        let result = self.submit_build(x, y).await;
        if result.is_ok() {
            lock(&self.session).building = None;
        }
        self.settle(pending, &result, "building placed").await;
        result
    }

    pub async fn reveal_position(&self) -> Result<(u8, u8)> {
        let pending = self.begin(Action::RevealPosition)?;
        let result = self.reveal(Action::RevealPosition).await;
        self.settle(pending, &result, "position revealed").await;
        result
    }

    pub async fn reveal_building(&self) -> Result<(u8, u8)> {
        let pending = self.begin(Action::RevealBuilding)?;
        let result = self.reveal(Action::RevealBuilding).await;
        self.settle(pending, &result, "building revealed").await;
        result
    }

    fn begin(&self, action: Action) -> Result<Pending<'_>> {
        let mut session = lock(&self.session);
        if session.phases.get(&action) == Some(&Phase::Pending) {
            warn!(%action, "rejected: already pending");
            session.notices.push(Notice {
                action,
                level: Level::Error,
                message: format!("{action} already pending"),
            });
            return Err(Error::ActionPending(action));
        }
        session.phases.insert(action, Phase::Pending);
        Ok(Pending {
            session: &self.session,
            action,
            settled: false,
        })
    }

    async fn settle<T>(&self, mut pending: Pending<'_>, result: &Result<T>, success: &str) {
        if let Err(err) = self.refresh().await {
            warn!(?err, "failed to refresh flags");
        }
        let action = pending.action;
        let (outcome, level, message) = match result {
            Ok(_) => {
                info!(%action, "action completed");
                (Outcome::Done, Level::Info, success.to_string())
            }
            Err(err) => {
                warn!(%action, %err, "action failed");
                (Outcome::Failed, Level::Error, err.to_string())
            }
        };
        let mut session = lock(&self.session);
        session.phases.insert(action, Phase::Idle);
        session.outcomes.insert(action, outcome);
        session.notices.push(Notice {
            action,
            level,
            message,
        });
        pending.settled = true;
    }

    async fn submit(&self, nonce: u64, instruction: Instruction) -> Result<Coordinates> {
        let transaction = self.wallet.sign_transaction(nonce, instruction).await?;
        let events = self.ledger.submit(transaction).await?;
        let participant = self.wallet.signer();
        for event in events {
            match event {
                Event::PlayerJoined {
                    participant: owner,
                    position: coordinates,
                }
                | Event::BuildingPlaced {
                    participant: owner,
                    building: coordinates,
                } if owner == participant => return Ok(coordinates),
                Event::Reverted {
                    participant: owner,
                    error,
                } if owner == participant => return Err(error.into()),
                _ => {}
            }
        }
        Err(Error::Malformed("transaction produced no outcome"))
    }

    async fn submit_join(&self) -> Result<Coordinates> {
        if self.contract == Address::default() {
            return Err(Error::Precondition("invalid contract address"));
        }
        let nonce = self.ledger.nonce(&self.wallet.signer()).await?;
        self.submit(nonce, Instruction::Join).await
    }

    async fn submit_build(&self, x: u8, y: u8) -> Result<Coordinates> {
        if !self.flags().joined {
            return Err(Error::Precondition("join before building"));
        }
        let participant = self.wallet.signer();
        let nonce = self.ledger.nonce(&participant).await?;
        let inputs = EncryptedInput::new(self.contract, &participant)
            .add8(x)
            .add8(y)
            .encrypt(&mut self.context.clone(), self.committee.key(), nonce)?;
        self.submit(nonce, Instruction::Build { inputs }).await
    }

    async fn reveal(&self, action: Action) -> Result<(u8, u8)> {
        let (allowed, cached) = {
            let session = lock(&self.session);
            match action {
                Action::RevealPosition => (session.flags.joined, session.position),
                _ => (session.flags.built, session.building),
            }
        };
        if !allowed {
            return Err(Error::Precondition(match action {
                Action::RevealPosition => "join before revealing a position",
                _ => "build before revealing a building",
            }));
        }
        if let Some(coordinates) = cached {
            return Ok(coordinates);
        }

        let participant = self.wallet.signer();
        let handles = match action {
            Action::RevealPosition => self.ledger.player_position(&participant).await?,
            _ => self.ledger.building_position(&participant).await?,
        }
        .ok_or(Error::Precondition("no coordinates on the ledger"))?;

        let builder =
            ClearanceGrantBuilder::new(&self.wallet, &self.ledger, &self.service, &self.committee);
        let plaintexts = builder
            .decrypt(
                &mut self.context.clone(),
                self.contract,
                &[handles.x, handles.y],
            )
            .await?;
        let x = plaintexts
            .get(&handles.x.id)
            .copied()
            .ok_or(Error::Malformed("missing x coordinate"))?;
        let y = plaintexts
            .get(&handles.y.id)
            .copied()
            .ok_or(Error::Malformed("missing y coordinate"))?;

        let mut session = lock(&self.session);
        match action {
            Action::RevealPosition => session.position = Some((x, y)),
            _ => session.building = Some((x, y)),
        }
        Ok((x, y))
    }
}
