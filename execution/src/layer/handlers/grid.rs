use super::super::*;
use super::reverted;
use crate::randomness::RANDOM_VALUE_TYPE;
use crate::state::participant;
use tracing::warn;
use veiled_types::{
    cipher::EncryptedValue,
    execution::{bound_coordinate, Coordinates, StoredCiphertext, COORDINATE_DOMAIN},
    handle::Origin,
    input::EncryptedInputBundle,
    CiphertextHandle, ProtocolError, ValueType,
};

/// Shape of the encrypted input `build` accepts: raw `(x, y)`.
const BUILD_INPUTS: [ValueType; 2] = [ValueType::Uint8, ValueType::Uint8];

impl<'a, S: State, R: RandomnessOracle> Layer<'a, S, R> {
    /// Apply the bounding function to `value` and stage the result, readable
    /// by `owner`.
    fn store_bounded(
        &mut self,
        owner: &PublicKey,
        parent: &CiphertextHandle,
        value: &EncryptedValue,
    ) -> Result<CiphertextHandle> {
        let bounded = value
            .map(COORDINATE_DOMAIN, bound_coordinate)
            .context("bound coordinate")?;
        let handle = CiphertextHandle::new(
            self.contract,
            parent.value_type,
            Origin::Bounded { parent: &parent.id },
            &bounded,
        );
        self.insert(
            Key::Ciphertext(handle.id),
            Value::Ciphertext(StoredCiphertext {
                handle,
                value: bounded,
                acl: vec![owner.clone()],
            }),
        );
        Ok(handle)
    }

    fn draw_coordinate(&mut self, owner: &PublicKey) -> Result<CiphertextHandle> {
        let value = self
            .randomness
            .random_u8(&self.key)
            .context("draw randomness")?;
        let raw = CiphertextHandle::new(self.contract, RANDOM_VALUE_TYPE, Origin::Random, &value);
        self.store_bounded(owner, &raw, &value)
    }

    pub(in crate::layer) async fn apply_join(&mut self, public: &PublicKey) -> Result<Vec<Event>> {
        let mut state = participant(self, public).await?;
        if state.joined() {
            warn!(participant = ?public, "join rejected: already joined");
            return Ok(reverted(public, ProtocolError::AlreadyJoined));
        }

        let position = Coordinates {
            x: self.draw_coordinate(public)?,
            y: self.draw_coordinate(public)?,
        };
        state.position = Some(position);
        self.insert(
            Key::Participant(public.clone()),
            Value::Participant(state),
        );
        debug!(participant = ?public, x = %position.x, y = %position.y, "participant joined");

        Ok(vec![Event::PlayerJoined {
            participant: public.clone(),
            position,
        }])
    }

    pub(in crate::layer) async fn apply_build(
        &mut self,
        public: &PublicKey,
        nonce: u64,
        inputs: &EncryptedInputBundle,
    ) -> Result<Vec<Event>> {
        let mut state = participant(self, public).await?;
        if !state.joined() {
            warn!(participant = ?public, "build rejected: not joined");
            return Ok(reverted(public, ProtocolError::NotJoined));
        }
        let values = match self.verifier.verify(public, nonce, inputs, &BUILD_INPUTS) {
            Ok(values) => values,
            Err(err) => {
                warn!(participant = ?public, ?err, "build rejected");
                return Ok(reverted(public, err));
            }
        };

        let mut pairs = inputs.handles.iter().zip(values.iter());
        let (Some((x_handle, x_value)), Some((y_handle, y_value))) = (pairs.next(), pairs.next())
        else {
            return Ok(reverted(public, ProtocolError::InvalidProof));
        };
        let building = Coordinates {
            x: self.store_bounded(public, x_handle, x_value)?,
            y: self.store_bounded(public, y_handle, y_value)?,
        };
        if let Some(previous) = state.building.replace(building) {
            self.remove(Key::Ciphertext(previous.x.id));
            self.remove(Key::Ciphertext(previous.y.id));
        }
        self.insert(
            Key::Participant(public.clone()),
            Value::Participant(state),
        );
        debug!(participant = ?public, x = %building.x, y = %building.y, "building placed");

        Ok(vec![Event::BuildingPlaced {
            participant: public.clone(),
            building,
        }])
    }
}
