use super::*;
use veiled_types::ProtocolError;

fn reverted(participant: &PublicKey, error: ProtocolError) -> Vec<Event> {
    vec![Event::Reverted {
        participant: participant.clone(),
        error,
    }]
}

mod grid;
