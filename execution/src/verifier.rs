use commonware_cryptography::ed25519::PublicKey;
use tracing::debug;
use veiled_types::{
    cipher::{EncryptedValue, EncryptionKey},
    input::{self, EncryptedInputBundle, InputContext},
    Address, ProtocolError, ValueType,
};

/// Checks encrypted input bundles before the store accepts them.
#[derive(Clone, Debug)]
pub struct ProofVerifier {
    contract: Address,
    key: EncryptionKey,
}

impl ProofVerifier {
    pub fn new(contract: Address, key: EncryptionKey) -> Self {
        Self { contract, key }
    }

    /// Verify that `bundle` holds exactly `expected` values, all addressed to
    /// this contract and bound to `owner` at `nonce`. Returns the ciphertexts
    /// in handle order.
    pub fn verify(
        &self,
        owner: &PublicKey,
        nonce: u64,
        bundle: &EncryptedInputBundle,
        expected: &[ValueType],
    ) -> Result<Vec<EncryptedValue>, ProtocolError> {
        if bundle
            .handles
            .iter()
            .any(|handle| handle.contract != self.contract)
        {
            return Err(ProtocolError::InvalidTargetContract);
        }
        let types: Vec<ValueType> = bundle
            .handles
            .iter()
            .map(|handle| handle.value_type)
            .collect();
        if types != expected {
            debug!(?types, ?expected, "unexpected input shape");
            return Err(ProtocolError::InvalidProof);
        }
        let context = InputContext {
            contract: self.contract,
            owner,
            nonce,
        };
        input::verify(&self.key, &context, bundle).map_err(|err| {
            debug!(?err, "input proof rejected");
            ProtocolError::InvalidProof
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{create_account_keypair, create_committee};
    use rand::{rngs::StdRng, SeedableRng};

    const COORDINATES: [ValueType; 2] = [ValueType::Uint8, ValueType::Uint8];

    #[test]
    fn test_verify_accepts_well_formed_bundle() {
        let mut rng = StdRng::seed_from_u64(0);
        let (secret, committee, _) = create_committee(1, 1);
        let (_, owner) = create_account_keypair(1);
        let contract = Address::new([1; 20]);
        let verifier = ProofVerifier::new(contract, *committee.key());

        let context = InputContext {
            contract,
            owner: &owner,
            nonce: 0,
        };
        let bundle = input::prove(
            &mut rng,
            committee.key(),
            &context,
            &[(ValueType::Uint8, 12), (ValueType::Uint8, 200)],
        )
        .unwrap();
        let values = verifier.verify(&owner, 0, &bundle, &COORDINATES).unwrap();
        assert_eq!(secret.decrypt(&values[0]).unwrap(), 12);
        assert_eq!(secret.decrypt(&values[1]).unwrap(), 200);

        // Same bundle, wrong nonce.
        assert_eq!(
            verifier.verify(&owner, 1, &bundle, &COORDINATES),
            Err(ProtocolError::InvalidProof)
        );
    }

    #[test]
    fn test_verify_rejects_other_contract() {
        let mut rng = StdRng::seed_from_u64(1);
        let (_, committee, _) = create_committee(1, 1);
        let (_, owner) = create_account_keypair(1);
        let verifier = ProofVerifier::new(Address::new([1; 20]), *committee.key());

        let context = InputContext {
            contract: Address::new([2; 20]),
            owner: &owner,
            nonce: 0,
        };
        let bundle = input::prove(
            &mut rng,
            committee.key(),
            &context,
            &[(ValueType::Uint8, 1), (ValueType::Uint8, 2)],
        )
        .unwrap();
        assert_eq!(
            verifier.verify(&owner, 0, &bundle, &COORDINATES),
            Err(ProtocolError::InvalidTargetContract)
        );
    }

    #[test]
    fn test_verify_rejects_wrong_shape() {
        let mut rng = StdRng::seed_from_u64(2);
        let (_, committee, _) = create_committee(1, 1);
        let (_, owner) = create_account_keypair(1);
        let contract = Address::new([1; 20]);
        let verifier = ProofVerifier::new(contract, *committee.key());
        let context = InputContext {
            contract,
            owner: &owner,
            nonce: 0,
        };

        let single =
            input::prove(&mut rng, committee.key(), &context, &[(ValueType::Uint8, 1)]).unwrap();
        assert_eq!(
            verifier.verify(&owner, 0, &single, &COORDINATES),
            Err(ProtocolError::InvalidProof)
        );

        let narrow = input::prove(
            &mut rng,
            committee.key(),
            &context,
            &[(ValueType::Uint4, 1), (ValueType::Uint4, 2)],
        )
        .unwrap();
        assert_eq!(
            verifier.verify(&owner, 0, &narrow, &COORDINATES),
            Err(ProtocolError::InvalidProof)
        );
    }
}
