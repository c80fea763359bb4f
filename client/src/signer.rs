use crate::Result;
use commonware_cryptography::{
    ed25519::{PrivateKey, PublicKey, Signature},
    Signer,
};
use std::future::Future;
use veiled_types::{
    execution::{Instruction, Transaction},
    grant::{grant_namespace, GrantMessage},
    NAMESPACE,
};

/// Signs user decryption grants on behalf of a participant.
///
/// Signing may suspend (for example while a hardware wallet asks for
/// confirmation).
pub trait GrantSigner {
    /// Key the decryption committee will check the signature against.
    fn signer(&self) -> PublicKey;

    fn sign_grant(&self, grant: &GrantMessage) -> impl Future<Output = Result<Signature>>;
}

/// A participant's full signing surface: grants and ledger transactions.
pub trait Wallet: GrantSigner {
    fn sign_transaction(
        &self,
        nonce: u64,
        instruction: Instruction,
    ) -> impl Future<Output = Result<Transaction>>;
}

impl GrantSigner for PrivateKey {
    fn signer(&self) -> PublicKey {
        self.public_key()
    }

    async fn sign_grant(&self, grant: &GrantMessage) -> Result<Signature> {
        Ok(self.sign(&grant_namespace(NAMESPACE), &grant.payload()))
    }
}

impl Wallet for PrivateKey {
    async fn sign_transaction(&self, nonce: u64, instruction: Instruction) -> Result<Transaction> {
        Ok(Transaction::sign(self, nonce, instruction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_runtime::{deterministic::Runner, Runner as _};
    use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
    use veiled_types::{
        grant::{DecryptionRequest, GRANT_DURATION_DAYS},
        Address,
    };

    #[test]
    fn test_grant_signature_verifies() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let private = PrivateKey::from_seed(3);
            let grant = GrantMessage::new(
                RISTRETTO_BASEPOINT_POINT,
                vec![Address::new([7; 20])],
                1_700_000_000,
            );
            assert_eq!(grant.duration_days, GRANT_DURATION_DAYS);
            let signature = private.sign_grant(&grant).await.unwrap();

            let mut request = DecryptionRequest {
                pairs: Vec::new(),
                grant,
                signer: private.signer(),
                signature,
            };
            assert!(request.verify_signature());

            // Any change to the signed message invalidates the signature.
            request.grant.start += 1;
            assert!(!request.verify_signature());
        });
    }

    #[test]
    fn test_transaction_signature_verifies() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let private = PrivateKey::from_seed(4);
            let tx = private.sign_transaction(9, Instruction::Join).await.unwrap();
            assert_eq!(tx.nonce, 9);
            assert_eq!(tx.public, private.signer());
            assert!(tx.verify());
        });
    }
}
