use commonware_cryptography::{
    ed25519::{PrivateKey, PublicKey},
    Signer,
};
use rand::{rngs::StdRng, SeedableRng};
use veiled_types::{
    cipher::DecryptionKey,
    threshold::{self, Committee, Share},
    Address,
};

/// Creates an account keypair for Ed25519 signatures used by participants
pub fn create_account_keypair(seed: u64) -> (PrivateKey, PublicKey) {
    let private = PrivateKey::from_seed(seed);
    let public = private.public_key();
    (private, public)
}

/// Creates a decryption committee of `members` with the given `threshold`
///
/// The dealer's secret is returned as well so tests can read ciphertexts
/// without running the threshold protocol.
pub fn create_committee(members: u32, threshold: u32) -> (DecryptionKey, Committee, Vec<Share>) {
    let mut rng = StdRng::seed_from_u64(u64::from(members) << 32 | u64::from(threshold));
    let secret = DecryptionKey::generate(&mut rng);
    let (committee, shares) = threshold::deal(&mut rng, &secret, members, Some(threshold))
        .expect("valid committee parameters");
    (secret, committee, shares)
}

/// Address the mock ledger deploys the grid contract at
pub fn create_contract() -> Address {
    let (_, deployer) = create_account_keypair(u64::MAX);
    Address::derive(&deployer, 0)
}
