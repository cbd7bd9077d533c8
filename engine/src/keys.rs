//! # Per-Wallet Key Derivation
//!
//! Maps `(master seed, derivation index)` to an Ed25519 keypair and its
//! base58 address, deterministically and totally: every `u64` index yields
//! a valid keypair, and the same inputs yield byte-identical outputs on
//! every platform, forever.
//!
//! ## Scheme v1
//!
//! ```text
//! ed25519_seed = SHA-256( "helio-derive-v1" || bip39_seed(64B) || index_le(8B) )
//! keypair      = Ed25519::from_seed(ed25519_seed)
//! address      = base58(public_key)
//! ```
//!
//! The domain tag keeps these keys disjoint from anything else ever derived
//! from the same mnemonic. Ed25519 accepts any 32-byte string as a seed, so
//! derivation cannot fail — there is no "unlucky index."

use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::DERIVATION_TAG_V1;
use crate::seed::MasterSeed;
use crate::types::Address;

/// An Ed25519 keypair derived for a single custodial wallet.
///
/// The signing key is the custody secret — it exists in memory only while
/// a caller needs it and is re-derivable at any time, so it is never
/// persisted. `Debug` prints the public half only.
pub struct UserKeypair {
    signing_key: SigningKey,
}

impl UserKeypair {
    /// Derives the wallet keypair for `index` under scheme v1.
    ///
    /// Total for all inputs. Never call this with an index that was not
    /// allocated by the ledger store — an unallocated index produces a
    /// perfectly valid wallet that nothing will ever poll.
    pub fn derive(seed: &MasterSeed, index: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DERIVATION_TAG_V1);
        hasher.update(seed.bytes());
        hasher.update(index.to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();

        Self {
            signing_key: SigningKey::from_bytes(&digest),
        }
    }

    /// The wallet's public on-chain address.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key_bytes())
    }

    /// Raw 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The underlying verifying key, for callers that talk to ed25519-dalek
    /// directly.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Exports the secret in the 64-byte `private || public` base58 format
    /// that the upstream chain's wallet tooling imports.
    ///
    /// **Handle with care.** This string is full control of the wallet.
    /// It goes into the one-time admin announcement and nowhere else.
    pub fn export_secret_b58(&self) -> String {
        let mut full = [0u8; 64];
        full[..32].copy_from_slice(&self.signing_key.to_bytes());
        full[32..].copy_from_slice(&self.public_key_bytes());
        bs58::encode(full).into_string()
    }
}

impl PartialEq for UserKeypair {
    /// Public-key equality. Comparing secret material byte-by-byte in
    /// non-constant time is a habit not worth forming.
    fn eq(&self, other: &Self) -> bool {
        self.public_key_bytes() == other.public_key_bytes()
    }
}

impl Eq for UserKeypair {}

impl fmt::Debug for UserKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserKeypair(pub={})", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn test_seed() -> MasterSeed {
        MasterSeed::from_phrase(TEST_PHRASE).unwrap()
    }

    #[test]
    fn derivation_is_deterministic() {
        let seed = test_seed();
        let a = UserKeypair::derive(&seed, 0);
        let b = UserKeypair::derive(&seed, 0);
        assert_eq!(a, b);
        assert_eq!(a.address(), b.address());
        assert_eq!(a.export_secret_b58(), b.export_secret_b58());
    }

    #[test]
    fn distinct_indices_yield_distinct_wallets() {
        let seed = test_seed();
        let addresses: Vec<_> = (0u64..64).map(|i| UserKeypair::derive(&seed, i).address()).collect();
        for (i, a) in addresses.iter().enumerate() {
            for b in &addresses[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn extreme_indices_derive_fine() {
        let seed = test_seed();
        // Derivation is total — no index can fail.
        let _ = UserKeypair::derive(&seed, u64::MAX);
        let _ = UserKeypair::derive(&seed, u64::MAX - 1);
        assert_ne!(
            UserKeypair::derive(&seed, u64::MAX).address(),
            UserKeypair::derive(&seed, u64::MAX - 1).address()
        );
    }

    #[test]
    fn address_is_valid_base58_of_32_bytes() {
        let seed = test_seed();
        let kp = UserKeypair::derive(&seed, 3);
        let addr = kp.address();
        let decoded = bs58::decode(addr.as_str()).into_vec().unwrap();
        assert_eq!(decoded.len(), 32);
        assert_eq!(decoded, kp.public_key_bytes());
    }

    #[test]
    fn exported_secret_embeds_public_key() {
        let seed = test_seed();
        let kp = UserKeypair::derive(&seed, 9);
        let decoded = bs58::decode(kp.export_secret_b58()).into_vec().unwrap();
        assert_eq!(decoded.len(), 64);
        assert_eq!(&decoded[32..], kp.public_key_bytes().as_slice());
    }

    #[test]
    fn debug_shows_only_public_half() {
        let seed = test_seed();
        let kp = UserKeypair::derive(&seed, 1);
        let rendered = format!("{:?}", kp);
        assert!(rendered.contains(kp.address().as_str()));
        assert!(!rendered.contains(&kp.export_secret_b58()));
    }

    #[test]
    fn different_seeds_diverge_at_same_index() {
        let a = MasterSeed::from_phrase(TEST_PHRASE).unwrap();
        let b = MasterSeed::from_phrase(
            "legal winner thank year wave sausage worth useful legal winner thank yellow",
        )
        .unwrap();
        assert_ne!(
            UserKeypair::derive(&a, 0).address(),
            UserKeypair::derive(&b, 0).address()
        );
    }
}
