//! # Wallet Deriver
//!
//! First contact with a user allocates the next derivation index, persists
//! the wallet record, and only then hands any key material out. Every call
//! after that returns the byte-identical record — the deriver is the
//! idempotent front door to custody.
//!
//! The persisted form deliberately contains **no key bytes**: everything
//! secret is regenerable from `(master seed, derivation index)`, so the
//! store holds only the index and the public address. Losing the database
//! loses the ledger, not the keys; losing the mnemonic loses everything,
//! which is why it lives in the [seed vault](crate::seed) and nowhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::DERIVATION_SCHEME_VERSION;
use crate::keys::UserKeypair;
use crate::ledger::store::{LedgerStore, StoreResult};
use crate::seed::MasterSeed;
use crate::types::{Address, UserId};

// ---------------------------------------------------------------------------
// StoredWallet
// ---------------------------------------------------------------------------

/// The durable half of a wallet record: index and address, no key material.
///
/// Immutable once created; never deleted. Historical addresses must remain
/// monitorable for the life of the system, so the observer scans every
/// record ever persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredWallet {
    /// The user this wallet belongs to. One record per user, ever.
    pub user_id: UserId,

    /// Index into the derivation scheme. Strictly increasing, gap-free in
    /// assignment order across all users.
    pub derivation_index: u64,

    /// Derivation scheme version the index was assigned under.
    pub scheme_version: u16,

    /// The wallet's public on-chain address.
    pub address: Address,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl StoredWallet {
    /// Assembles a record at creation time. Only the store calls this,
    /// inside the index-allocation transaction.
    pub(crate) fn new(user_id: UserId, derivation_index: u64, address: Address) -> Self {
        Self {
            user_id,
            derivation_index,
            scheme_version: DERIVATION_SCHEME_VERSION,
            address,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// WalletRecord
// ---------------------------------------------------------------------------

/// A full wallet record: the persisted fields plus the regenerated keypair.
///
/// This is what [`WalletDeriver::derive`] returns. The keypair lives only
/// in this value — drop it and the secret is gone from memory until the
/// next derivation.
#[derive(Debug)]
pub struct WalletRecord {
    /// The durable record as persisted.
    pub stored: StoredWallet,
    /// The keypair regenerated from `(seed, derivation_index)`.
    keypair: UserKeypair,
}

impl WalletRecord {
    /// The user this wallet belongs to.
    pub fn user_id(&self) -> UserId {
        self.stored.user_id
    }

    /// The wallet's public address.
    pub fn address(&self) -> &Address {
        &self.stored.address
    }

    /// The derivation index assigned at first contact.
    pub fn derivation_index(&self) -> u64 {
        self.stored.derivation_index
    }

    /// Exports the secret in the chain tooling's 64-byte base58 format.
    /// Goes into the one-time admin announcement and nowhere else.
    pub fn export_secret_b58(&self) -> String {
        self.keypair.export_secret_b58()
    }
}

// ---------------------------------------------------------------------------
// WalletDeriver
// ---------------------------------------------------------------------------

/// Maps users to wallets, creating them on first contact.
///
/// Construction takes the seed explicitly — there is no ambient or global
/// seed access anywhere in the engine. Clone-cheap via the shared `Arc`s.
#[derive(Clone)]
pub struct WalletDeriver {
    seed: Arc<MasterSeed>,
    store: Arc<LedgerStore>,
}

impl WalletDeriver {
    /// Builds a deriver over a validated seed and an open store.
    pub fn new(seed: Arc<MasterSeed>, store: Arc<LedgerStore>) -> Self {
        Self { seed, store }
    }

    /// Returns the user's wallet, creating it if this is first contact.
    ///
    /// Index allocation is serialized through the store: the record and its
    /// zeroed ledger entry are durable before this returns, so two racing
    /// first contacts can never observe two different wallets. Derivation
    /// itself cannot fail — every allocated index yields a valid keypair.
    ///
    /// Returns `(record, created)`; `created` is true only for the call
    /// that allocated the index.
    pub fn derive(&self, user: UserId) -> StoreResult<(WalletRecord, bool)> {
        let seed = &self.seed;
        let (stored, created) = self
            .store
            .create_if_absent(user, |index| UserKeypair::derive(seed, index).address())?;

        let keypair = UserKeypair::derive(seed, stored.derivation_index);
        debug_assert_eq!(
            keypair.address(),
            stored.address,
            "derived address must match persisted record"
        );

        Ok((WalletRecord { stored, keypair }, created))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
