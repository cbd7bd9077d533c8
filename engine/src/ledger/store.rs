//! # Ledger Store — Durable Per-User State
//!
//! The persistence layer for wallet records and ledger entries, built on
//! sled's embedded key-value store. This is the single mutation point for
//! everything keyed by user: index allocation, deposit reconciliation, and
//! notification flags all commit here.
//!
//! ## Tree Layout
//!
//! | Tree      | Key                | Value                    |
//! |-----------|--------------------|--------------------------|
//! | `wallets` | `user_id` (8B BE)  | `bincode(StoredWallet)`  |
//! | `ledger`  | `user_id` (8B BE)  | `bincode(LedgerEntry)`   |
//! | `meta`    | key (UTF-8)        | value (bytes)            |
//!
//! ## Concurrency
//!
//! Every mutating method acquires the per-user lock first, so all writes to
//! a given user's state are linearizable with respect to each other and to
//! reads (an entry is always written as one key insert — no partial state
//! is ever visible). Operations on distinct users run fully in parallel.
//! First-contact creation additionally runs as a multi-tree sled
//! transaction so the wallet record, the zeroed ledger entry, and the
//! derivation-counter bump land atomically — that is what keeps allocated
//! indices gap-free and collision-free across crashes.
//!
//! ## Durability
//!
//! Every successful mutation flushes before returning. A crash after the
//! call returns cannot lose the update; a crash before the write is safe to
//! retry because reconciliation is comparison-based.

use dashmap::DashMap;
use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Transactional, Tree};
use std::path::Path;
use std::sync::Arc;

use super::entry::{DepositOutcome, LedgerEntry, ReconcileError};
use crate::types::{Address, Lamports, UserId};
use crate::wallet::StoredWallet;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A ledger operation referenced a user that was never created. The
    /// observer only scans persisted wallets, so hitting this means a bug,
    /// not a race.
    #[error("no ledger entry for user {0}")]
    MissingEntry(UserId),

    /// The reconciliation arithmetic itself failed — the entry was left
    /// exactly as it was.
    #[error("invariant violation: {0}")]
    Invariant(#[from] ReconcileError),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

/// Well-known key in the `meta` tree for the next unassigned derivation
/// index. Absent means no wallet has ever been created (next index is 0).
const META_NEXT_INDEX: &[u8] = b"next_derivation_index";

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Durable store for wallet records, ledger entries, and the derivation
/// counter.
///
/// # Thread Safety
///
/// sled trees support lock-free concurrent reads and serialized writes, and
/// the per-user lock registry layers user-granular mutual exclusion on top.
/// Share freely via `Arc<LedgerStore>`.
pub struct LedgerStore {
    /// Underlying sled database handle.
    db: sled::Db,
    /// Wallet records indexed by user id.
    wallets: Tree,
    /// Ledger entries indexed by user id.
    ledger: Tree,
    /// Arbitrary key-value metadata (derivation counter).
    meta: Tree,
    /// Per-user locks. Entries are created on first touch and never
    /// removed — one small allocation per user for the process lifetime.
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl LedgerStore {
    /// Opens or creates a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Creates a temporary in-memory store, cleaned up on drop.
    ///
    /// For tests — no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let wallets = db.open_tree("wallets")?;
        let ledger = db.open_tree("ledger")?;
        let meta = db.open_tree("meta")?;

        Ok(Self {
            db,
            wallets,
            ledger,
            meta,
            locks: DashMap::new(),
        })
    }

    /// Hands out this user's lock. All mutations below acquire it; callers
    /// never need to.
    fn user_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        self.locks
            .entry(user)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    // -- Wallet records -----------------------------------------------------

    /// Retrieves the persisted wallet record for a user, if one exists.
    pub fn get_wallet(&self, user: UserId) -> StoreResult<Option<StoredWallet>> {
        match self.wallets.get(user.to_key())? {
            Some(bytes) => {
                let record: StoredWallet = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Creates the wallet record and zeroed ledger entry for a first-contact
    /// user, or returns the existing record unchanged.
    ///
    /// `derive` maps the allocated derivation index to its address; it must
    /// be pure (the enclosing sled transaction may retry it on conflict).
    /// Returns `(record, created)` where `created` is true only for the
    /// call that actually allocated the index.
    pub fn create_if_absent<F>(&self, user: UserId, derive: F) -> StoreResult<(StoredWallet, bool)>
    where
        F: Fn(u64) -> Address,
    {
        let lock = self.user_lock(user);
        let _guard = lock.lock();

        if let Some(existing) = self.get_wallet(user)? {
            return Ok((existing, false));
        }

        let key = user.to_key();
        let record = (&self.wallets, &self.ledger, &self.meta)
            .transaction(|(wallets, ledger, meta)| {
                let index = match meta.get(META_NEXT_INDEX)? {
                    Some(raw) => decode_index(&raw).map_err(ConflictableTransactionError::Abort)?,
                    None => 0,
                };

                let record = StoredWallet::new(user, index, derive(index));
                let entry = LedgerEntry::new(user);

                let record_bytes = bincode::serialize(&record).map_err(|e| {
                    ConflictableTransactionError::Abort(StoreError::Serialization(e.to_string()))
                })?;
                let entry_bytes = bincode::serialize(&entry).map_err(|e| {
                    ConflictableTransactionError::Abort(StoreError::Serialization(e.to_string()))
                })?;

                wallets.insert(key.as_slice(), record_bytes)?;
                ledger.insert(key.as_slice(), entry_bytes)?;
                meta.insert(META_NEXT_INDEX, (index + 1).to_be_bytes().to_vec())?;

                Ok(record)
            })
            .map_err(|e| match e {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(err) => StoreError::Sled(err),
            })?;

        self.db.flush()?;
        tracing::info!(
            user = %user,
            index = record.derivation_index,
            address = %record.address,
            "wallet record created"
        );
        Ok((record, true))
    }

    /// Snapshot of every persisted wallet record, for the observer's scan.
    ///
    /// Wallets created mid-scan are simply picked up next time — the
    /// snapshot is taken once per cycle, not kept live.
    pub fn wallets(&self) -> StoreResult<Vec<StoredWallet>> {
        let mut out = Vec::with_capacity(self.wallets.len());
        for item in self.wallets.iter() {
            let (_key, bytes) = item?;
            let record: StoredWallet = bincode::deserialize(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            out.push(record);
        }
        Ok(out)
    }

    /// Number of wallets ever created.
    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// The next derivation index that would be assigned.
    pub fn next_derivation_index(&self) -> StoreResult<u64> {
        match self.meta.get(META_NEXT_INDEX)? {
            Some(raw) => decode_index(&raw),
            None => Ok(0),
        }
    }

    // -- Ledger entries -----------------------------------------------------

    /// Retrieves the ledger entry for a user, if one exists.
    ///
    /// Reads are linearizable with respect to mutations: an entry is always
    /// committed as a single key insert, so this never observes a value
    /// mid-update.
    pub fn get_entry(&self, user: UserId) -> StoreResult<Option<LedgerEntry>> {
        match self.ledger.get(user.to_key())? {
            Some(bytes) => {
                let entry: LedgerEntry = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Reconciles a freshly observed on-chain balance into the user's entry.
    ///
    /// The compare-and-update runs entirely inside the per-user lock against
    /// the *stored* baseline — the caller's network fetch happens outside
    /// the lock, and a stale observation simply reconciles to `NoChange` or
    /// `Decreased`. All-or-nothing: on any failure the entry is left exactly
    /// as it was.
    pub fn apply_deposit(
        &self,
        user: UserId,
        observed: Lamports,
    ) -> StoreResult<DepositOutcome> {
        let lock = self.user_lock(user);
        let _guard = lock.lock();

        let entry = self
            .get_entry(user)?
            .ok_or(StoreError::MissingEntry(user))?;

        let (next, outcome) = entry.reconcile(observed)?;
        if outcome != DepositOutcome::NoChange {
            self.put_entry(&next)?;
        }
        Ok(outcome)
    }

    /// Marks the one-time wallet announcement as delivered.
    ///
    /// Returns `true` only for the call that performed the false→true
    /// transition; every later call is a no-op returning `false`.
    pub fn mark_wallet_notified(&self, user: UserId) -> StoreResult<bool> {
        let lock = self.user_lock(user);
        let _guard = lock.lock();

        let mut entry = self
            .get_entry(user)?
            .ok_or(StoreError::MissingEntry(user))?;
        if entry.wallet_notified {
            return Ok(false);
        }
        entry.wallet_notified = true;
        self.put_entry(&entry)?;
        Ok(true)
    }

    /// Records that deposit notifications have been delivered up to
    /// `through` cumulative lamports.
    ///
    /// Monotonic and clamped to the committed cumulative total, so a stale
    /// or overshooting dispatcher can never mark future deposits as already
    /// announced.
    pub fn mark_deposits_notified(&self, user: UserId, through: Lamports) -> StoreResult<()> {
        let lock = self.user_lock(user);
        let _guard = lock.lock();

        let mut entry = self
            .get_entry(user)?
            .ok_or(StoreError::MissingEntry(user))?;
        let clamped = through.min(entry.cumulative_deposits);
        if clamped <= entry.last_deposit_notified_amount {
            return Ok(());
        }
        entry.last_deposit_notified_amount = clamped;
        self.put_entry(&entry)?;
        Ok(())
    }

    /// Snapshot of every ledger entry, for the human-inspectable dump.
    pub fn entries(&self) -> StoreResult<Vec<LedgerEntry>> {
        let mut out = Vec::with_capacity(self.ledger.len());
        for item in self.ledger.iter() {
            let (_key, bytes) = item?;
            let entry: LedgerEntry = bincode::deserialize(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            out.push(entry);
        }
        Ok(out)
    }

    /// Serializes, writes, and flushes one entry. Callers hold the user lock.
    fn put_entry(&self, entry: &LedgerEntry) -> StoreResult<()> {
        let bytes =
            bincode::serialize(entry).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.ledger.insert(entry.user_id.to_key(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Blocks until all pending writes are durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Decodes a big-endian u64 from a metadata value.
fn decode_index(raw: &[u8]) -> StoreResult<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StoreError::Serialization("invalid derivation index bytes".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
