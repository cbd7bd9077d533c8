//! # Ledger Module — Deposit Accounting & Durable State
//!
//! The ledger is where HELIO keeps its one number per user: cumulative
//! deposits. Everything else in the entry exists to make that number
//! trustworthy — the observed-balance baseline the deltas are computed
//! from, and the notification flags that keep event delivery idempotent.
//!
//! ## Architecture
//!
//! ```text
//! entry.rs — LedgerEntry and the pure reconciliation function
//! store.rs — sled-backed persistence with per-user locking
//! ```
//!
//! ## Design Principles
//!
//! 1. **Reconciliation is pure.** `(old entry, observed balance) -> (new
//!    entry, outcome)` is a total function with no I/O; the store composes
//!    it with an atomic commit.
//! 2. **Cumulative deposits never decrease.** A lower observed balance
//!    moves the baseline, not the counter.
//! 3. **Every mutation is durable before the call returns.** A crash after
//!    an `apply_deposit` returns can never lose the credit.
//! 4. **Per-user mutual exclusion, cross-user parallelism.** One user's
//!    reconciliation never waits on another's.

pub mod entry;
pub mod store;

pub use entry::{DepositOutcome, LedgerEntry, ReconcileError};
pub use store::{LedgerStore, StoreError};
