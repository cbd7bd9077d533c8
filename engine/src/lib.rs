//! # HELIO Engine — Core Library
//!
//! The custody core of the HELIO trading bot: every chat user gets exactly
//! one on-chain wallet derived from a single master mnemonic, and every
//! lamport that arrives in one of those wallets is reconciled into a durable
//! per-user deposit ledger that the bot's buy/withdraw rules are gated on.
//!
//! ## Architecture
//!
//! The library is split into modules that mirror the actual concerns of a
//! custodial deposit pipeline:
//!
//! - **config** — Reference constants: poll cadence, policy thresholds,
//!   derivation scheme versioning.
//! - **types** — The small shared vocabulary: `UserId`, `Lamports`, `Address`.
//! - **seed** — The seed vault. One validated mnemonic, held in memory,
//!   never persisted, never printed.
//! - **keys** — Deterministic per-index keypair derivation. Same seed, same
//!   index, same wallet — forever.
//! - **ledger** — The durable store: wallet records, cumulative deposits,
//!   notification state. The only mutable shared resource in the system.
//! - **wallet** — The deriver: first contact allocates an index and persists
//!   the record before any key material is handed out.
//! - **observer** — The polling reconciliation engine. Turns noisy chain
//!   balances into monotonic deposit facts.
//! - **policy** — Pure buy/withdraw decisions over ledger snapshots.
//! - **notify** — Event dispatch with exactly-once wallet announcements and
//!   at-least-once deposit notifications.
//!
//! ## Design Philosophy
//!
//! 1. Deposits only go up. An outgoing transfer lowers the observed balance,
//!    never the cumulative-deposit counter.
//! 2. Every mutation of a user's state happens under that user's lock and is
//!    durable before the call returns.
//! 3. The hard logic is pure. Reconciliation is `(old entry, observed
//!    balance) -> (new entry, outcome)`; the network never touches it.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod keys;
pub mod ledger;
pub mod notify;
pub mod observer;
pub mod policy;
pub mod seed;
pub mod types;
pub mod wallet;
