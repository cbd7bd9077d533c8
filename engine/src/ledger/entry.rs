//! # Ledger Entries & Reconciliation
//!
//! A [`LedgerEntry`] is the complete durable state for one user: the
//! monotonic cumulative-deposit counter, the last observed on-chain balance
//! it is measured against, and the notification bookkeeping.
//!
//! The heart of this file is [`LedgerEntry::reconcile`] — the pure function
//! that turns "the chain says the balance is X now" into exactly one of
//! three outcomes. It runs under the store's per-user lock with no I/O in
//! sight, which is what makes it trivially testable and linearizable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Lamports, UserId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Invariant violations surfaced by reconciliation.
///
/// These are not retried — they mean the arithmetic itself broke, and the
/// affected operation must halt without touching the entry.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Crediting the delta would overflow the cumulative counter. At 18.4
    /// quintillion lamports this is either a corrupted RPC response or an
    /// attack, and in both cases the entry must be left untouched.
    #[error("cumulative deposit overflow: current {current}, delta {delta}")]
    CumulativeOverflow {
        /// Counter value before the failed credit.
        current: Lamports,
        /// The delta that would have overflowed it.
        delta: Lamports,
    },
}

// ---------------------------------------------------------------------------
// DepositOutcome
// ---------------------------------------------------------------------------

/// What a single reconciliation step concluded.
///
/// `NoChange` and a failed balance fetch are deliberately distinct: an
/// identical reading is a successful observation ("no deposit happened"),
/// not an absence of data. The observer reports them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositOutcome {
    /// Observed balance equals the stored baseline. The common case.
    NoChange,

    /// Observed balance rose: `delta` lamports were credited to the
    /// cumulative-deposit counter.
    Deposited {
        /// The increase, already added to `cumulative_deposits`.
        delta: Lamports,
    },

    /// Observed balance fell (outgoing transfer or fee). The baseline moved
    /// down so future deltas are computed correctly; the counter did not.
    Decreased {
        /// How far the balance dropped.
        by: Lamports,
    },
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

/// Durable per-user deposit state.
///
/// Created atomically with the user's wallet record (all zeros, nothing
/// notified) and mutated only through the store: reconciliation moves the
/// balance fields, the notification dispatcher moves the flags. Persists
/// for the life of the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The user this entry belongs to.
    pub user_id: UserId,

    /// Monotonically non-decreasing sum of all detected balance increases.
    /// This is the number every policy decision is gated on.
    pub cumulative_deposits: Lamports,

    /// The most recent successfully observed on-chain balance — the
    /// baseline the next delta is computed from.
    pub last_observed_balance: Lamports,

    /// Whether the one-time new-wallet admin announcement has been
    /// delivered. Transitions false→true exactly once.
    pub wallet_notified: bool,

    /// Cumulative-deposit total as of the last successful deposit
    /// notification. The dispatcher re-notifies only the excess above this.
    pub last_deposit_notified_amount: Lamports,

    /// When the entry (and wallet) was created.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last balance-moving reconciliation.
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A fresh zeroed entry, created together with the wallet record.
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            cumulative_deposits: 0,
            last_observed_balance: 0,
            wallet_notified: false,
            last_deposit_notified_amount: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reconciles a freshly observed on-chain balance against this entry.
    ///
    /// Pure: returns the successor entry and the outcome, touching nothing.
    /// The rules, in full:
    ///
    /// - observed > baseline → credit the difference, move the baseline up.
    /// - observed == baseline → no change at all.
    /// - observed < baseline → move the baseline down, credit nothing.
    ///
    /// The third rule is what makes "cumulative deposits" immune to
    /// outgoing transfers: a withdrawal lowers the baseline, and the next
    /// deposit is measured from the lowered value.
    pub fn reconcile(
        &self,
        observed: Lamports,
    ) -> Result<(Self, DepositOutcome), ReconcileError> {
        if observed == self.last_observed_balance {
            return Ok((self.clone(), DepositOutcome::NoChange));
        }

        let mut next = self.clone();
        next.last_observed_balance = observed;
        next.updated_at = Utc::now();

        if observed > self.last_observed_balance {
            let delta = observed - self.last_observed_balance;
            next.cumulative_deposits = self
                .cumulative_deposits
                .checked_add(delta)
                .ok_or(ReconcileError::CumulativeOverflow {
                    current: self.cumulative_deposits,
                    delta,
                })?;
            Ok((next, DepositOutcome::Deposited { delta }))
        } else {
            let by = self.last_observed_balance - observed;
            Ok((next, DepositOutcome::Decreased { by }))
        }
    }

    /// Lamports credited but not yet successfully notified.
    pub fn unnotified_deposits(&self) -> Lamports {
        self.cumulative_deposits
            .saturating_sub(self.last_deposit_notified_amount)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
