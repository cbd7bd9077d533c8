//! # Policy Evaluator
//!
//! Pure, synchronous, side-effect-free decisions over ledger snapshots.
//! Nothing here reads the store, touches the network, or mutates anything —
//! the caller fetches a committed [`LedgerEntry`](crate::ledger::LedgerEntry)
//! snapshot and a live quote, and these functions turn them into decisions.
//!
//! A rejection is not an error. It is a first-class decision value carrying
//! everything the front-end needs to render a specific message: the
//! threshold that wasn't met, the minimum that applies, the balance that
//! fell short.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{lamports_usd_value, MIN_BUY_USD, WITHDRAWAL_MULTIPLIER};
use crate::types::Lamports;

// ---------------------------------------------------------------------------
// Quote Source
// ---------------------------------------------------------------------------

/// Errors from the external price-quote source.
#[derive(Debug, Error)]
pub enum QuoteError {
    /// The quote source could not produce a price. Degrades gracefully:
    /// the caller reports "quote unavailable" — it never substitutes a
    /// default price or guesses at the boundary.
    #[error("price quote unavailable: {0}")]
    Unavailable(String),
}

/// Live SOL price in the reference currency.
///
/// Implementations live in the service layer (HTTP quote APIs) and in
/// tests (fixed quotes). Calls must carry their own bounded timeout.
#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    /// Current USD price of one SOL.
    async fn usd_per_sol(&self) -> Result<f64, QuoteError>;
}

// ---------------------------------------------------------------------------
// Buy Eligibility
// ---------------------------------------------------------------------------

/// Outcome of a buy-eligibility check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum BuyDecision {
    /// Cumulative deposits meet the minimum. Trading may proceed.
    Allowed {
        /// USD value of the user's cumulative deposits at the quoted price.
        balance_usd: f64,
    },

    /// The user has never deposited anything. Distinct from below-minimum
    /// so the front-end can say "fund your wallet" instead of "deposit
    /// more".
    BlockedZeroBalance,

    /// Deposits exist but are worth less than the threshold.
    BlockedBelowMinimum {
        /// USD value of the user's cumulative deposits at the quoted price.
        balance_usd: f64,
        /// The configured minimum that was not met.
        threshold_usd: f64,
    },
}

impl BuyDecision {
    /// True if the check passed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, BuyDecision::Allowed { .. })
    }
}

/// Decides buy eligibility from cumulative deposits and a live quote.
///
/// The threshold boundary is inclusive: a balance worth exactly
/// [`MIN_BUY_USD`] qualifies.
pub fn buy_eligibility(cumulative_deposits: Lamports, usd_per_sol: f64) -> BuyDecision {
    if cumulative_deposits == 0 {
        return BuyDecision::BlockedZeroBalance;
    }

    let balance_usd = lamports_usd_value(cumulative_deposits, usd_per_sol);
    if balance_usd >= MIN_BUY_USD {
        BuyDecision::Allowed { balance_usd }
    } else {
        BuyDecision::BlockedBelowMinimum {
            balance_usd,
            threshold_usd: MIN_BUY_USD,
        }
    }
}

// ---------------------------------------------------------------------------
// Withdrawal Ruling
// ---------------------------------------------------------------------------

/// Outcome of a withdrawal request check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum WithdrawalRuling {
    /// The requested amount meets the minimum.
    Approved {
        /// The minimum that applied to this request.
        minimum: Lamports,
    },

    /// The requested amount is below the minimum. The computed minimum is
    /// included so the caller can show the user exactly what to request.
    BelowMinimum {
        /// The smallest amount this user may request.
        minimum: Lamports,
        /// What they actually requested.
        requested: Lamports,
    },
}

impl WithdrawalRuling {
    /// True if the request passed.
    pub fn is_approved(&self) -> bool {
        matches!(self, WithdrawalRuling::Approved { .. })
    }

    /// The minimum that applied, whichever way the ruling went.
    pub fn minimum(&self) -> Lamports {
        match self {
            WithdrawalRuling::Approved { minimum } => *minimum,
            WithdrawalRuling::BelowMinimum { minimum, .. } => *minimum,
        }
    }
}

/// The smallest withdrawal a user may request: [`WITHDRAWAL_MULTIPLIER`]
/// times their cumulative deposits.
///
/// Preserved literally from the product rules — yes, the minimum exceeds
/// the balance, and no, deposits cannot be spent through this path. The
/// rules are what they are; this module just evaluates them. Saturates at
/// `u64::MAX` rather than wrapping.
pub fn withdrawal_minimum(cumulative_deposits: Lamports) -> Lamports {
    cumulative_deposits.saturating_mul(WITHDRAWAL_MULTIPLIER)
}

/// Rules on a withdrawal request against the user's cumulative deposits.
pub fn withdrawal_ruling(
    cumulative_deposits: Lamports,
    requested: Lamports,
) -> WithdrawalRuling {
    let minimum = withdrawal_minimum(cumulative_deposits);
    if requested >= minimum {
        WithdrawalRuling::Approved { minimum }
    } else {
        WithdrawalRuling::BelowMinimum { minimum, requested }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LAMPORTS_PER_SOL;

    #[test]
    fn zero_balance_blocks_with_specific_reason() {
        assert_eq!(buy_eligibility(0, 150.0), BuyDecision::BlockedZeroBalance);
    }

    #[test]
    fn below_threshold_blocks_and_reports_threshold() {
        // 0.35 SOL at $20/SOL is $7 — under the $10 minimum.
        let decision = buy_eligibility(350_000_000, 20.0);
        match decision {
            BuyDecision::BlockedBelowMinimum {
                balance_usd,
                threshold_usd,
            } => {
                assert!((balance_usd - 7.0).abs() < 1e-9);
                assert_eq!(threshold_usd, 10.0);
            }
            other => panic!("expected below-minimum, got {:?}", other),
        }
    }

    #[test]
    fn exact_threshold_is_allowed() {
        // 0.5 SOL at $20/SOL is exactly $10 — the boundary is inclusive.
        let decision = buy_eligibility(500_000_000, 20.0);
        assert!(decision.is_allowed());
    }

    #[test]
    fn above_threshold_is_allowed() {
        let decision = buy_eligibility(2 * LAMPORTS_PER_SOL, 150.0);
        match decision {
            BuyDecision::Allowed { balance_usd } => assert_eq!(balance_usd, 300.0),
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn dust_balance_is_below_minimum_not_zero() {
        // One lamport is not zero: the user *has* deposited, so the message
        // must be "below minimum", not "fund your wallet".
        let decision = buy_eligibility(1, 150.0);
        assert!(matches!(
            decision,
            BuyDecision::BlockedBelowMinimum { .. }
        ));
    }

    #[test]
    fn withdrawal_minimum_is_double_the_balance() {
        // 0.5 SOL cumulative → minimum withdrawal 1 SOL.
        assert_eq!(withdrawal_minimum(500_000_000), 1_000_000_000);
    }

    #[test]
    fn request_below_minimum_rejected_with_minimum() {
        // 0.5 SOL cumulative, requesting 0.9 SOL → rejected, minimum 1 SOL.
        let ruling = withdrawal_ruling(500_000_000, 900_000_000);
        assert_eq!(
            ruling,
            WithdrawalRuling::BelowMinimum {
                minimum: 1_000_000_000,
                requested: 900_000_000,
            }
        );
        assert_eq!(ruling.minimum(), 1_000_000_000);
    }

    #[test]
    fn request_at_minimum_approved() {
        let ruling = withdrawal_ruling(500_000_000, 1_000_000_000);
        assert!(ruling.is_approved());
        assert_eq!(ruling.minimum(), 1_000_000_000);
    }

    #[test]
    fn zero_balance_makes_any_request_approved() {
        // 2 × 0 = 0, so any request clears the minimum. The buy gate is
        // what actually stops a zero-balance user; this rule stays literal.
        assert!(withdrawal_ruling(0, 1).is_approved());
    }

    #[test]
    fn minimum_saturates_instead_of_wrapping() {
        assert_eq!(withdrawal_minimum(u64::MAX / 2 + 1), u64::MAX);
    }

    #[test]
    fn decisions_serialize_with_tags() {
        let json = serde_json::to_value(buy_eligibility(0, 1.0)).unwrap();
        assert_eq!(json["decision"], "blocked_zero_balance");

        let json = serde_json::to_value(withdrawal_ruling(100, 50)).unwrap();
        assert_eq!(json["decision"], "below_minimum");
        assert_eq!(json["minimum"], 200);
    }
}
