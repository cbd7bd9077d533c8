//! # Engine Configuration & Constants
//!
//! Every magic number in HELIO lives here. The poll cadence, the policy
//! thresholds, and the derivation scheme tag are all load-bearing: changing
//! the derivation tag after wallets have been handed out orphans every
//! existing deposit address, so treat that one as append-only.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Denomination
// ---------------------------------------------------------------------------

/// Lamports per SOL. All ledger arithmetic is done in lamports (`u64`);
/// SOL values exist only at display and price-conversion boundaries.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Derivation Scheme
// ---------------------------------------------------------------------------

/// Domain-separation tag mixed into the per-wallet KDF.
///
/// Version is baked into the tag. A future scheme change gets a new tag and
/// a new constant — existing indices keep deriving under v1 so historical
/// wallets remain reachable.
pub const DERIVATION_TAG_V1: &[u8] = b"helio-derive-v1";

/// Current derivation scheme version, recorded alongside wallet records.
pub const DERIVATION_SCHEME_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Observer Cadence
// ---------------------------------------------------------------------------

/// How often the balance observer sweeps all known wallets.
///
/// 30 seconds is deliberate: fast enough that a depositor sees their credit
/// within a minute, slow enough that a few hundred wallets don't saturate a
/// public RPC endpoint's rate limits.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Per-request ceiling on a single chain RPC call. A wallet whose balance
/// fetch exceeds this is skipped for the cycle and retried on the next one.
pub const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling on an ad-hoc price-quote fetch during a buy-eligibility check.
/// Shorter than the RPC timeout — a user is waiting on this one.
pub const QUOTE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Policy Thresholds
// ---------------------------------------------------------------------------

/// Minimum USD value of cumulative deposits required to unlock buying.
/// The boundary is inclusive: a balance worth exactly this much qualifies.
pub const MIN_BUY_USD: f64 = 10.0;

/// Withdrawal minimum multiplier: the smallest withdrawal a user may request
/// is this multiple of their cumulative deposits. Preserved literally from
/// the product rules, arithmetic oddities and all.
pub const WITHDRAWAL_MULTIPLIER: u64 = 2;

// ---------------------------------------------------------------------------
// Service Ports
// ---------------------------------------------------------------------------

/// Default port for the intent-facing HTTP API.
pub const DEFAULT_API_PORT: u16 = 8180;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 8181;

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Converts lamports to a SOL value for display and price math.
///
/// Lossy above 2^53 lamports (~9M SOL) — acceptable for display, which is
/// the only place this function is allowed.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// USD value of a lamport amount at the given SOL price.
pub fn lamports_usd_value(lamports: u64, usd_per_sol: f64) -> f64 {
    lamports_to_sol(lamports) * usd_per_sol
}
