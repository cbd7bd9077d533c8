//! # Balance Observer
//!
//! The polling engine that turns eventually-consistent chain state into
//! ledger facts. Each cycle sweeps every wallet ever created, fetches its
//! on-chain balance, reconciles it through the store, and hands any credit
//! to the notification dispatcher.
//!
//! ## Design Decisions
//!
//! - **Per-wallet failure isolation.** One flaky RPC response costs one
//!   wallet one cycle. The scan never aborts because a single fetch failed;
//!   the wallet is simply retried next time. "The balance didn't change"
//!   and "the fetch failed" are different outcomes and are counted
//!   differently.
//!
//! - **Fetch outside the lock, reconcile inside.** The network round trip
//!   happens with no lock held; the store re-validates against its own
//!   committed baseline inside the per-user lock. A stale observation
//!   reconciles to `NoChange` or `Decreased` — it can never double-credit.
//!
//! - **Cooperative cancellation between wallets, never mid-wallet.** A
//!   shutdown request is honored at the next wallet boundary; an in-flight
//!   reconciliation always completes.
//!
//! - **The caller owns the cadence.** [`BalanceObserver::scan_cycle`] does
//!   exactly one sweep; [`BalanceObserver::run`] wraps it in the reference
//!   30-second interval for callers that don't need per-cycle hooks.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::{POLL_INTERVAL, RPC_REQUEST_TIMEOUT};
use crate::ledger::entry::DepositOutcome;
use crate::ledger::store::LedgerStore;
use crate::notify::NotificationDispatcher;
use crate::types::{Address, Lamports};
use crate::wallet::StoredWallet;

// ---------------------------------------------------------------------------
// Balance Source
// ---------------------------------------------------------------------------

/// Errors from the external chain balance query.
///
/// Everything here is transient by definition — the chain itself has no
/// "permanent failure" mode the observer could act on. Retried next cycle.
#[derive(Debug, Error)]
pub enum BalanceSourceError {
    /// RPC or transport failure (connection refused, 5xx, malformed body).
    #[error("transient RPC failure: {0}")]
    Transient(String),

    /// The request exceeded its bounded timeout.
    #[error("balance fetch timed out")]
    Timeout,
}

/// The chain balance query, as consumed by the observer.
///
/// Implementations live in the service layer (JSON-RPC clients) and in
/// tests (in-memory chains). Repeated identical results are normal chain
/// behavior, not an error.
#[async_trait::async_trait]
pub trait BalanceSource: Send + Sync {
    /// Current on-chain balance of `address`, in lamports.
    async fn get_balance(&self, address: &Address) -> Result<Lamports, BalanceSourceError>;
}

// ---------------------------------------------------------------------------
// Configuration & Report
// ---------------------------------------------------------------------------

/// Tuning knobs for the observer.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Time between sweep starts.
    pub poll_interval: Duration,

    /// Ceiling on a single balance fetch. A wallet that exceeds it is
    /// counted as a failure for the cycle and retried next time.
    pub request_timeout: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            request_timeout: RPC_REQUEST_TIMEOUT,
        }
    }
}

/// Summary of one completed sweep, for logging and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Wallets whose balance was fetched and reconciled this cycle.
    pub wallets_scanned: u64,
    /// Wallets that produced a `Deposited` outcome.
    pub deposits_detected: u64,
    /// Total lamports credited across all deposits this cycle.
    pub lamports_credited: Lamports,
    /// Wallets whose balance decreased (outgoing transfers observed).
    pub decreases: u64,
    /// Wallets skipped because the balance fetch failed or timed out.
    pub fetch_failures: u64,
    /// Deposit notifications that could not be delivered (will retry).
    pub notify_failures: u64,
    /// True if a shutdown request stopped the sweep early.
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// BalanceObserver
// ---------------------------------------------------------------------------

/// The recurring reconciliation engine.
///
/// Holds shared handles only — cheap to construct, safe to share. Exactly
/// one observer should run per store: the per-user locks make concurrent
/// observers *correct*, but they'd burn RPC quota re-reading each other's
/// baselines.
pub struct BalanceObserver {
    store: Arc<LedgerStore>,
    source: Arc<dyn BalanceSource>,
    dispatcher: Arc<NotificationDispatcher>,
    config: ObserverConfig,
}

impl BalanceObserver {
    /// Builds an observer over the store, a balance source, and the
    /// dispatcher that receives detected deposits.
    pub fn new(
        store: Arc<LedgerStore>,
        source: Arc<dyn BalanceSource>,
        dispatcher: Arc<NotificationDispatcher>,
        config: ObserverConfig,
    ) -> Self {
        Self {
            store,
            source,
            dispatcher,
            config,
        }
    }

    /// Performs one full sweep over all known wallets.
    ///
    /// Wallets created after the snapshot is taken are picked up next
    /// cycle. Checks `shutdown` between wallets and stops early when it
    /// flips, marking the report as cancelled.
    pub async fn scan_cycle(&self, shutdown: &watch::Receiver<bool>) -> ScanReport {
        let mut report = ScanReport::default();

        let wallets = match self.store.wallets() {
            Ok(w) => w,
            Err(e) => {
                // Can't even enumerate wallets — log and let the next
                // cycle retry. Nothing was partially applied.
                tracing::error!(error = %e, "wallet snapshot failed, skipping cycle");
                return report;
            }
        };

        for wallet in wallets {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }
            self.observe_wallet(&wallet, &mut report).await;
        }

        tracing::debug!(
            scanned = report.wallets_scanned,
            deposits = report.deposits_detected,
            credited = report.lamports_credited,
            failures = report.fetch_failures,
            "scan cycle complete"
        );
        report
    }

    /// Fetches, reconciles, and notifies for a single wallet. All failure
    /// handling is local — this never propagates.
    async fn observe_wallet(&self, wallet: &StoredWallet, report: &mut ScanReport) {
        let user = wallet.user_id;

        let observed = match tokio::time::timeout(
            self.config.request_timeout,
            self.source.get_balance(&wallet.address),
        )
        .await
        {
            Ok(Ok(balance)) => balance,
            Ok(Err(e)) => {
                tracing::warn!(user = %user, address = %wallet.address, error = %e,
                    "balance fetch failed, retrying next cycle");
                report.fetch_failures += 1;
                return;
            }
            Err(_) => {
                tracing::warn!(user = %user, address = %wallet.address,
                    "balance fetch timed out, retrying next cycle");
                report.fetch_failures += 1;
                return;
            }
        };

        report.wallets_scanned += 1;

        let outcome = match self.store.apply_deposit(user, observed) {
            Ok(outcome) => outcome,
            Err(e) => {
                // Includes invariant violations — halt this wallet's
                // operation loudly, leave the entry untouched, keep the
                // sweep going for everyone else.
                tracing::error!(user = %user, error = %e, "reconciliation failed");
                report.fetch_failures += 1;
                return;
            }
        };

        match outcome {
            DepositOutcome::NoChange => {}
            DepositOutcome::Deposited { delta } => {
                report.deposits_detected += 1;
                report.lamports_credited += delta;
                tracing::info!(user = %user, delta, observed, "deposit detected");
            }
            DepositOutcome::Decreased { by } => {
                report.decreases += 1;
                tracing::info!(user = %user, by, observed,
                    "balance decreased, baseline moved");
            }
        }

        // Flush any unannounced credit — this cycle's or a previous
        // cycle's whose delivery failed. Delivery failures are transient:
        // the watermark didn't move, next cycle retries.
        if let Err(e) = self.dispatcher.flush_deposits(user).await {
            tracing::warn!(user = %user, error = %e, "deposit notification failed, will retry");
            report.notify_failures += 1;
        }
    }

    /// Drives [`scan_cycle`](Self::scan_cycle) on the configured interval
    /// until `shutdown` flips.
    ///
    /// The first sweep runs immediately — after a restart the ledger's
    /// persisted baselines make it a no-op for unchanged wallets.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "balance observer started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.scan_cycle(&shutdown).await;
                    if report.cancelled {
                        break;
                    }
                }
                res = shutdown.changed() => {
                    // A dropped sender means the service is tearing down.
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("balance observer stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
