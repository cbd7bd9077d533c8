//! # Notification Dispatcher
//!
//! Turns committed ledger facts into outbound events — and nothing else.
//! The dispatcher never invents state: it reads what the store has durably
//! committed, compares it against the notification watermarks, and delivers
//! the difference.
//!
//! ## Delivery Semantics
//!
//! | Event                | Channel(s)     | Guarantee                     |
//! |----------------------|----------------|-------------------------------|
//! | `WalletCreated`      | admin          | exactly once per user         |
//! | `DepositDetected`    | user + admin   | at least once, never phantom  |
//! | `WithdrawalDecision` | admin          | best effort (audit trail)     |
//!
//! "Never phantom" means a deposit notification is only ever sent for
//! lamports already committed to `cumulative_deposits` — the flag commit
//! happens *after* successful delivery, so a crash in between produces a
//! retried notification, never a notification for a credit that was lost.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::ledger::store::{LedgerStore, StoreError};
use crate::types::{Address, Lamports, UserId};
use crate::wallet::WalletRecord;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during notification dispatch.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The sink could not deliver. Transient infrastructure — the caller
    /// retries on the next cycle; the watermark was not advanced.
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    /// Reading or updating notification state failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Events & Sink
// ---------------------------------------------------------------------------

/// An outbound event, rendered and delivered by a [`NotificationSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A new custodial wallet exists. Admin-only; carries the exported
    /// secret, which is why it must fire at most once.
    WalletCreated {
        user_id: UserId,
        address: Address,
        secret_b58: String,
    },

    /// New deposits were credited to a user's ledger.
    DepositDetected {
        user_id: UserId,
        /// Lamports newly announced by this notification.
        delta: Lamports,
        /// Cumulative deposits after the credit.
        new_cumulative: Lamports,
    },

    /// A withdrawal request was ruled on (audit record).
    WithdrawalDecision {
        user_id: UserId,
        requested: Lamports,
        minimum: Lamports,
        approved: bool,
    },
}

/// Delivery target for rendered events.
///
/// Implementations live in the service layer (Telegram, console). Delivery
/// failures must be reported, not swallowed — the dispatcher's idempotence
/// machinery depends on knowing whether a send actually happened.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers an event to the admin channel.
    async fn deliver_admin(&self, event: &NotificationEvent) -> Result<(), NotifyError>;

    /// Delivers an event to a specific user's channel.
    async fn deliver_user(&self, user: UserId, event: &NotificationEvent)
        -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Event dispatch with store-backed idempotence.
///
/// Holds its own per-user async locks, separate from the store's sync
/// locks: delivery awaits network I/O, and the store's locks must never be
/// held across an await point. The async lock serializes notification
/// attempts per user; the store's watermark fields make them idempotent
/// across restarts.
pub struct NotificationDispatcher {
    store: Arc<LedgerStore>,
    sink: Arc<dyn NotificationSink>,
    /// Per-user delivery locks, created on first touch.
    sending: DashMap<UserId, Arc<Mutex<()>>>,
}

impl NotificationDispatcher {
    /// Builds a dispatcher over the store and a delivery sink.
    pub fn new(store: Arc<LedgerStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            sink,
            sending: DashMap::new(),
        }
    }

    fn delivery_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        self.sending
            .entry(user)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Announces a newly created wallet to the admin channel, exactly once.
    ///
    /// Safe to call on every contact: concurrent callers serialize on the
    /// per-user lock, and whoever enters after the flag committed sees
    /// `wallet_notified == true` and does nothing. The flag is committed
    /// only after the sink accepted the event, so a crash mid-delivery
    /// yields a retry on the next contact — never a duplicate after commit.
    ///
    /// Returns `true` if this call performed the delivery.
    pub async fn announce_wallet(&self, record: &WalletRecord) -> Result<bool, NotifyError> {
        let user = record.user_id();
        let lock = self.delivery_lock(user);
        let _guard = lock.lock().await;

        let entry = self
            .store
            .get_entry(user)?
            .ok_or(StoreError::MissingEntry(user))?;
        if entry.wallet_notified {
            return Ok(false);
        }

        let event = NotificationEvent::WalletCreated {
            user_id: user,
            address: record.address().clone(),
            secret_b58: record.export_secret_b58(),
        };
        self.sink.deliver_admin(&event).await?;
        self.store.mark_wallet_notified(user)?;

        tracing::info!(user = %user, address = %record.address(), "wallet announced to admin");
        Ok(true)
    }

    /// Delivers any credited-but-unannounced deposits for a user.
    ///
    /// Idempotent: computes the excess of committed cumulative deposits
    /// over the notification watermark and announces exactly that. Called
    /// after every successful reconciliation — on the cycle after a failed
    /// delivery, the excess is still there and gets re-announced
    /// (at-least-once). Returns the announced delta, if any.
    pub async fn flush_deposits(&self, user: UserId) -> Result<Option<Lamports>, NotifyError> {
        let lock = self.delivery_lock(user);
        let _guard = lock.lock().await;

        let entry = self
            .store
            .get_entry(user)?
            .ok_or(StoreError::MissingEntry(user))?;
        let delta = entry.unnotified_deposits();
        if delta == 0 {
            return Ok(None);
        }

        let event = NotificationEvent::DepositDetected {
            user_id: user,
            delta,
            new_cumulative: entry.cumulative_deposits,
        };
        self.sink.deliver_user(user, &event).await?;
        self.sink.deliver_admin(&event).await?;
        self.store
            .mark_deposits_notified(user, entry.cumulative_deposits)?;

        tracing::info!(
            user = %user,
            delta,
            cumulative = entry.cumulative_deposits,
            "deposit notification delivered"
        );
        Ok(Some(delta))
    }

    /// Sends a withdrawal ruling to the admin audit channel.
    ///
    /// Best-effort: a failed audit line is logged and reported but does not
    /// fail the user's request — they already have their answer.
    pub async fn report_withdrawal(
        &self,
        user: UserId,
        requested: Lamports,
        minimum: Lamports,
        approved: bool,
    ) -> Result<(), NotifyError> {
        let event = NotificationEvent::WithdrawalDecision {
            user_id: user,
            requested,
            minimum,
            approved,
        };
        self.sink.deliver_admin(&event).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
