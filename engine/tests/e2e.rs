//! End-to-end integration tests for the HELIO engine.
//!
//! These tests exercise the full custody lifecycle: first contact derives a
//! wallet and announces it, the observer reconciles chain balances into the
//! ledger, the dispatcher delivers deposit notifications exactly as the
//! watermarks dictate, and the policy evaluator rules on the committed
//! totals. They prove the components compose — the per-module unit tests
//! prove each one alone.
//!
//! Each test stands alone with its own temporary store and in-memory chain.
//! No shared state, no test ordering dependencies, no flaky failures.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use helio_engine::ledger::store::LedgerStore;
use helio_engine::notify::{NotificationDispatcher, NotificationEvent, NotificationSink, NotifyError};
use helio_engine::observer::{
    BalanceObserver, BalanceSource, BalanceSourceError, ObserverConfig,
};
use helio_engine::policy::{buy_eligibility, withdrawal_ruling, BuyDecision, WithdrawalRuling};
use helio_engine::seed::MasterSeed;
use helio_engine::types::{Address, Lamports, UserId};
use helio_engine::wallet::WalletDeriver;

const TEST_PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

// ---------------------------------------------------------------------------
// Test Doubles
// ---------------------------------------------------------------------------

/// In-memory chain with settable balances.
#[derive(Default)]
struct MockChain {
    balances: DashMap<Address, Lamports>,
}

impl MockChain {
    fn set_balance(&self, address: &Address, balance: Lamports) {
        self.balances.insert(address.clone(), balance);
    }
}

#[async_trait::async_trait]
impl BalanceSource for MockChain {
    async fn get_balance(&self, address: &Address) -> Result<Lamports, BalanceSourceError> {
        Ok(self.balances.get(address).map(|b| *b).unwrap_or(0))
    }
}

/// Sink that records every delivery.
#[derive(Default)]
struct RecordingSink {
    admin: Mutex<Vec<NotificationEvent>>,
    user: Mutex<Vec<(UserId, NotificationEvent)>>,
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver_admin(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.admin.lock().push(event.clone());
        Ok(())
    }

    async fn deliver_user(
        &self,
        user: UserId,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        self.user.lock().push((user, event.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<LedgerStore>,
    chain: Arc<MockChain>,
    sink: Arc<RecordingSink>,
    deriver: WalletDeriver,
    dispatcher: Arc<NotificationDispatcher>,
    observer: BalanceObserver,
}

/// Spins up the full engine stack over a given store.
fn harness_over(store: Arc<LedgerStore>) -> Harness {
    let seed = Arc::new(MasterSeed::from_phrase(TEST_PHRASE).expect("test phrase is valid"));
    let chain = Arc::new(MockChain::default());
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    ));
    let observer = BalanceObserver::new(
        Arc::clone(&store),
        Arc::clone(&chain) as Arc<dyn BalanceSource>,
        Arc::clone(&dispatcher),
        ObserverConfig {
            poll_interval: Duration::from_millis(10),
            request_timeout: Duration::from_millis(250),
        },
    );
    let deriver = WalletDeriver::new(seed, Arc::clone(&store));

    Harness {
        store,
        chain,
        sink,
        deriver,
        dispatcher,
        observer,
    }
}

fn harness() -> Harness {
    harness_over(Arc::new(LedgerStore::open_temporary().expect("temp store")))
}

fn idle() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_contact_to_funded_buy() {
    let h = harness();
    let user = UserId(7_216_649);

    // First contact: wallet derived, persisted, announced exactly once.
    let (record, created) = h.deriver.derive(user).unwrap();
    assert!(created);
    assert!(h.dispatcher.announce_wallet(&record).await.unwrap());
    assert!(!h.dispatcher.announce_wallet(&record).await.unwrap());

    // Before funding: buy blocked with the zero-balance reason.
    let entry = h.store.get_entry(user).unwrap().unwrap();
    assert_eq!(
        buy_eligibility(entry.cumulative_deposits, 20.0),
        BuyDecision::BlockedZeroBalance
    );

    // User deposits 0.35 SOL ($7 at $20/SOL): still blocked, below minimum.
    h.chain.set_balance(record.address(), 350_000_000);
    h.observer.scan_cycle(&idle()).await;
    let entry = h.store.get_entry(user).unwrap().unwrap();
    assert!(matches!(
        buy_eligibility(entry.cumulative_deposits, 20.0),
        BuyDecision::BlockedBelowMinimum { .. }
    ));

    // Tops up to 0.5 SOL total (exactly $10): allowed, inclusive boundary.
    h.chain.set_balance(record.address(), 500_000_000);
    h.observer.scan_cycle(&idle()).await;
    let entry = h.store.get_entry(user).unwrap().unwrap();
    assert!(buy_eligibility(entry.cumulative_deposits, 20.0).is_allowed());

    // Two deposit notifications went out, one per credit, to both channels.
    let deposits: Vec<_> = h
        .sink
        .admin
        .lock()
        .iter()
        .filter(|e| matches!(e, NotificationEvent::DepositDetected { .. }))
        .cloned()
        .collect();
    assert_eq!(deposits.len(), 2);
    assert_eq!(h.sink.user.lock().len(), 2);
}

#[tokio::test]
async fn withdrawal_rule_over_observed_deposits() {
    let h = harness();
    let user = UserId(11);
    let (record, _) = h.deriver.derive(user).unwrap();

    // 0.5 SOL cumulative → minimum withdrawal 1.0 SOL.
    h.chain.set_balance(record.address(), 500_000_000);
    h.observer.scan_cycle(&idle()).await;
    let entry = h.store.get_entry(user).unwrap().unwrap();

    let ruling = withdrawal_ruling(entry.cumulative_deposits, 900_000_000);
    assert_eq!(
        ruling,
        WithdrawalRuling::BelowMinimum {
            minimum: 1_000_000_000,
            requested: 900_000_000,
        }
    );

    // The ruling lands in the admin audit channel.
    h.dispatcher
        .report_withdrawal(user, 900_000_000, ruling.minimum(), ruling.is_approved())
        .await
        .unwrap();
    assert!(h
        .sink
        .admin
        .lock()
        .iter()
        .any(|e| matches!(e, NotificationEvent::WithdrawalDecision { approved: false, .. })));
}

#[tokio::test]
async fn outgoing_transfers_never_erode_cumulative_deposits() {
    let h = harness();
    let user = UserId(3);
    let (record, _) = h.deriver.derive(user).unwrap();

    // A history with an outgoing transfer in the middle: 0, 5, 3, 8.
    for balance in [0u64, 5, 3, 8] {
        h.chain.set_balance(record.address(), balance);
        h.observer.scan_cycle(&idle()).await;
    }

    let entry = h.store.get_entry(user).unwrap().unwrap();
    assert_eq!(entry.cumulative_deposits, 10);
    assert_eq!(entry.last_observed_balance, 8);
}

#[tokio::test]
async fn concurrent_first_contacts_one_wallet_one_announcement() {
    let h = harness();
    let user = UserId(500);
    let dispatcher = Arc::clone(&h.dispatcher);
    let deriver = h.deriver.clone();

    let attempts = futures::future::join_all((0..8).map(|_| {
        let deriver = deriver.clone();
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let (record, _) = tokio::task::spawn_blocking(move || deriver.derive(user).unwrap())
                .await
                .unwrap();
            dispatcher.announce_wallet(&record).await.unwrap()
        }
    }))
    .await;

    assert_eq!(attempts.iter().filter(|sent| **sent).count(), 1);
    let announcements = h
        .sink
        .admin
        .lock()
        .iter()
        .filter(|e| matches!(e, NotificationEvent::WalletCreated { .. }))
        .count();
    assert_eq!(announcements, 1);
    assert_eq!(h.store.wallet_count(), 1);
}

#[tokio::test]
async fn restart_resumes_from_durable_baselines() {
    let dir = tempfile::tempdir().unwrap();
    let user = UserId(77);
    let address;

    // First life: fund a wallet and stop.
    {
        let h = harness_over(Arc::new(LedgerStore::open(dir.path()).unwrap()));
        let (record, _) = h.deriver.derive(user).unwrap();
        h.dispatcher.announce_wallet(&record).await.unwrap();
        address = record.address().clone();
        h.chain.set_balance(&address, 2_000_000);
        h.observer.scan_cycle(&idle()).await;

        let entry = h.store.get_entry(user).unwrap().unwrap();
        assert_eq!(entry.cumulative_deposits, 2_000_000);
    }

    // Second life: same store path, fresh engine stack.
    let h = harness_over(Arc::new(LedgerStore::open(dir.path()).unwrap()));
    h.chain.set_balance(&address, 2_000_000);

    let report = h.observer.scan_cycle(&idle()).await;
    assert_eq!(report.wallets_scanned, 1);
    // Unchanged wallet reconciles to NoChange — no spurious re-credit,
    // no duplicate notification.
    assert_eq!(report.deposits_detected, 0);
    assert!(h.sink.admin.lock().is_empty());

    let entry = h.store.get_entry(user).unwrap().unwrap();
    assert_eq!(entry.cumulative_deposits, 2_000_000);
    assert!(entry.wallet_notified);

    // The same derivation still reproduces the same wallet.
    let (record, created) = h.deriver.derive(user).unwrap();
    assert!(!created);
    assert_eq!(record.address(), &address);
    // And the announcement stays suppressed across the restart.
    assert!(!h.dispatcher.announce_wallet(&record).await.unwrap());
}

#[tokio::test]
async fn deposits_race_policy_reads_without_torn_state() {
    let h = harness();
    let user = UserId(21);
    let (record, _) = h.deriver.derive(user).unwrap();
    let store = Arc::clone(&h.store);

    // Writer: a rising balance history applied through the observer.
    let chain = Arc::clone(&h.chain);
    let address = record.address().clone();
    let observer = h.observer;
    let writer = tokio::spawn(async move {
        for step in 1..=50u64 {
            chain.set_balance(&address, step * 1_000);
            observer.scan_cycle(&idle()).await;
        }
    });

    // Reader: policy evaluations over snapshots while the writer runs.
    // Every snapshot must be internally consistent — the counter can never
    // trail the baseline in a deposits-only history.
    let reader = tokio::spawn(async move {
        for _ in 0..200 {
            if let Some(entry) = store.get_entry(user).unwrap() {
                assert!(entry.cumulative_deposits >= entry.last_observed_balance);
                let _ = buy_eligibility(entry.cumulative_deposits, 20.0);
            }
            tokio::task::yield_now().await;
        }
    });

    writer.await.unwrap();
    reader.await.unwrap();

    let entry = h.store.get_entry(user).unwrap().unwrap();
    assert_eq!(entry.cumulative_deposits, 50_000);
    assert_eq!(entry.last_observed_balance, 50_000);
}
