//! # Intent API
//!
//! The HTTP surface the chat front-end calls. The front-end owns parsing,
//! keyboards, and message formatting; this API owns the decisions. Every
//! endpoint takes a `user_id` the platform has already authenticated and
//! returns a structured result for the front-end to render.
//!
//! ## Endpoints
//!
//! | Method | Path                      | Intent                           |
//! |--------|---------------------------|----------------------------------|
//! | GET    | `/health`                 | Liveness probe                   |
//! | GET    | `/status`                 | Service status summary           |
//! | POST   | `/v1/users/:id/wallet`    | request_wallet                   |
//! | GET    | `/v1/users/:id/ledger`    | Wallet + deposit overview        |
//! | POST   | `/v1/users/:id/buy`       | request_buy (eligibility check)  |
//! | POST   | `/v1/users/:id/withdraw`  | request_withdraw(amount)         |
//!
//! Policy rejections are 200s with specific, renderable reasons — they are
//! decisions, not errors. Errors (unknown user, unavailable quote) carry
//! their own status codes.

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use helio_engine::config::{lamports_to_sol, QUOTE_REQUEST_TIMEOUT};
use helio_engine::ledger::store::LedgerStore;
use helio_engine::notify::NotificationDispatcher;
use helio_engine::policy::{
    buy_eligibility, withdrawal_ruling, BuyDecision, QuoteSource, WithdrawalRuling,
};
use helio_engine::types::{Address, Lamports, UserId};
use helio_engine::wallet::WalletDeriver;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The service's reported version string.
    pub version: String,
    /// Durable ledger and wallet records.
    pub store: Arc<LedgerStore>,
    /// Wallet deriver for first-contact creation.
    pub deriver: WalletDeriver,
    /// Notification dispatcher (wallet announcements, audit lines).
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Live price quotes for buy-eligibility checks.
    pub quotes: Arc<dyn QuoteSource>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// When the service started, for uptime reporting.
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/v1/users/:id/wallet", post(request_wallet_handler))
        .route("/v1/users/:id/ledger", get(ledger_handler))
        .route("/v1/users/:id/buy", post(request_buy_handler))
        .route("/v1/users/:id/withdraw", post(request_withdraw_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Service software version.
    pub version: String,
    /// Custodial wallets ever created.
    pub wallets: u64,
    /// The next derivation index that would be assigned.
    pub next_derivation_index: u64,
    /// Seconds since the service started.
    pub uptime_secs: i64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `POST /v1/users/:id/wallet`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub user_id: UserId,
    /// The user's deposit address — safe to show and share.
    pub address: Address,
    /// True if this request created the wallet (first contact).
    pub created: bool,
}

/// Response payload for `GET /v1/users/:id/ledger`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub user_id: UserId,
    pub address: Address,
    pub derivation_index: u64,
    pub cumulative_deposits: Lamports,
    pub cumulative_sol: f64,
    pub last_observed_balance: Lamports,
    pub last_observed_sol: f64,
}

/// Response payload for `POST /v1/users/:id/buy`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuyResponse {
    /// The structured decision, tagged for machine handling.
    #[serde(flatten)]
    pub decision: BuyDecision,
    /// A specific, renderable explanation.
    pub message: String,
}

/// Request body for `POST /v1/users/:id/withdraw`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawRequest {
    /// Requested withdrawal amount in lamports.
    pub amount_lamports: Lamports,
}

/// Response payload for `POST /v1/users/:id/withdraw`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawResponse {
    /// The structured ruling, tagged for machine handling.
    #[serde(flatten)]
    pub ruling: WithdrawalRuling,
    /// A specific, renderable explanation.
    pub message: String,
}

/// Generic error body returned by endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the service is alive.
///
/// Liveness only; subsystem health belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — service status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let next_index = state.store.next_derivation_index().unwrap_or(0);
    let resp = StatusResponse {
        version: state.version.clone(),
        wallets: state.store.wallet_count() as u64,
        next_derivation_index: next_index,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        timestamp: Utc::now().to_rfc3339(),
    };
    Json(resp)
}

/// `POST /v1/users/:id/wallet` — the request_wallet intent.
///
/// Idempotent: first contact allocates and persists the wallet, every
/// later call returns the identical address. The one-time admin
/// announcement rides along; if its delivery fails it is retried on the
/// user's next contact, and the user still gets their address now.
async fn request_wallet_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<i64>,
) -> axum::response::Response {
    state.metrics.intent_requests_total.inc();
    let user = UserId(raw_id);

    let (record, created) = match state.deriver.derive(user) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(user = %user, error = %e, "wallet derivation failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "wallet creation failed");
        }
    };

    if let Err(e) = state.dispatcher.announce_wallet(&record).await {
        tracing::warn!(user = %user, error = %e,
            "wallet announcement failed, will retry on next contact");
    }
    state.metrics.wallets_total.set(state.store.wallet_count() as i64);

    (
        StatusCode::OK,
        Json(WalletResponse {
            user_id: user,
            address: record.address().clone(),
            created,
        }),
    )
        .into_response()
}

/// `GET /v1/users/:id/ledger` — wallet and deposit overview.
async fn ledger_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<i64>,
) -> axum::response::Response {
    let user = UserId(raw_id);

    let wallet = match state.store.get_wallet(user) {
        Ok(Some(w)) => w,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "no wallet for this user"),
        Err(e) => {
            tracing::error!(user = %user, error = %e, "wallet lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "ledger lookup failed");
        }
    };
    let entry = match state.store.get_entry(user) {
        Ok(Some(e)) => e,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "no ledger entry for this user"),
        Err(e) => {
            tracing::error!(user = %user, error = %e, "ledger lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "ledger lookup failed");
        }
    };

    (
        StatusCode::OK,
        Json(LedgerResponse {
            user_id: user,
            address: wallet.address,
            derivation_index: wallet.derivation_index,
            cumulative_deposits: entry.cumulative_deposits,
            cumulative_sol: lamports_to_sol(entry.cumulative_deposits),
            last_observed_balance: entry.last_observed_balance,
            last_observed_sol: lamports_to_sol(entry.last_observed_balance),
        }),
    )
        .into_response()
}

/// `POST /v1/users/:id/buy` — the request_buy intent.
///
/// Reads one committed ledger snapshot, fetches a live quote under its own
/// timeout (independent of the scan loop), and rules. A missing quote is
/// reported as unavailable — never defaulted, never guessed.
async fn request_buy_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<i64>,
) -> axum::response::Response {
    state.metrics.intent_requests_total.inc();
    let user = UserId(raw_id);

    let entry = match state.store.get_entry(user) {
        Ok(Some(e)) => e,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "no wallet for this user"),
        Err(e) => {
            tracing::error!(user = %user, error = %e, "ledger lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "ledger lookup failed");
        }
    };

    let usd_per_sol =
        match tokio::time::timeout(QUOTE_REQUEST_TIMEOUT, state.quotes.usd_per_sol()).await {
            Ok(Ok(price)) => price,
            Ok(Err(e)) => {
                tracing::warn!(user = %user, error = %e, "quote unavailable");
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "price quote unavailable, try again shortly",
                );
            }
            Err(_) => {
                tracing::warn!(user = %user, "quote request timed out");
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "price quote unavailable, try again shortly",
                );
            }
        };

    let decision = buy_eligibility(entry.cumulative_deposits, usd_per_sol);
    let message = match &decision {
        BuyDecision::Allowed { balance_usd } => {
            format!("Eligible to buy — balance worth ${balance_usd:.2}.")
        }
        BuyDecision::BlockedZeroBalance => {
            "No deposits detected yet. Fund your wallet to start trading.".to_string()
        }
        BuyDecision::BlockedBelowMinimum {
            balance_usd,
            threshold_usd,
        } => format!(
            "Balance worth ${balance_usd:.2} is below the ${threshold_usd:.2} minimum."
        ),
    };

    (StatusCode::OK, Json(BuyResponse { decision, message })).into_response()
}

/// `POST /v1/users/:id/withdraw` — the request_withdraw intent.
///
/// Rules on the committed cumulative-deposit snapshot and reports the
/// decision to the admin audit channel. The audit line is best-effort —
/// the user's answer does not depend on it.
async fn request_withdraw_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<i64>,
    Json(request): Json<WithdrawRequest>,
) -> axum::response::Response {
    state.metrics.intent_requests_total.inc();
    let user = UserId(raw_id);

    let entry = match state.store.get_entry(user) {
        Ok(Some(e)) => e,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "no wallet for this user"),
        Err(e) => {
            tracing::error!(user = %user, error = %e, "ledger lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "ledger lookup failed");
        }
    };

    let ruling = withdrawal_ruling(entry.cumulative_deposits, request.amount_lamports);
    let message = match &ruling {
        WithdrawalRuling::Approved { .. } => "Withdrawal request accepted.".to_string(),
        WithdrawalRuling::BelowMinimum { minimum, requested } => format!(
            "Withdrawal of {} SOL rejected: the minimum you may request is {} SOL.",
            lamports_to_sol(*requested),
            lamports_to_sol(*minimum)
        ),
    };

    if let Err(e) = state
        .dispatcher
        .report_withdrawal(
            user,
            request.amount_lamports,
            ruling.minimum(),
            ruling.is_approved(),
        )
        .await
    {
        tracing::warn!(user = %user, error = %e, "withdrawal audit line failed");
    }

    (StatusCode::OK, Json(WithdrawResponse { ruling, message })).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GatewayMetrics;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    use helio_engine::notify::{NotificationEvent, NotificationSink, NotifyError};
    use helio_engine::policy::QuoteError;
    use helio_engine::seed::MasterSeed;

    const TEST_PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[derive(Default)]
    struct RecordingSink {
        admin: Mutex<Vec<NotificationEvent>>,
    }

    #[async_trait::async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver_admin(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
            self.admin.lock().push(event.clone());
            Ok(())
        }

        async fn deliver_user(
            &self,
            _user: UserId,
            _event: &NotificationEvent,
        ) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    /// Quote source with a fixed price, or none at all.
    struct StaticQuote(Option<f64>);

    #[async_trait::async_trait]
    impl QuoteSource for StaticQuote {
        async fn usd_per_sol(&self) -> Result<f64, QuoteError> {
            self.0
                .ok_or_else(|| QuoteError::Unavailable("no quote configured".into()))
        }
    }

    struct TestApp {
        router: Router,
        store: Arc<LedgerStore>,
        sink: Arc<RecordingSink>,
    }

    fn test_app(quote: Option<f64>) -> TestApp {
        let store = Arc::new(LedgerStore::open_temporary().unwrap());
        let seed = Arc::new(MasterSeed::from_phrase(TEST_PHRASE).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
        ));
        let state = AppState {
            version: "test".to_string(),
            store: Arc::clone(&store),
            deriver: WalletDeriver::new(seed, Arc::clone(&store)),
            dispatcher,
            quotes: Arc::new(StaticQuote(quote)),
            metrics: Arc::new(GatewayMetrics::new()),
            started_at: Utc::now(),
        };
        TestApp {
            router: create_router(state),
            store,
            sink,
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let request = match body {
            Some(json) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = test_app(Some(20.0));
        let (status, body) = send(&app.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn wallet_request_is_idempotent_and_announced_once() {
        let app = test_app(Some(20.0));

        let (status, first) = send(&app.router, "POST", "/v1/users/42/wallet", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["created"], true);

        let (_, second) = send(&app.router, "POST", "/v1/users/42/wallet", None).await;
        assert_eq!(second["created"], false);
        assert_eq!(second["address"], first["address"]);

        let announcements = app
            .sink
            .admin
            .lock()
            .iter()
            .filter(|e| matches!(e, NotificationEvent::WalletCreated { .. }))
            .count();
        assert_eq!(announcements, 1);
    }

    #[tokio::test]
    async fn ledger_overview_reflects_deposits() {
        let app = test_app(Some(20.0));
        send(&app.router, "POST", "/v1/users/7/wallet", None).await;
        app.store.apply_deposit(UserId(7), 500_000_000).unwrap();

        let (status, body) = send(&app.router, "GET", "/v1/users/7/ledger", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cumulative_deposits"], 500_000_000u64);
        assert_eq!(body["cumulative_sol"], 0.5);
        assert_eq!(body["derivation_index"], 0);
    }

    #[tokio::test]
    async fn ledger_overview_unknown_user_is_404() {
        let app = test_app(Some(20.0));
        let (status, body) = send(&app.router, "GET", "/v1/users/404/ledger", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("no wallet"));
    }

    #[tokio::test]
    async fn buy_matrix_zero_below_exact() {
        let app = test_app(Some(20.0));
        send(&app.router, "POST", "/v1/users/1/wallet", None).await;

        // Zero balance.
        let (status, body) = send(&app.router, "POST", "/v1/users/1/buy", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"], "blocked_zero_balance");
        assert!(body["message"].as_str().unwrap().contains("Fund your wallet"));

        // $7 worth — below the $10 minimum.
        app.store.apply_deposit(UserId(1), 350_000_000).unwrap();
        let (_, body) = send(&app.router, "POST", "/v1/users/1/buy", None).await;
        assert_eq!(body["decision"], "blocked_below_minimum");
        assert!(body["message"].as_str().unwrap().contains("$10.00"));

        // Exactly $10 — inclusive boundary.
        app.store.apply_deposit(UserId(1), 500_000_000).unwrap();
        let (_, body) = send(&app.router, "POST", "/v1/users/1/buy", None).await;
        assert_eq!(body["decision"], "allowed");
    }

    #[tokio::test]
    async fn buy_with_unavailable_quote_is_503_not_a_guess() {
        let app = test_app(None);
        send(&app.router, "POST", "/v1/users/1/wallet", None).await;
        app.store.apply_deposit(UserId(1), 500_000_000).unwrap();

        let (status, body) = send(&app.router, "POST", "/v1/users/1/buy", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("quote unavailable"));
    }

    #[tokio::test]
    async fn withdraw_below_minimum_reports_the_minimum() {
        let app = test_app(Some(20.0));
        send(&app.router, "POST", "/v1/users/2/wallet", None).await;
        app.store.apply_deposit(UserId(2), 500_000_000).unwrap();

        let (status, body) = send(
            &app.router,
            "POST",
            "/v1/users/2/withdraw",
            Some(serde_json::json!({ "amount_lamports": 900_000_000u64 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"], "below_minimum");
        assert_eq!(body["minimum"], 1_000_000_000u64);
        assert!(body["message"].as_str().unwrap().contains("1 SOL"));

        // The ruling reached the admin audit channel.
        assert!(app
            .sink
            .admin
            .lock()
            .iter()
            .any(|e| matches!(e, NotificationEvent::WithdrawalDecision { approved: false, .. })));
    }

    #[tokio::test]
    async fn withdraw_at_minimum_is_approved() {
        let app = test_app(Some(20.0));
        send(&app.router, "POST", "/v1/users/3/wallet", None).await;
        app.store.apply_deposit(UserId(3), 500_000_000).unwrap();

        let (_, body) = send(
            &app.router,
            "POST",
            "/v1/users/3/withdraw",
            Some(serde_json::json!({ "amount_lamports": 1_000_000_000u64 })),
        )
        .await;
        assert_eq!(body["decision"], "approved");
    }

    #[tokio::test]
    async fn status_reports_wallet_counts() {
        let app = test_app(Some(20.0));
        send(&app.router, "POST", "/v1/users/1/wallet", None).await;
        send(&app.router, "POST", "/v1/users/2/wallet", None).await;

        let (status, body) = send(&app.router, "GET", "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["wallets"], 2);
        assert_eq!(body["next_derivation_index"], 2);
        assert_eq!(body["version"], "test");
    }
}
