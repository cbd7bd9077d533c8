//! # External Adapters
//!
//! Concrete implementations of the engine's consumed interfaces: the chain
//! balance query, the price-quote source, and the notification sinks. This
//! is the only file in the workspace that talks to the outside world —
//! everything above it is testable with in-memory doubles.
//!
//! All HTTP clients use bounded timeouts; a hung upstream costs one
//! request, never a stuck scan loop.

use async_trait::async_trait;
use std::time::Duration;

use helio_engine::config::lamports_to_sol;
use helio_engine::notify::{NotificationEvent, NotificationSink, NotifyError};
use helio_engine::observer::{BalanceSource, BalanceSourceError};
use helio_engine::policy::{QuoteError, QuoteSource};
use helio_engine::types::{Address, Lamports, UserId};

// ---------------------------------------------------------------------------
// Chain RPC
// ---------------------------------------------------------------------------

/// Solana JSON-RPC balance client.
///
/// Speaks the `getBalance` method against any standard RPC endpoint. The
/// chain is eventually consistent — a balance that hasn't moved yet is a
/// valid answer, and the reconciliation layer treats it as such.
pub struct SolanaRpc {
    http: reqwest::Client,
    url: String,
}

impl SolanaRpc {
    /// Builds a client against `url` with a per-request `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BalanceSource for SolanaRpc {
    async fn get_balance(&self, address: &Address) -> Result<Lamports, BalanceSourceError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address.as_str()],
        });

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BalanceSourceError::Timeout
                } else {
                    BalanceSourceError::Transient(e.to_string())
                }
            })?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BalanceSourceError::Transient(e.to_string()))?;

        if let Some(err) = body.get("error") {
            return Err(BalanceSourceError::Transient(format!(
                "RPC error: {}",
                err
            )));
        }

        body.pointer("/result/value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                BalanceSourceError::Transient("malformed getBalance response".to_string())
            })
    }
}

// ---------------------------------------------------------------------------
// Price Quotes
// ---------------------------------------------------------------------------

/// HTTP price-quote client for the USD price of SOL.
///
/// Expects the CoinGecko simple-price response shape:
/// `{"solana": {"usd": <price>}}`. Every failure mode — transport, status,
/// shape, a non-positive price — collapses to [`QuoteError::Unavailable`]:
/// the policy layer reports that verbatim and never substitutes a default.
pub struct HttpQuoteSource {
    http: reqwest::Client,
    url: String,
}

impl HttpQuoteSource {
    /// Builds a client against `url` with a per-request `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn usd_per_sol(&self) -> Result<f64, QuoteError> {
        let body: serde_json::Value = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| QuoteError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| QuoteError::Unavailable(e.to_string()))?;

        let price = body
            .pointer("/solana/usd")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| QuoteError::Unavailable("malformed quote response".to_string()))?;

        if !price.is_finite() || price <= 0.0 {
            return Err(QuoteError::Unavailable(format!(
                "implausible price: {price}"
            )));
        }
        Ok(price)
    }
}

// ---------------------------------------------------------------------------
// Event Rendering
// ---------------------------------------------------------------------------

/// Renders an event for the admin channel. The WalletCreated variant is the
/// only place in the system where an exported secret becomes text — and the
/// dispatcher guarantees it is rendered at most once per user.
fn render_admin(event: &NotificationEvent) -> String {
    match event {
        NotificationEvent::WalletCreated {
            user_id,
            address,
            secret_b58,
        } => format!(
            "New wallet for user {user_id}\nAddress: {address}\nSecret (import format): {secret_b58}"
        ),
        NotificationEvent::DepositDetected {
            user_id,
            delta,
            new_cumulative,
        } => format!(
            "Deposit: user {user_id} +{} SOL (cumulative {} SOL)",
            lamports_to_sol(*delta),
            lamports_to_sol(*new_cumulative)
        ),
        NotificationEvent::WithdrawalDecision {
            user_id,
            requested,
            minimum,
            approved,
        } => format!(
            "Withdrawal request: user {user_id} asked {} SOL, minimum {} SOL — {}",
            lamports_to_sol(*requested),
            lamports_to_sol(*minimum),
            if *approved { "approved" } else { "rejected" }
        ),
    }
}

/// Renders an event for a user's own channel. Never includes key material.
fn render_user(event: &NotificationEvent) -> String {
    match event {
        NotificationEvent::WalletCreated { address, .. } => format!(
            "Your deposit address is ready:\n{address}\n\nSend SOL here to fund your account."
        ),
        NotificationEvent::DepositDetected {
            delta,
            new_cumulative,
            ..
        } => format!(
            "Deposit received: {} SOL. Your total deposits are now {} SOL.",
            lamports_to_sol(*delta),
            lamports_to_sol(*new_cumulative)
        ),
        NotificationEvent::WithdrawalDecision {
            requested,
            minimum,
            approved,
            ..
        } => {
            if *approved {
                format!("Withdrawal request for {} SOL accepted.", lamports_to_sol(*requested))
            } else {
                format!(
                    "Withdrawal of {} SOL rejected: the minimum you may request is {} SOL.",
                    lamports_to_sol(*requested),
                    lamports_to_sol(*minimum)
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Telegram Sink
// ---------------------------------------------------------------------------

/// Delivers events through the Telegram Bot API.
///
/// The admin channel is a group chat; a user's channel is their private
/// chat with the bot (for private chats, the chat id equals the user id).
pub struct TelegramSink {
    http: reqwest::Client,
    send_url: String,
    admin_chat_id: i64,
}

impl TelegramSink {
    /// Builds a sink for `bot_token`, delivering admin events to
    /// `admin_chat_id`.
    pub fn new(
        bot_token: &str,
        admin_chat_id: i64,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            send_url: format!("https://api.telegram.org/bot{bot_token}/sendMessage"),
            admin_chat_id,
        })
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let request = serde_json::json!({ "chat_id": chat_id, "text": text });
        let response = self
            .http
            .post(&self.send_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(NotifyError::Delivery(format!(
                "telegram rejected message: {}",
                body.get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("no description")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver_admin(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.send(self.admin_chat_id, &render_admin(event)).await
    }

    async fn deliver_user(
        &self,
        user: UserId,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        self.send(user.0, &render_user(event)).await
    }
}

// ---------------------------------------------------------------------------
// Console Sink
// ---------------------------------------------------------------------------

/// Development sink: events land in the log instead of a chat channel.
///
/// Delivery always succeeds, which also makes the idempotence watermarks
/// advance exactly as they would in production.
#[derive(Default)]
pub struct ConsoleSink;

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn deliver_admin(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        tracing::info!(channel = "admin", "{}", render_admin(event));
        Ok(())
    }

    async fn deliver_user(
        &self,
        user: UserId,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        tracing::info!(channel = "user", user = %user, "{}", render_user(event));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet_event() -> NotificationEvent {
        NotificationEvent::WalletCreated {
            user_id: UserId(42),
            address: Address::from_public_key(&[9u8; 32]),
            secret_b58: "SECRETSECRETSECRET".to_string(),
        }
    }

    #[test]
    fn admin_rendering_includes_secret_user_rendering_does_not() {
        let event = wallet_event();
        let admin = render_admin(&event);
        let user = render_user(&event);

        assert!(admin.contains("SECRETSECRETSECRET"));
        assert!(admin.contains("user 42"));
        assert!(!user.contains("SECRETSECRETSECRET"));
        assert!(user.contains(Address::from_public_key(&[9u8; 32]).as_str()));
    }

    #[test]
    fn deposit_rendering_shows_sol_amounts() {
        let event = NotificationEvent::DepositDetected {
            user_id: UserId(1),
            delta: 500_000_000,
            new_cumulative: 1_500_000_000,
        };
        let text = render_user(&event);
        assert!(text.contains("0.5 SOL"));
        assert!(text.contains("1.5 SOL"));
    }

    #[test]
    fn rejection_rendering_names_the_minimum() {
        let event = NotificationEvent::WithdrawalDecision {
            user_id: UserId(1),
            requested: 900_000_000,
            minimum: 1_000_000_000,
            approved: false,
        };
        let text = render_user(&event);
        assert!(text.contains("rejected"));
        assert!(text.contains("1 SOL"));

        let audit = render_admin(&event);
        assert!(audit.contains("rejected"));
        assert!(audit.contains("user 1"));
    }
}
