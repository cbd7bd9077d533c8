//! # Shared Types
//!
//! The small vocabulary the whole engine speaks: user identifiers, lamport
//! amounts, and on-chain addresses. Kept deliberately thin — these are
//! identifiers and quantities, not behavior.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// All on-chain amounts are lamports. `u64` everywhere; no floating point
/// in ledger arithmetic.
pub type Lamports = u64;

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Opaque, stable identifier assigned by the chat platform.
///
/// This is the primary key for everything: wallet records, ledger entries,
/// lock registries. The engine never interprets it — `i64` because that is
/// what the upstream platform hands out.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Big-endian byte encoding, used as the sled key for this user's
    /// wallet record and ledger entry.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Inverse of [`to_key`](Self::to_key).
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(Self(i64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Errors from parsing an on-chain address string.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The string is not valid base58.
    #[error("address is not valid base58")]
    NotBase58,

    /// The decoded payload is not a 32-byte public key.
    #[error("address decodes to {0} bytes, expected 32")]
    WrongLength(usize),
}

/// A base58-encoded Ed25519 public key — the wallet's on-chain identity.
///
/// Always safe to share, log, and persist. The corresponding private key is
/// never stored; it is re-derived from the master seed and the wallet's
/// derivation index whenever it is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Encodes a raw 32-byte public key as a base58 address.
    pub fn from_public_key(bytes: &[u8; 32]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    /// Parses and validates a base58 address string.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::NotBase58)?;
        if decoded.len() != 32 {
            return Err(AddressError::WrongLength(decoded.len()));
        }
        Ok(Self(s.to_string()))
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
