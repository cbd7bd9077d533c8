//! # Seed Vault
//!
//! One master mnemonic backs every custodial wallet the bot hands out. This
//! module is the only place that secret is allowed to exist: parsed once at
//! startup, held in memory for the process lifetime, and exposed solely to
//! the key-derivation function.
//!
//! ## Rules
//!
//! - A malformed mnemonic is a **fatal startup error**. There is no partial
//!   operation without the seed, and no per-call fallback.
//! - The seed is never serialized, never written to the store, and never
//!   logged. The `Debug` impl redacts; `Serialize` is deliberately absent.
//! - Reads are unsynchronized and concurrent-safe: the seed is immutable
//!   after construction.

use bip39::Mnemonic;
use std::fmt;
use thiserror::Error;

/// Errors from master seed construction.
///
/// Intentionally vague about *what* was wrong with the phrase — error
/// messages travel into logs, and logs are not a place to reconstruct
/// secrets from.
#[derive(Debug, Error)]
pub enum SeedError {
    /// The phrase failed BIP-39 validation (word list, checksum, or length).
    #[error("mnemonic failed BIP-39 validation")]
    InvalidMnemonic,
}

/// The process-wide master secret, derived from a BIP-39 mnemonic.
///
/// Holds the 64-byte BIP-39 seed (mnemonic + empty passphrase). Everything
/// the engine custodies is regenerable from this value plus a derivation
/// index — which is exactly why it must never leave this struct.
pub struct MasterSeed {
    seed: [u8; 64],
}

impl MasterSeed {
    /// Parses and validates a mnemonic phrase, producing the master seed.
    ///
    /// Word count, word list membership, and checksum are all enforced by
    /// the BIP-39 parser. Call this once during startup; a failure here
    /// must abort the process.
    pub fn from_phrase(phrase: &str) -> Result<Self, SeedError> {
        let mnemonic = Mnemonic::parse(phrase.trim()).map_err(|_| SeedError::InvalidMnemonic)?;
        Ok(Self {
            seed: mnemonic.to_seed(""),
        })
    }

    /// Raw seed bytes, for the key-derivation function only.
    ///
    /// Crate-private on purpose: no public API ever returns seed material.
    pub(crate) fn bytes(&self) -> &[u8; 64] {
        &self.seed
    }
}

impl fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print seed material. Not even "partially" — a partial leak
        // is still a leak.
        write!(f, "MasterSeed(<redacted>)")
    }
}
