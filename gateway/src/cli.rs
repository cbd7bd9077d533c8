//! # CLI Interface
//!
//! Defines the command-line argument structure for `helio-gateway` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `snapshot`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use helio_engine::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT};

/// HELIO custody gateway.
///
/// Runs the custodial wallet service: derives one wallet per chat user
/// from the master mnemonic, polls the chain for deposits, serves the
/// intent HTTP API, and delivers notifications to the admin channel.
#[derive(Parser, Debug)]
#[command(
    name = "helio-gateway",
    about = "HELIO custody gateway",
    version,
    propagate_version = true
)]
pub struct HelioCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the gateway binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the custody service.
    Run(RunArgs),
    /// Initialize a data directory and generate a fresh master mnemonic.
    Init(InitArgs),
    /// Dump the ledger as human-inspectable JSON lines and exit.
    Snapshot(SnapshotArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the data directory holding the ledger database and the
    /// seed phrase file. Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "HELIO_DATA_DIR", default_value = "~/.helio")]
    pub data_dir: PathBuf,

    /// The master mnemonic phrase.
    ///
    /// When omitted, the service reads `seed.phrase` from the data
    /// directory. **Never pass this flag on a shared machine** — it lands
    /// in shell history; prefer the environment variable or the file.
    #[arg(long, env = "HELIO_MNEMONIC", hide_env_values = true)]
    pub mnemonic: Option<String>,

    /// Chain JSON-RPC endpoint for balance queries.
    #[arg(
        long,
        env = "HELIO_RPC_URL",
        default_value = "https://api.mainnet-beta.solana.com"
    )]
    pub rpc_url: String,

    /// Price-quote endpoint returning the current USD price of SOL.
    #[arg(
        long,
        env = "HELIO_QUOTE_URL",
        default_value = "https://api.coingecko.com/api/v3/simple/price?ids=solana&vs_currencies=usd"
    )]
    pub quote_url: String,

    /// Port for the intent-facing HTTP API.
    #[arg(long, env = "HELIO_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "HELIO_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Seconds between balance sweeps over all known wallets.
    #[arg(long, env = "HELIO_POLL_INTERVAL_SECS", default_value_t = 30)]
    pub poll_interval_secs: u64,

    /// Telegram bot token for notification delivery. When omitted,
    /// notifications are written to the log instead.
    #[arg(long, env = "HELIO_TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Chat id of the admin group that receives wallet announcements and
    /// audit lines. Required when a bot token is configured.
    #[arg(long, env = "HELIO_ADMIN_CHAT_ID", allow_hyphen_values = true)]
    pub admin_chat_id: Option<i64>,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "HELIO_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "HELIO_DATA_DIR", default_value = "~/.helio")]
    pub data_dir: PathBuf,
}

/// Arguments for the `snapshot` subcommand.
#[derive(Parser, Debug)]
pub struct SnapshotArgs {
    /// Path to the data directory holding the ledger database.
    #[arg(long, short = 'd', env = "HELIO_DATA_DIR", default_value = "~/.helio")]
    pub data_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        HelioCli::command().debug_assert();
    }

    #[test]
    fn run_defaults_apply() {
        let cli = HelioCli::parse_from(["helio-gateway", "run"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.api_port, DEFAULT_API_PORT);
                assert_eq!(args.poll_interval_secs, 30);
                assert!(args.mnemonic.is_none());
            }
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn negative_admin_chat_id_parses() {
        // Telegram group ids are negative — the flag must accept them.
        let cli = HelioCli::parse_from([
            "helio-gateway",
            "run",
            "--admin-chat-id",
            "-1002762295115",
        ]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.admin_chat_id, Some(-1002762295115)),
            other => panic!("expected run, got {:?}", other),
        }
    }
}
