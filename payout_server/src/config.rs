use std::{env, str::FromStr, time::Duration};

use bitcoin::Network;
use log::*;
use pse_common::{
    helpers::{parse_boolean_flag, parse_interval_secs},
    Secret,
};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/payouts.db";
const DEFAULT_BITCOIND_URL: &str = "http://127.0.0.1:8332";
const DEFAULT_CHAIN_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_EVENT_BUFFER_SIZE: usize = 25;
const DEFAULT_MIN_CONFIRMATIONS: u32 = 1;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub database_url: String,
    /// The bitcoin network that payout destinations must belong to.
    pub network: Network,
    pub bitcoind: BitcoindConfig,
    /// How often the chain watcher asks the node for its tip height.
    pub chain_poll_interval: Duration,
    pub event_buffer_size: usize,
    /// Confirmations a payout transaction needs before the payout is completed.
    pub min_confirmations: u32,
    /// If true, the on-chain handler refuses new claims. Payouts already in flight are still reconciled.
    pub read_only_wallet: bool,
}

#[derive(Clone, Debug, Default)]
pub struct BitcoindConfig {
    pub url: String,
    pub user: String,
    pub password: Secret<String>,
    /// A descriptor wallet on the node that claim destinations are imported into, so that payments to them can be
    /// seen. If not set, destinations are not tracked.
    pub watch_wallet: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            network: Network::Bitcoin,
            bitcoind: BitcoindConfig { url: DEFAULT_BITCOIND_URL.to_string(), ..Default::default() },
            chain_poll_interval: DEFAULT_CHAIN_POLL_INTERVAL,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            read_only_wallet: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("PSE_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ PSE_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let network = env::var("PSE_NETWORK")
            .map_err(|_| info!("🪛️ PSE_NETWORK is not set. Using mainnet."))
            .and_then(|s| {
                parse_network(&s).ok_or_else(|| error!("🪛️ {s} is not a valid network for PSE_NETWORK. Using mainnet."))
            })
            .unwrap_or(Network::Bitcoin);
        let bitcoind = BitcoindConfig::from_env_or_default();
        let chain_poll_interval = env::var("PSE_CHAIN_POLL_INTERVAL")
            .ok()
            .and_then(|s| {
                parse_interval_secs(&s).or_else(|| {
                    warn!("🪛️ Invalid configuration value for PSE_CHAIN_POLL_INTERVAL: {s}");
                    None
                })
            })
            .unwrap_or(DEFAULT_CHAIN_POLL_INTERVAL);
        let event_buffer_size = parse_or_default("PSE_EVENT_BUFFER_SIZE", DEFAULT_EVENT_BUFFER_SIZE).max(1);
        let min_confirmations = parse_or_default("PSE_MIN_CONFIRMATIONS", DEFAULT_MIN_CONFIRMATIONS).max(1);
        let read_only_wallet = parse_boolean_flag(env::var("PSE_READ_ONLY_WALLET").ok(), false);
        if read_only_wallet {
            warn!("🪛️ The on-chain wallet is read-only. New claims will be refused.");
        }
        Self {
            database_url,
            network,
            bitcoind,
            chain_poll_interval,
            event_buffer_size,
            min_confirmations,
            read_only_wallet,
        }
    }
}

impl BitcoindConfig {
    pub fn from_env_or_default() -> Self {
        let url = env::var("PSE_BITCOIND_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ PSE_BITCOIND_URL is not set. Using the default, {DEFAULT_BITCOIND_URL}.");
            DEFAULT_BITCOIND_URL.to_string()
        });
        let user = env::var("PSE_BITCOIND_USER").ok().unwrap_or_else(|| {
            error!("🪛️ PSE_BITCOIND_USER is not set. Please set it to the RPC user of your bitcoin node.");
            String::default()
        });
        let password = env::var("PSE_BITCOIND_PASSWORD").ok().unwrap_or_else(|| {
            error!("🪛️ PSE_BITCOIND_PASSWORD is not set. Please set it to the RPC password of your bitcoin node.");
            String::default()
        });
        let watch_wallet = env::var("PSE_WATCH_WALLET").ok().filter(|s| !s.trim().is_empty());
        if watch_wallet.is_none() {
            info!("🪛️ PSE_WATCH_WALLET is not set. Claim destinations will not be imported into the node.");
        }
        Self { url, user, password: Secret::new(password), watch_wallet }
    }
}

/// Accepts the names bitcoind uses (`main`, `test`, `regtest`, ...) as well as the `bitcoin` crate's.
pub fn parse_network(s: &str) -> Option<Network> {
    match s.trim().to_ascii_lowercase().as_str() {
        "main" | "mainnet" => Some(Network::Bitcoin),
        "test" | "testnet3" => Some(Network::Testnet),
        s => Network::from_str(s).ok(),
    }
}

fn parse_or_default<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("🪛️ Invalid configuration value for {name}: {s}. Using the default, {default}.");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn network_names() {
        assert_eq!(parse_network("main"), Some(Network::Bitcoin));
        assert_eq!(parse_network("bitcoin"), Some(Network::Bitcoin));
        assert_eq!(parse_network(" Test "), Some(Network::Testnet));
        assert_eq!(parse_network("regtest"), Some(Network::Regtest));
        assert_eq!(parse_network("signet"), Some(Network::Signet));
        assert_eq!(parse_network("moon"), None);
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.network, Network::Bitcoin);
        assert_eq!(config.min_confirmations, 1);
        assert_eq!(config.chain_poll_interval, Duration::from_secs(30));
        assert_eq!(format!("{:?}", config.bitcoind.password), "****");
    }
}
