//! # Payout server
//! Runs the payout engine against a bitcoin node. It:
//! * keeps the automated transfer processors running, so that approved payouts are paid from each store's hot wallet,
//! * watches the chain and reconciles in-flight payouts whenever a new block arrives,
//! * talks to the node over JSON-RPC ([`bitcoind`]).
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
pub mod bitcoind;
pub mod chain_watcher;
pub mod cli;
pub mod config;
pub mod errors;
pub mod server;
