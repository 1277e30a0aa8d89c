//! # Backend and collaborator contracts
//!
//! This module defines the interfaces that the payout engine needs from the outside world.
//!
//! ## Persistence
//! Database backends implement three traits, which are unified by [`PayoutDatabase`]:
//!
//! * [`PayoutManagement`] stores payouts and applies their state changes. Every change to a payout is a single atomic
//!   write that only succeeds if the payout is still in the state the writer read it in.
//! * [`ProcessorManagement`] stores the configuration of the automated transfer senders.
//! * [`StoreManagement`] exposes how each store pays out on each rail.
//!
//! The methods return `Send` futures, so that the engine can call them from spawned background workers.
//!
//! ## Ledger
//! [`LedgerClient`] and [`OnChainWallet`] are the engine's view of a blockchain node and of the hot wallets that fund
//! payouts. They are object safe, since rails are resolved at runtime.
mod data_objects;
mod ledger;
mod payout_management;
mod processor_management;
mod store_management;

pub use data_objects::PayoutQueryFilter;
pub use ledger::{BroadcastResult, LedgerClient, LedgerError, LedgerTransaction, OnChainWallet, PayoutOutput};
pub use payout_management::{PayoutDatabaseError, PayoutManagement};
pub use processor_management::ProcessorManagement;
pub use store_management::StoreManagement;

/// The complete set of behaviour a database backend must provide to run the payout engine.
pub trait PayoutDatabase: PayoutManagement + ProcessorManagement + StoreManagement {
    /// The URL of the database
    fn url(&self) -> &str;
}
