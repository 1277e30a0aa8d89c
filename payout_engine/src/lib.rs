//! Payout Engine
//!
//! The payout engine settles approved payouts of a self-hosted bitcoin payment processor. It turns a claim against a
//! pull payment into a payout, pays it from the store's hot wallet, and keeps watching the ledger until the payment is
//! confirmed, rolling the payout back if its transaction disappears or is replaced.
//!
//! The library is divided into these main sections:
//! 1. Data types ([`mod@db_types`]), payout proofs ([`mod@proof`]) and claim destinations ([`mod@destinations`]).
//! 2. Backend traits ([`mod@traits`]) for persistence and for the ledger. A SQLite backend is provided.
//! 3. Payout handlers ([`mod@handlers`]), one per payment rail, including the on-chain reconciliation sweep.
//! 4. Automated transfer processors ([`mod@processors`]) and the supervisor that keeps them running.
//! 5. The public API ([`PayoutApi`]).
//!
//! Ledger events (new blocks, new transactions) are delivered to the handlers through the [`mod@events`] module, one
//! at a time.
pub mod db_types;
pub mod destinations;
pub mod events;
pub mod handlers;
mod payout_api;
pub mod processors;
pub mod proof;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use handlers::{OnChainPayoutHandler, PayoutHandler, PayoutHandlers};
pub use payout_api::{errors::PayoutApiError, payout_objects, payouts_api::PayoutApi};
pub use processors::{PayoutProcessorService, ProcessorChange, ProcessorChangeResult};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{PayoutDatabase, PayoutDatabaseError};
