//! # Payout engine public API
//!
//! The `payout_api` module exposes the programmatic API for the payout engine. HTTP controllers, CLIs and tests talk
//! to the engine through it rather than through the database directly.
//!
//! * [`payouts_api`] turns claims into payouts, and lets operators cancel payouts or mark them as paid by hand.
//! * [`payout_objects`] holds the request types.
//!
//! # API usage
//!
//! An API instance is created by supplying a database backend that implements the backend traits required by the API,
//! and the registry of payout handlers.
//!
//! ```rust,ignore
//! use payout_engine::{PayoutApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let api = PayoutApi::new(db, handlers);
//! let payout = api.claim(request).await?;
//! ```
pub mod errors;
pub mod payout_objects;
pub mod payouts_api;
