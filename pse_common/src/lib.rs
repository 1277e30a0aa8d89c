//! Primitives shared by the payout engine and the payout server.
mod satoshis;

pub mod helpers;
pub mod op;
mod secret;

pub use satoshis::{Satoshis, SatoshisConversionError, BTC_CURRENCY_CODE, SATS_PER_BTC};
pub use secret::Secret;
