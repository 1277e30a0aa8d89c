use std::future::Future;

use thiserror::Error;

use crate::{
    db_types::{NewPayout, Payout, PayoutState},
    traits::PayoutQueryFilter,
};

#[derive(Debug, Error)]
pub enum PayoutDatabaseError {
    #[error("Database driver error: {0}")]
    DriverError(#[from] sqlx::Error),
    #[error("Could not run database migrations: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Payout #{0} does not exist")]
    PayoutNotFound(i64),
    #[error("Payout #{id} is no longer {expected}. Another writer changed it first.")]
    StateConflict { id: i64, expected: PayoutState },
    #[error("Payout #{id} cannot move from {from} to {to}")]
    InvalidTransition { id: i64, from: PayoutState, to: PayoutState },
    #[error("Invalid payout amount: {0}")]
    InvalidAmount(String),
    #[error("Could not (de)serialize a JSON document: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Storage of payouts.
///
/// Payouts are never deleted. They are created in `AwaitingPayment`, and from then on only change through
/// [`PayoutManagement::update_payout`].
pub trait PayoutManagement: Clone + Send + Sync + 'static {
    /// Stores a new payout in the `AwaitingPayment` state and returns the stored record.
    fn insert_payout(&self, payout: NewPayout) -> impl Future<Output = Result<Payout, PayoutDatabaseError>> + Send;

    fn fetch_payout(&self, id: i64) -> impl Future<Output = Result<Option<Payout>, PayoutDatabaseError>> + Send;

    /// Fetches the payouts matching `filter`, ordered by creation date, oldest first.
    fn search_payouts(
        &self,
        filter: PayoutQueryFilter,
    ) -> impl Future<Output = Result<Vec<Payout>, PayoutDatabaseError>> + Send;

    /// Writes the state, blob and proof of `payout` in one atomic update.
    ///
    /// The write only happens if the stored payout is still in the `expected` state, and `expected` may transition to
    /// `payout.state`. Otherwise [`PayoutDatabaseError::StateConflict`] or
    /// [`PayoutDatabaseError::InvalidTransition`] is returned and nothing changes. The blob revision is incremented
    /// as part of the write, and the stored record is returned.
    fn update_payout(
        &self,
        payout: &Payout,
        expected: PayoutState,
    ) -> impl Future<Output = Result<Payout, PayoutDatabaseError>> + Send;
}
