use pse_common::Satoshis;
use thiserror::Error;

use crate::{
    db_types::{PayoutMethodId, PayoutState},
    destinations::ClaimDestinationError,
    handlers::PayoutHandlerError,
    proof::ProofError,
    traits::PayoutDatabaseError,
};

#[derive(Debug, Error)]
pub enum PayoutApiError {
    #[error("No payout handler is available for {0}")]
    UnsupportedPayoutMethod(PayoutMethodId),
    #[error("Invalid claim amount: {0}")]
    InvalidAmount(Satoshis),
    #[error("Invalid claim destination. {0}")]
    InvalidDestination(#[from] ClaimDestinationError),
    #[error("Payout handler error. {0}")]
    HandlerError(#[from] PayoutHandlerError),
    #[error("Invalid payout proof. {0}")]
    InvalidProof(#[from] ProofError),
    #[error("Database error: {0}")]
    DatabaseError(#[from] PayoutDatabaseError),
    #[error("Payout #{0} does not exist")]
    PayoutNotFound(i64),
    #[error("Payout #{id} is already {state}")]
    PayoutIsFinal { id: i64, state: PayoutState },
}
