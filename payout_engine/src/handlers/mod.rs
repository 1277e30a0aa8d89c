//! # Payout handlers
//!
//! A payout handler knows everything that is specific to one payment rail: what a destination looks like, how to
//! watch it, what its proofs look like, and which ledger events can move its payouts forward.
//!
//! Handlers are collected in a [`PayoutHandlers`] registry at startup. The rest of the engine only ever talks to a
//! handler through the [`PayoutHandler`] trait, having looked it up by [`PayoutMethodId`].
mod onchain;
mod reconciliation;
mod registry;

use async_trait::async_trait;
pub use onchain::OnChainPayoutHandler;
pub use reconciliation::{reconcile_payout, sweep_in_progress_payouts, SweepReport};
pub use registry::PayoutHandlers;
use thiserror::Error;

use crate::{
    db_types::{Payout, PayoutMethodId},
    destinations::{ClaimConstraints, ClaimDestination, ClaimDestinationError},
    events::{LedgerEvent, LedgerEventKind},
    proof::{PayoutProof, ProofError},
    traits::{LedgerError, PayoutDatabaseError},
};

#[derive(Debug, Error)]
pub enum PayoutHandlerError {
    #[error("Invalid claim destination. {0}")]
    InvalidDestination(#[from] ClaimDestinationError),
    #[error("Invalid payout proof. {0}")]
    InvalidProof(#[from] ProofError),
    #[error("Ledger error. {0}")]
    LedgerError(#[from] LedgerError),
    #[error("Database error. {0}")]
    DatabaseError(#[from] PayoutDatabaseError),
    #[error("The {handler} handler cannot process {event}")]
    UnsupportedEvent { handler: PayoutMethodId, event: LedgerEvent },
}

/// Rail-specific payout behaviour.
#[async_trait]
pub trait PayoutHandler: Send + Sync {
    /// The rail this handler was built for.
    fn payout_method_id(&self) -> &PayoutMethodId;

    /// Whether this handler can currently process payouts on `rail`. A handler may refuse its own rail, e.g. when its
    /// wallet is read-only.
    fn can_handle(&self, rail: &PayoutMethodId) -> bool;

    /// The number of confirmations new payouts on this rail require.
    fn default_minimum_confirmation(&self) -> u32 {
        1
    }

    fn parse_claim_destination(&self, raw: &str) -> Result<ClaimDestination, ClaimDestinationError>;

    fn validate_claim_destination(
        &self,
        destination: &ClaimDestination,
        constraints: &ClaimConstraints,
    ) -> Result<(), ClaimDestinationError>;

    /// Starts watching a destination that has been claimed, so that deposits to it are noticed.
    async fn track_claim(&self, destination: &ClaimDestination) -> Result<(), PayoutHandlerError>;

    /// The ledger events this handler wants to receive through [`PayoutHandler::background_check`].
    fn start_background_check(&self) -> Vec<LedgerEventKind>;

    /// Reconciles this rail's in-flight payouts after a ledger event.
    async fn background_check(&self, event: &LedgerEvent) -> Result<SweepReport, PayoutHandlerError>;

    /// Decodes the payout's proof. Payouts that were never sent have no proof.
    fn parse_proof(&self, payout: &Payout) -> Result<Option<PayoutProof>, ProofError>;
}
