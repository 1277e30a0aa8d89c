use std::fmt::Debug;

use log::*;

use super::{errors::PayoutApiError, payout_objects::ClaimRequest};
use crate::{
    db_types::{NewPayout, Payout, PayoutState},
    destinations::ClaimConstraints,
    handlers::PayoutHandlers,
    proof::{ManualPayoutProof, PayoutProof},
    traits::{PayoutDatabase, PayoutQueryFilter},
};

/// `PayoutApi` accepts claims and manages the lifecycle of the resulting payouts. Paying them is left to the automated
/// transfer processors.
pub struct PayoutApi<B> {
    db: B,
    handlers: PayoutHandlers,
}

impl<B> Debug for PayoutApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PayoutApi")
    }
}

impl<B> PayoutApi<B> {
    pub fn new(db: B, handlers: PayoutHandlers) -> Self {
        Self { db, handlers }
    }
}

impl<B> PayoutApi<B>
where B: PayoutDatabase
{
    /// Accepts a claim. The destination is parsed and validated by the rail's handler, which also starts tracking it.
    /// The new payout is `AwaitingPayment`.
    pub async fn claim(&self, request: ClaimRequest) -> Result<Payout, PayoutApiError> {
        let handler = self
            .handlers
            .find(&request.payout_method_id)
            .ok_or_else(|| PayoutApiError::UnsupportedPayoutMethod(request.payout_method_id.clone()))?;
        if !request.amount.is_positive() {
            return Err(PayoutApiError::InvalidAmount(request.amount));
        }
        let destination = handler.parse_claim_destination(&request.destination)?;
        handler.validate_claim_destination(&destination, &ClaimConstraints { amount: request.amount })?;
        handler.track_claim(&destination).await?;
        let mut payout =
            NewPayout::new(request.store_id, request.payout_method_id, destination.to_string(), request.amount)
                .with_minimum_confirmation(handler.default_minimum_confirmation());
        payout.pull_payment_id = request.pull_payment_id;
        payout.blob.metadata = request.metadata;
        let payout = self.db.insert_payout(payout).await?;
        info!("💰️ Payout #{} of {} to {} accepted", payout.id, payout.amount, payout.destination);
        Ok(payout)
    }

    /// Cancels a payout that has not completed yet.
    pub async fn cancel(&self, id: i64) -> Result<Payout, PayoutApiError> {
        let mut payout = self.fetch_open_payout(id).await?;
        let previous = payout.state;
        payout.state = PayoutState::Cancelled;
        let payout = self.db.update_payout(&payout, previous).await?;
        info!("💰️ Payout #{id} cancelled");
        Ok(payout)
    }

    /// Marks a payout as paid by some means outside of this system.
    pub async fn mark_paid(&self, id: i64, proof: ManualPayoutProof) -> Result<Payout, PayoutApiError> {
        let mut payout = self.fetch_open_payout(id).await?;
        let previous = payout.state;
        payout.state = PayoutState::Completed;
        payout.proof = Some(PayoutProof::Manual(proof).to_value());
        let payout = self.db.update_payout(&payout, previous).await?;
        info!("💰️ Payout #{id} was marked as paid manually");
        Ok(payout)
    }

    pub async fn payout(&self, id: i64) -> Result<Option<Payout>, PayoutApiError> {
        let payout = self.db.fetch_payout(id).await?;
        Ok(payout)
    }

    pub async fn payouts(&self, filter: PayoutQueryFilter) -> Result<Vec<Payout>, PayoutApiError> {
        let payouts = self.db.search_payouts(filter).await?;
        Ok(payouts)
    }

    /// Decodes the payout's proof with its rail's handler.
    pub async fn parse_proof(&self, id: i64) -> Result<Option<PayoutProof>, PayoutApiError> {
        let payout = self.db.fetch_payout(id).await?.ok_or(PayoutApiError::PayoutNotFound(id))?;
        let handler = self
            .handlers
            .for_rail(&payout.payout_method_id)
            .ok_or_else(|| PayoutApiError::UnsupportedPayoutMethod(payout.payout_method_id.clone()))?;
        let proof = handler.parse_proof(&payout)?;
        Ok(proof)
    }

    async fn fetch_open_payout(&self, id: i64) -> Result<Payout, PayoutApiError> {
        let payout = self.db.fetch_payout(id).await?.ok_or(PayoutApiError::PayoutNotFound(id))?;
        if payout.state.is_terminal() {
            return Err(PayoutApiError::PayoutIsFinal { id, state: payout.state });
        }
        Ok(payout)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use bitcoin::Network;
    use pse_common::Satoshis;
    use serde_json::json;

    use super::*;
    use crate::{
        db_types::{PayoutMethodId, StoreId},
        destinations::ClaimDestinationError,
        handlers::OnChainPayoutHandler,
        test_utils::{FakeLedger, MemoryDatabase},
        traits::{PayoutDatabaseError, PayoutManagement},
    };

    const ADDRESS: &str = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";

    fn api(ledger: FakeLedger) -> (MemoryDatabase, PayoutApi<MemoryDatabase>) {
        let db = MemoryDatabase::default();
        let mut handlers = PayoutHandlers::new();
        handlers.add(
            OnChainPayoutHandler::new(db.clone(), PayoutMethodId::on_chain("BTC"), Network::Regtest, Arc::new(ledger))
                .with_minimum_confirmation(3),
        );
        (db.clone(), PayoutApi::new(db, handlers))
    }

    fn claim(destination: &str, sats: i64) -> ClaimRequest {
        ClaimRequest::new(StoreId::from("store"), PayoutMethodId::on_chain("BTC"), destination, Satoshis::from(sats))
    }

    #[tokio::test]
    async fn claims_become_payouts() {
        let _ = env_logger::try_init();
        let ledger = FakeLedger::default();
        let (_, api) = api(ledger.clone());
        let mut request = claim(&format!("  bitcoin:{ADDRESS}?amount=0.0005  "), 50_000).with_pull_payment("pp1");
        request.metadata.insert("source".into(), json!("test"));
        let payout = api.claim(request).await.unwrap();
        assert_eq!(payout.state, PayoutState::AwaitingPayment);
        assert_eq!(payout.destination, format!("bitcoin:{ADDRESS}?amount=0.0005"));
        assert_eq!(payout.blob.minimum_confirmation, 3);
        assert_eq!(payout.blob.metadata["source"], json!("test"));
        assert_eq!(payout.pull_payment_id.as_deref(), Some("pp1"));
        assert_eq!(ledger.tracked_addresses(), vec![ADDRESS.to_string()]);
        assert_eq!(api.payout(payout.id).await.unwrap(), Some(payout));
    }

    #[tokio::test]
    async fn invalid_claims_are_rejected() {
        let (db, api) = api(FakeLedger::default());
        let mut lightning = claim(ADDRESS, 50_000);
        lightning.payout_method_id = PayoutMethodId::lightning("BTC");
        assert!(matches!(api.claim(lightning).await, Err(PayoutApiError::UnsupportedPayoutMethod(_))));
        assert!(matches!(api.claim(claim(ADDRESS, 0)).await, Err(PayoutApiError::InvalidAmount(_))));
        assert!(matches!(
            api.claim(claim("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", 50_000)).await,
            Err(PayoutApiError::InvalidDestination(ClaimDestinationError::WrongNetwork { .. }))
        ));
        assert!(matches!(
            api.claim(claim(ADDRESS, 100)).await,
            Err(PayoutApiError::InvalidDestination(ClaimDestinationError::PolicyViolation(_)))
        ));
        assert!(db.search_payouts(PayoutQueryFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_and_mark_paid() {
        let (db, api) = api(FakeLedger::default());
        let a = api.claim(claim(ADDRESS, 10_000)).await.unwrap();
        let b = api.claim(claim(ADDRESS, 20_000)).await.unwrap();

        let cancelled = api.cancel(a.id).await.unwrap();
        assert_eq!(cancelled.state, PayoutState::Cancelled);
        assert!(matches!(api.cancel(a.id).await, Err(PayoutApiError::PayoutIsFinal { .. })));
        assert!(matches!(api.cancel(999).await, Err(PayoutApiError::PayoutNotFound(999))));

        let proof = ManualPayoutProof { id: Some("wire-42".into()), link: None };
        let paid = api.mark_paid(b.id, proof.clone()).await.unwrap();
        assert_eq!(paid.state, PayoutState::Completed);
        assert_eq!(api.parse_proof(b.id).await.unwrap(), Some(PayoutProof::Manual(proof)));
        assert_eq!(api.parse_proof(a.id).await.unwrap(), None);

        let open = api.payouts(PayoutQueryFilter::default().with_state(PayoutState::AwaitingPayment)).await.unwrap();
        assert!(open.is_empty());
        let c = api.claim(claim(ADDRESS, 30_000).with_pull_payment("pp7")).await.unwrap();
        let pulled = api.payouts(PayoutQueryFilter::default().with_pull_payment_id("pp7")).await.unwrap();
        assert_eq!(pulled, vec![c]);

        // A stale copy cannot undo the cancellation
        let err = db.update_payout(&a, PayoutState::AwaitingPayment).await.unwrap_err();
        assert!(matches!(err, PayoutDatabaseError::StateConflict { .. }));
    }
}
