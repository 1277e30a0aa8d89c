use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Network;
use log::*;

use super::{reconciliation::sweep_in_progress_payouts, PayoutHandler, PayoutHandlerError, SweepReport};
use crate::{
    db_types::{Payout, PayoutMethodId},
    destinations::{
        parse_claim_destination,
        validate_claim_destination,
        ClaimConstraints,
        ClaimDestination,
        ClaimDestinationError,
        ClaimPolicy,
        MinimumAmountPolicy,
        BITCOIN_URI_SCHEME,
    },
    events::{LedgerEvent, LedgerEventKind},
    proof::{PayoutProof, ProofError},
    traits::{LedgerClient, PayoutManagement},
};

/// The payout handler for on-chain bitcoin payouts.
pub struct OnChainPayoutHandler<B> {
    db: B,
    rail: PayoutMethodId,
    network: Network,
    ledger: Arc<dyn LedgerClient>,
    policy: Arc<dyn ClaimPolicy>,
    read_only: bool,
    minimum_confirmation: u32,
}

impl<B> OnChainPayoutHandler<B> {
    pub fn new(db: B, rail: PayoutMethodId, network: Network, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            db,
            rail,
            network,
            ledger,
            policy: Arc::new(MinimumAmountPolicy::default()),
            read_only: false,
            minimum_confirmation: 1,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ClaimPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// A handler whose wallet cannot sign refuses its rail.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_minimum_confirmation(mut self, confirmations: u32) -> Self {
        self.minimum_confirmation = confirmations;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }
}

#[async_trait]
impl<B: PayoutManagement> PayoutHandler for OnChainPayoutHandler<B> {
    fn payout_method_id(&self) -> &PayoutMethodId {
        &self.rail
    }

    fn can_handle(&self, rail: &PayoutMethodId) -> bool {
        !self.read_only && rail == &self.rail
    }

    fn default_minimum_confirmation(&self) -> u32 {
        self.minimum_confirmation
    }

    fn parse_claim_destination(&self, raw: &str) -> Result<ClaimDestination, ClaimDestinationError> {
        parse_claim_destination(raw, BITCOIN_URI_SCHEME, self.network)
    }

    fn validate_claim_destination(
        &self,
        destination: &ClaimDestination,
        constraints: &ClaimConstraints,
    ) -> Result<(), ClaimDestinationError> {
        validate_claim_destination(destination, constraints, self.policy.as_ref())
    }

    async fn track_claim(&self, destination: &ClaimDestination) -> Result<(), PayoutHandlerError> {
        self.ledger.track_address(destination.address()).await?;
        trace!("🎯️ Tracking {} on {}", destination.address(), self.rail);
        Ok(())
    }

    fn start_background_check(&self) -> Vec<LedgerEventKind> {
        vec![LedgerEventKind::NewBlock, LedgerEventKind::NewOnChainTransaction]
    }

    async fn background_check(&self, event: &LedgerEvent) -> Result<SweepReport, PayoutHandlerError> {
        if event.rail() != &self.rail {
            return Err(PayoutHandlerError::UnsupportedEvent { handler: self.rail.clone(), event: event.clone() });
        }
        trace!("🔁️ Sweeping {} after {event}", self.rail);
        let report = sweep_in_progress_payouts(&self.db, &self.rail, self.ledger.as_ref()).await?;
        Ok(report)
    }

    fn parse_proof(&self, payout: &Payout) -> Result<Option<PayoutProof>, ProofError> {
        payout.proof.as_ref().map(PayoutProof::from_value).transpose()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::Txid;
    use pse_common::Satoshis;

    use super::*;
    use crate::{
        db_types::{NewPayout, PayoutState, StoreId},
        proof::OnChainPayoutProof,
        test_utils::{FakeLedger, MemoryDatabase},
    };

    const ADDRESS: &str = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";

    fn handler(db: MemoryDatabase, ledger: FakeLedger) -> OnChainPayoutHandler<MemoryDatabase> {
        OnChainPayoutHandler::new(db, PayoutMethodId::on_chain("BTC"), Network::Regtest, Arc::new(ledger))
    }

    #[test]
    fn read_only_handlers_refuse_their_rail() {
        let h = handler(MemoryDatabase::default(), FakeLedger::default());
        assert!(h.can_handle(&PayoutMethodId::on_chain("BTC")));
        assert!(!h.can_handle(&PayoutMethodId::lightning("BTC")));
        let h = h.read_only(true);
        assert!(!h.can_handle(&PayoutMethodId::on_chain("BTC")));
    }

    #[tokio::test]
    async fn claims_are_tracked() {
        let ledger = FakeLedger::default();
        let h = handler(MemoryDatabase::default(), ledger.clone());
        let dest = h.parse_claim_destination(ADDRESS).unwrap();
        h.validate_claim_destination(&dest, &ClaimConstraints { amount: Satoshis::from(10_000) }).unwrap();
        h.track_claim(&dest).await.unwrap();
        assert_eq!(ledger.tracked_addresses(), vec![ADDRESS.to_string()]);
    }

    #[tokio::test]
    async fn background_check_sweeps_the_rail() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        let txid = Txid::from_str(&"ab".repeat(32)).unwrap();
        ledger.add_transaction(txid, 1);
        let new =
            NewPayout::new(StoreId::from("s"), PayoutMethodId::on_chain("BTC"), ADDRESS.into(), Satoshis::from(5_000));
        let proof = PayoutProof::from(OnChainPayoutProof::with_candidate(txid)).to_value();
        let payout = db.seed_payout(new, PayoutState::InProgress, Some(proof));
        let h = handler(db.clone(), ledger);
        assert_eq!(h.start_background_check().len(), 2);

        let wrong_rail = LedgerEvent::new_block(PayoutMethodId::on_chain("LTC"));
        assert!(matches!(h.background_check(&wrong_rail).await, Err(PayoutHandlerError::UnsupportedEvent { .. })));

        let report = h.background_check(&LedgerEvent::new_block(PayoutMethodId::on_chain("BTC"))).await.unwrap();
        assert_eq!(report.completed, 1);
        let payout = db.payout(payout.id).unwrap();
        let proof = h.parse_proof(&payout).unwrap().unwrap().into_on_chain().unwrap();
        assert!(proof.is_settled());
    }
}
