use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Network;
use log::*;

use super::{
    sender::{AutomatedTransferSender, PayoutFailure, SendContext, SenderError, TransferSender},
    PayoutProcessorFactory,
    ProcessorError,
    ProcessorHandle,
};
use crate::{
    db_types::{Payout, PayoutMethodId, PayoutState, TransferProcessorData},
    destinations::{parse_claim_destination, BITCOIN_URI_SCHEME},
    events::{EventProducers, LedgerEvent},
    proof::{OnChainPayoutProof, PayoutProof},
    traits::{OnChainWallet, PayoutDatabase, PayoutOutput},
};

pub const ON_CHAIN_PROCESSOR: &str = "OnChainAutomatedTransferSender";

/// Pays a batch of on-chain payouts with a single transaction from the store's hot wallet.
pub struct OnChainTransferSender<B> {
    db: B,
    wallet: Arc<dyn OnChainWallet>,
    network: Network,
    producers: EventProducers,
}

impl<B> OnChainTransferSender<B> {
    pub fn new(db: B, wallet: Arc<dyn OnChainWallet>, network: Network, producers: EventProducers) -> Self {
        Self { db, wallet, network, producers }
    }
}

#[async_trait]
impl<B: PayoutDatabase> TransferSender for OnChainTransferSender<B> {
    async fn send_payouts(&self, context: &SendContext, payouts: &[Payout]) -> Result<Vec<PayoutFailure>, SenderError> {
        let mut failures = Vec::new();
        let mut outputs = Vec::with_capacity(payouts.len());
        let mut batch = Vec::with_capacity(payouts.len());
        for payout in payouts {
            match parse_claim_destination(&payout.destination, BITCOIN_URI_SCHEME, self.network) {
                Ok(destination) => {
                    outputs.push(PayoutOutput {
                        payout_id: payout.id,
                        address: destination.address().clone(),
                        amount: payout.amount,
                    });
                    batch.push(payout);
                },
                Err(e) => failures.push(PayoutFailure::new(payout.id, e)),
            }
        }
        if outputs.is_empty() {
            return Ok(failures);
        }
        let wallet = context.payment_method.wallet.as_str();
        let txid = match self.wallet.send_many(wallet, &outputs).await {
            Ok(txid) => txid,
            Err(e) => {
                warn!("💸️ Wallet '{wallet}' could not pay {} payouts. {e}", outputs.len());
                failures.extend(batch.iter().map(|p| PayoutFailure::new(p.id, &e)));
                return Ok(failures);
            },
        };
        info!("💸️ Wallet '{wallet}' paid {} payouts in transaction {txid}", outputs.len());
        let proof = PayoutProof::from(OnChainPayoutProof::with_candidate(txid)).to_value();
        for payout in batch {
            let mut paid = payout.clone();
            paid.state = PayoutState::InProgress;
            paid.proof = Some(proof.clone());
            if let Err(e) = self.db.update_payout(&paid, PayoutState::AwaitingPayment).await {
                error!(
                    "💸️ Payout #{} was paid in transaction {txid} but could not be marked as in progress. It must be \
                     reconciled by hand. {e}",
                    payout.id
                );
            }
        }
        let rail = context.processor.payout_method_id.clone();
        self.producers.publish_ledger_event(LedgerEvent::new_transaction(rail, txid)).await;
        Ok(failures)
    }
}

/// Builds [`OnChainTransferSender`] workers.
pub struct OnChainProcessorFactory<B> {
    db: B,
    wallet: Arc<dyn OnChainWallet>,
    network: Network,
    producers: EventProducers,
    payout_methods: Vec<PayoutMethodId>,
}

impl<B> OnChainProcessorFactory<B> {
    pub fn new(
        db: B,
        wallet: Arc<dyn OnChainWallet>,
        network: Network,
        producers: EventProducers,
        payout_methods: Vec<PayoutMethodId>,
    ) -> Self {
        Self { db, wallet, network, producers, payout_methods }
    }
}

impl<B: PayoutDatabase> PayoutProcessorFactory for OnChainProcessorFactory<B> {
    fn processor_name(&self) -> &str {
        ON_CHAIN_PROCESSOR
    }

    fn supported_payout_methods(&self) -> Vec<PayoutMethodId> {
        self.payout_methods.clone()
    }

    fn construct(&self, config: TransferProcessorData) -> Result<ProcessorHandle, ProcessorError> {
        if !self.payout_methods.contains(&config.payout_method_id) {
            return Err(ProcessorError::UnsupportedPayoutMethod {
                processor: ON_CHAIN_PROCESSOR.to_string(),
                method: config.payout_method_id,
            });
        }
        let sender =
            OnChainTransferSender::new(self.db.clone(), Arc::clone(&self.wallet), self.network, self.producers.clone());
        let worker = AutomatedTransferSender::new(self.db.clone(), config, sender);
        Ok(ProcessorHandle::spawn(move |cancel| worker.run(cancel)))
    }
}
