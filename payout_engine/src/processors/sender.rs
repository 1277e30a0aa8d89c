//! The generic automated transfer sender.
//!
//! [`AutomatedTransferSender`] owns the polling loop and the bookkeeping. What it means to actually pay a batch of
//! payouts is delegated to a rail-specific [`TransferSender`].
use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use log::*;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    db_types::{FailurePolicy, PaymentMethodConfig, Payout, PayoutState, TransferProcessorData},
    destinations::ClaimDestinationError,
    traits::{LedgerError, PayoutDatabase, PayoutDatabaseError, PayoutQueryFilter},
};

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("Database error. {0}")]
    DatabaseError(#[from] PayoutDatabaseError),
    #[error("Ledger error. {0}")]
    LedgerError(#[from] LedgerError),
    #[error("Invalid destination. {0}")]
    InvalidDestination(#[from] ClaimDestinationError),
    #[error("{0}")]
    Other(String),
}

/// A payout that could not be paid in this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutFailure {
    pub payout_id: i64,
    pub reason: String,
}

impl PayoutFailure {
    pub fn new<E: Display>(payout_id: i64, reason: E) -> Self {
        Self { payout_id, reason: reason.to_string() }
    }
}

/// What a [`TransferSender`] gets to know about the processor it works for.
#[derive(Debug, Clone)]
pub struct SendContext {
    pub processor: TransferProcessorData,
    pub payment_method: PaymentMethodConfig,
}

/// Pays a batch of payouts on one rail.
#[async_trait]
pub trait TransferSender: Send + Sync {
    /// Pays as many of `payouts` as possible, oldest first. Payouts that were paid must be moved out of
    /// `AwaitingPayment` before returning. The ones that could not be paid are returned.
    ///
    /// An `Err` means that nothing was paid.
    async fn send_payouts(&self, context: &SendContext, payouts: &[Payout]) -> Result<Vec<PayoutFailure>, SenderError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Payouts handed to the transfer sender
    pub submitted: usize,
    pub failed: usize,
    /// Payouts this processor gave up on during the cycle
    pub disabled: usize,
}

pub struct AutomatedTransferSender<B, S> {
    db: B,
    config: TransferProcessorData,
    sender: S,
}

impl<B, S> AutomatedTransferSender<B, S>
where
    B: PayoutDatabase,
    S: TransferSender,
{
    pub fn new(db: B, config: TransferProcessorData, sender: S) -> Self {
        Self { db, config, sender }
    }

    pub fn interval(&self) -> Duration {
        self.config.blob.interval()
    }

    /// Runs payout cycles every `intervalSeconds` until `cancel` fires. Nothing that happens in a cycle stops the loop.
    pub async fn run(self, cancel: CancellationToken) {
        let name = format!("{} #{}", self.config.processor, self.config.id);
        info!(
            "💸️ {name} started for store {} on {}. Paying out every {}s",
            self.config.store_id,
            self.config.payout_method_id,
            self.interval().as_secs()
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.run_cycle().await {
                Ok(report) if report.submitted > 0 => info!(
                    "💸️ {name}: {} payouts submitted, {} failed, {} disabled",
                    report.submitted, report.failed, report.disabled
                ),
                Ok(_) => trace!("💸️ {name}: nothing to pay"),
                Err(e) => warn!("💸️ {name}: payout cycle aborted. {e}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval()) => continue,
                _ = cancel.cancelled() => break,
            }
        }
        info!("💸️ {name} stopped");
    }

    /// A single pass: pay every eligible payout of the store and rail, oldest first.
    pub async fn run_cycle(&self) -> Result<CycleReport, SenderError> {
        let store_id = &self.config.store_id;
        let rail = &self.config.payout_method_id;
        let payment_method = match self.db.fetch_payment_method(store_id, rail).await? {
            Some(pm) if pm.enabled => pm,
            Some(_) => {
                debug!("💸️ {rail} is disabled for store {store_id}. Skipping this cycle.");
                return Ok(CycleReport::default());
            },
            None => {
                debug!("💸️ Store {store_id} has no {rail} configuration. Skipping this cycle.");
                return Ok(CycleReport::default());
            },
        };
        let filter = PayoutQueryFilter::default()
            .with_store_id(store_id.clone())
            .with_payout_method_id(rail.clone())
            .with_state(PayoutState::AwaitingPayment);
        let payouts = self
            .db
            .search_payouts(filter)
            .await?
            .into_iter()
            .filter(|p| !p.blob.is_disabled_for(&self.config.processor))
            .collect::<Vec<_>>();
        if payouts.is_empty() {
            return Ok(CycleReport::default());
        }
        let context = SendContext { processor: self.config.clone(), payment_method };
        let failures = match self.sender.send_payouts(&context, &payouts).await {
            Ok(failures) => failures,
            Err(e) => {
                warn!("💸️ Could not pay {} payouts for store {store_id}. {e}", payouts.len());
                payouts.iter().map(|p| PayoutFailure::new(p.id, &e)).collect()
            },
        };
        let mut report = CycleReport { submitted: payouts.len(), ..Default::default() };
        for failure in failures {
            let Some(payout) = payouts.iter().find(|p| p.id == failure.payout_id) else {
                warn!("💸️ Transfer sender reported a failure for unknown payout #{}", failure.payout_id);
                continue;
            };
            report.failed += 1;
            if self.record_failure(payout, &failure.reason).await {
                report.disabled += 1;
            }
        }
        Ok(report)
    }

    /// Bumps the payout's error count and applies the failure policy. Returns true if the payout is now disabled for
    /// this processor.
    async fn record_failure(&self, payout: &Payout, reason: &str) -> bool {
        let policy: FailurePolicy = self.config.blob.failure_policy;
        let mut payout = payout.clone();
        let disabled = payout.blob.record_failure(&self.config.processor, policy);
        warn!(
            "💸️ Payout #{} could not be paid ({} errors so far). {reason}",
            payout.id,
            payout.blob.error_count()
        );
        if disabled {
            warn!("💸️ {} will no longer try to pay payout #{}", self.config.processor, payout.id);
        }
        match self.db.update_payout(&payout, PayoutState::AwaitingPayment).await {
            Ok(_) => disabled,
            Err(e) => {
                warn!("💸️ Could not record the failure of payout #{}. {e}", payout.id);
                false
            },
        }
    }
}
