//! # Automated transfer processors
//!
//! A processor is a background worker that pays the `AwaitingPayment` payouts of one store on one rail. Each
//! persisted [`TransferProcessorData`] runs as its own tokio task. The tasks are built by a
//! [`PayoutProcessorFactory`], one per processor type, and owned by the [`PayoutProcessorService`], which keeps the
//! running set in line with the stored configuration.
mod onchain;
mod sender;
mod supervisor;

use std::future::Future;

use log::*;
pub use onchain::{OnChainProcessorFactory, OnChainTransferSender, ON_CHAIN_PROCESSOR};
pub use sender::{AutomatedTransferSender, CycleReport, PayoutFailure, SendContext, SenderError, TransferSender};
pub use supervisor::{PayoutProcessorService, ProcessorChange, ProcessorChangeResult, SupervisorError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db_types::{PayoutMethodId, TransferProcessorData};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("{processor} does not support {method}")]
    UnsupportedPayoutMethod { processor: String, method: PayoutMethodId },
}

/// A running processor task, and the means to stop it.
pub struct ProcessorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Spawns `worker` with a fresh cancellation token.
    pub fn spawn<F, Fut>(worker: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(worker(cancel.clone()));
        Self { cancel, join }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Asks the worker to stop and waits until it has.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("🧭️ Processor task did not stop cleanly. {e}");
        }
    }
}

/// Builds the workers for one processor type.
pub trait PayoutProcessorFactory: Send + Sync {
    /// The type name stored in [`TransferProcessorData::processor`].
    fn processor_name(&self) -> &str;

    fn supported_payout_methods(&self) -> Vec<PayoutMethodId>;

    /// Starts a worker for `config`. Must be called from within a tokio runtime.
    fn construct(&self, config: TransferProcessorData) -> Result<ProcessorHandle, ProcessorError>;
}
