use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
    Mutex,
    PoisonError,
};

use async_trait::async_trait;
use pse_common::Satoshis;
use tokio::time::Instant;

use super::MemoryDatabase;
use crate::{
    db_types::{NewPayout, Payout, PayoutMethodId, PayoutState, TransferProcessorData},
    processors::{
        AutomatedTransferSender,
        PayoutFailure,
        PayoutProcessorFactory,
        ProcessorError,
        ProcessorHandle,
        SendContext,
        SenderError,
        TransferSender,
    },
};

pub const RECORDING_PROCESSOR: &str = "RecordingProcessor";

/// Records the processor id and the time of every cycle in which it is asked to pay something. Pays nothing.
#[derive(Clone, Default)]
pub struct RecordingTransferSender {
    ticks: Arc<Mutex<Vec<(i64, Instant)>>>,
}

impl RecordingTransferSender {
    pub fn ticks(&self) -> Vec<(i64, Instant)> {
        self.ticks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl TransferSender for RecordingTransferSender {
    async fn send_payouts(
        &self,
        context: &SendContext,
        _payouts: &[Payout],
    ) -> Result<Vec<PayoutFailure>, SenderError> {
        self.ticks.lock().unwrap_or_else(PoisonError::into_inner).push((context.processor.id, Instant::now()));
        Ok(Vec::new())
    }
}

/// A processor factory whose workers run the real sender loop against a private in-memory database, with a
/// [`RecordingTransferSender`]. Every store it is configured for gets one payout that never leaves `AwaitingPayment`,
/// so that every cycle is recorded.
#[derive(Clone)]
pub struct RecordingProcessorFactory {
    db: MemoryDatabase,
    sender: RecordingTransferSender,
    payout_methods: Vec<PayoutMethodId>,
    constructed: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl RecordingProcessorFactory {
    pub fn new(payout_methods: Vec<PayoutMethodId>) -> Self {
        Self {
            db: MemoryDatabase::default(),
            sender: RecordingTransferSender::default(),
            payout_methods,
            constructed: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ticks(&self) -> Vec<(i64, Instant)> {
        self.sender.ticks()
    }

    /// The number of workers built so far.
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    /// The number of workers that have been built and have not finished yet.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn prepare_store(&self, config: &TransferProcessorData) {
        self.db.enable_payment_method(&config.store_id, &config.payout_method_id, "recording");
        let new = NewPayout::new(
            config.store_id.clone(),
            config.payout_method_id.clone(),
            "recording".into(),
            Satoshis::from(1_000),
        );
        self.db.seed_payout(new, PayoutState::AwaitingPayment, None);
    }
}

impl PayoutProcessorFactory for RecordingProcessorFactory {
    fn processor_name(&self) -> &str {
        RECORDING_PROCESSOR
    }

    fn supported_payout_methods(&self) -> Vec<PayoutMethodId> {
        self.payout_methods.clone()
    }

    fn construct(&self, config: TransferProcessorData) -> Result<ProcessorHandle, ProcessorError> {
        if !self.payout_methods.contains(&config.payout_method_id) {
            return Err(ProcessorError::UnsupportedPayoutMethod {
                processor: RECORDING_PROCESSOR.to_string(),
                method: config.payout_method_id,
            });
        }
        self.prepare_store(&config);
        self.constructed.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let live = Arc::clone(&self.live);
        let worker = AutomatedTransferSender::new(self.db.clone(), config, self.sender.clone());
        Ok(ProcessorHandle::spawn(move |cancel| async move {
            worker.run(cancel).await;
            live.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}
