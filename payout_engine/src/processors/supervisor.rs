//! The processor supervisor keeps the set of running processors in step with their stored configuration.
//!
//! All changes go through a single command loop that owns the map of running workers, so at most one worker ever runs
//! per configuration id. Callers talk to the loop through a [`PayoutProcessorService`] handle, and every request gets
//! its answer once the change has been fully applied: an upsert only returns after the old worker has stopped and the
//! new one has started.
use std::{collections::HashMap, sync::Arc};

use futures_util::future::join_all;
use log::*;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::{PayoutProcessorFactory, ProcessorError, ProcessorHandle};
use crate::{
    db_types::{PayoutMethodId, ProcessorConfig, TransferProcessorData},
    traits::{PayoutDatabaseError, ProcessorManagement},
};

const COMMAND_BUFFER_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("No processor named '{0}' is registered")]
    UnknownProcessor(String),
    #[error("Processor '{processor}' does not support {method}")]
    UnsupportedPayoutMethod { processor: String, method: PayoutMethodId },
    #[error("Database error. {0}")]
    DatabaseError(#[from] PayoutDatabaseError),
    #[error("Could not start the processor. {0}")]
    ConstructionError(#[from] ProcessorError),
    #[error("The processor supervisor is not running")]
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorChange {
    /// Create or replace the configuration for its store, rail and processor type, and (re)start its worker.
    Upsert(ProcessorConfig),
    /// Delete the configuration with this id and stop its worker.
    Remove(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorChangeResult {
    Upserted(TransferProcessorData),
    /// Whether a stored configuration was actually deleted.
    Removed(bool),
}

enum Command {
    Apply { change: ProcessorChange, reply: oneshot::Sender<Result<ProcessorChangeResult, SupervisorError>> },
    Running { reply: oneshot::Sender<Vec<i64>> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// A handle on the processor supervisor. Cloning it is cheap. When the last handle is dropped, the supervisor stops
/// all of its workers and exits.
#[derive(Clone)]
pub struct PayoutProcessorService {
    commands: mpsc::Sender<Command>,
}

impl PayoutProcessorService {
    /// Loads every stored processor configuration, starts a worker for each one that can be built, and spawns the
    /// supervisor loop.
    ///
    /// A configuration whose processor is unknown, or whose worker cannot be built, is logged and skipped.
    pub async fn start<B: ProcessorManagement>(
        db: B,
        factories: Vec<Arc<dyn PayoutProcessorFactory>>,
    ) -> Result<Self, SupervisorError> {
        let factories =
            factories.into_iter().map(|f| (f.processor_name().to_string(), f)).collect::<HashMap<_, _>>();
        let mut supervisor = Supervisor { db, factories, running: HashMap::new() };
        let configs = supervisor.db.fetch_processor_configs().await?;
        info!("🧭️ Starting {} payout processors", configs.len());
        for config in configs {
            let id = config.id;
            if let Err(e) = supervisor.start_worker(config) {
                warn!("🧭️ Processor configuration #{id} was not started. {e}");
            }
        }
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        tokio::spawn(supervisor.run(receiver));
        Ok(Self { commands })
    }

    /// Applies a configuration change and returns its result once the running workers reflect it.
    pub async fn apply(&self, change: ProcessorChange) -> Result<ProcessorChangeResult, SupervisorError> {
        let (reply, answer) = oneshot::channel();
        self.commands.send(Command::Apply { change, reply }).await.map_err(|_| SupervisorError::Stopped)?;
        answer.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// The configuration ids of the running workers, in ascending order.
    pub async fn running_processors(&self) -> Result<Vec<i64>, SupervisorError> {
        let (reply, answer) = oneshot::channel();
        self.commands.send(Command::Running { reply }).await.map_err(|_| SupervisorError::Stopped)?;
        answer.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Stops every worker, waits for them to finish, and ends the supervisor loop.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let (reply, answer) = oneshot::channel();
        self.commands.send(Command::Shutdown { reply }).await.map_err(|_| SupervisorError::Stopped)?;
        answer.await.map_err(|_| SupervisorError::Stopped)
    }
}

struct Supervisor<B> {
    db: B,
    factories: HashMap<String, Arc<dyn PayoutProcessorFactory>>,
    running: HashMap<i64, ProcessorHandle>,
}

impl<B: ProcessorManagement> Supervisor<B> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("🧭️ Processor supervisor is running");
        while let Some(command) = commands.recv().await {
            match command {
                Command::Apply { change, reply } => {
                    let result = self.apply(change).await;
                    if let Err(e) = &result {
                        warn!("🧭️ Processor change failed. {e}");
                    }
                    let _ = reply.send(result);
                },
                Command::Running { reply } => {
                    let mut ids = self.running.keys().copied().collect::<Vec<_>>();
                    ids.sort_unstable();
                    let _ = reply.send(ids);
                },
                Command::Shutdown { reply } => {
                    self.stop_all().await;
                    let _ = reply.send(());
                    debug!("🧭️ Processor supervisor has shut down");
                    return;
                },
            }
        }
        self.stop_all().await;
        debug!("🧭️ All supervisor handles were dropped. Processor supervisor has shut down");
    }

    async fn apply(&mut self, change: ProcessorChange) -> Result<ProcessorChangeResult, SupervisorError> {
        match change {
            ProcessorChange::Upsert(config) => {
                let factory = self.factory_for(&config.processor)?;
                if !factory.supported_payout_methods().contains(&config.payout_method_id) {
                    return Err(SupervisorError::UnsupportedPayoutMethod {
                        processor: config.processor,
                        method: config.payout_method_id,
                    });
                }
                let data = self.db.upsert_processor_config(config).await?;
                if let Some(old) = self.running.remove(&data.id) {
                    debug!("🧭️ Stopping the previous worker for processor #{}", data.id);
                    old.stop().await;
                }
                self.start_worker(data.clone())?;
                Ok(ProcessorChangeResult::Upserted(data))
            },
            ProcessorChange::Remove(id) => {
                let deleted = self.db.delete_processor_config(id).await?;
                if let Some(old) = self.running.remove(&id) {
                    old.stop().await;
                    info!("🧭️ Processor #{id} stopped");
                }
                Ok(ProcessorChangeResult::Removed(deleted))
            },
        }
    }

    fn factory_for(&self, processor: &str) -> Result<Arc<dyn PayoutProcessorFactory>, SupervisorError> {
        self.factories.get(processor).cloned().ok_or_else(|| SupervisorError::UnknownProcessor(processor.to_string()))
    }

    fn start_worker(&mut self, config: TransferProcessorData) -> Result<(), SupervisorError> {
        let factory = self.factory_for(&config.processor)?;
        let id = config.id;
        let description = format!("{} for store {} on {}", config.processor, config.store_id, config.payout_method_id);
        let handle = factory.construct(config)?;
        self.running.insert(id, handle);
        info!("🧭️ Processor #{id} started: {description}");
        Ok(())
    }

    async fn stop_all(&mut self) {
        let count = self.running.len();
        join_all(self.running.drain().map(|(_, handle)| handle.stop())).await;
        info!("🧭️ {count} payout processors stopped");
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::{
        db_types::{ProcessorBlob, StoreId},
        test_utils::{MemoryDatabase, RecordingProcessorFactory, RECORDING_PROCESSOR},
    };

    fn rail() -> PayoutMethodId {
        PayoutMethodId::on_chain("BTC")
    }

    fn config(store: &str, interval: u64) -> ProcessorConfig {
        ProcessorConfig::new(StoreId::from(store), rail(), RECORDING_PROCESSOR, ProcessorBlob::with_interval(interval))
    }

    async fn start(db: &MemoryDatabase, factory: &RecordingProcessorFactory) -> PayoutProcessorService {
        let factories: Vec<Arc<dyn PayoutProcessorFactory>> = vec![Arc::new(factory.clone())];
        PayoutProcessorService::start(db.clone(), factories).await.unwrap()
    }

    fn upserted(result: ProcessorChangeResult) -> TransferProcessorData {
        match result {
            ProcessorChangeResult::Upserted(data) => data,
            other => panic!("Expected an upsert result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn startup_skips_unknown_processors() {
        let _ = env_logger::try_init();
        let db = MemoryDatabase::default();
        let good = db.upsert_processor_config(config("s1", 60)).await.unwrap();
        let unknown = ProcessorConfig::new("s2".into(), rail(), "NoSuchProcessor", ProcessorBlob::default());
        db.upsert_processor_config(unknown).await.unwrap();
        let factory = RecordingProcessorFactory::new(vec![rail()]);
        let service = start(&db, &factory).await;
        assert_eq!(service.running_processors().await.unwrap(), vec![good.id]);
        service.shutdown().await.unwrap();
        assert!(matches!(service.running_processors().await, Err(SupervisorError::Stopped)));
    }

    #[tokio::test]
    async fn repeated_upserts_leave_one_worker() {
        let db = MemoryDatabase::default();
        let factory = RecordingProcessorFactory::new(vec![rail()]);
        let service = start(&db, &factory).await;
        let first = upserted(service.apply(ProcessorChange::Upsert(config("s1", 60))).await.unwrap());
        let second = upserted(service.apply(ProcessorChange::Upsert(config("s1", 60))).await.unwrap());
        assert_eq!(first.id, second.id);
        assert_eq!(service.running_processors().await.unwrap(), vec![first.id]);
        assert_eq!(factory.live_workers(), 1);
        assert_eq!(factory.constructed(), 2);
        service.shutdown().await.unwrap();
        assert_eq!(factory.live_workers(), 0);
    }

    #[tokio::test]
    async fn invalid_changes_are_rejected_before_saving() {
        let db = MemoryDatabase::default();
        let factory = RecordingProcessorFactory::new(vec![rail()]);
        let service = start(&db, &factory).await;
        let unknown = ProcessorConfig::new("s1".into(), rail(), "Nope", ProcessorBlob::default());
        let err = service.apply(ProcessorChange::Upsert(unknown)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownProcessor(_)));
        let mut lightning = config("s1", 60);
        lightning.payout_method_id = PayoutMethodId::lightning("BTC");
        let err = service.apply(ProcessorChange::Upsert(lightning)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnsupportedPayoutMethod { .. }));
        assert!(db.fetch_processor_configs().await.unwrap().is_empty());
        assert!(service.running_processors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_a_processor_stops_it() {
        let db = MemoryDatabase::default();
        let factory = RecordingProcessorFactory::new(vec![rail()]);
        let service = start(&db, &factory).await;
        let a = upserted(service.apply(ProcessorChange::Upsert(config("s1", 60))).await.unwrap());
        let b = upserted(service.apply(ProcessorChange::Upsert(config("s2", 60))).await.unwrap());
        assert_eq!(service.running_processors().await.unwrap(), vec![a.id, b.id]);
        let result = service.apply(ProcessorChange::Remove(a.id)).await.unwrap();
        assert_eq!(result, ProcessorChangeResult::Removed(true));
        assert_eq!(service.running_processors().await.unwrap(), vec![b.id]);
        assert!(db.fetch_processor_config(a.id).await.unwrap().is_none());
        let result = service.apply(ProcessorChange::Remove(a.id)).await.unwrap();
        assert_eq!(result, ProcessorChangeResult::Removed(false));
        assert_eq!(factory.live_workers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_replaces_the_worker() {
        let db = MemoryDatabase::default();
        let factory = RecordingProcessorFactory::new(vec![rail()]);
        let service = start(&db, &factory).await;
        let start_time = Instant::now();
        let first = upserted(service.apply(ProcessorChange::Upsert(config("s1", 600))).await.unwrap());
        tokio::time::sleep(Duration::from_secs(650)).await;
        let second = upserted(service.apply(ProcessorChange::Upsert(config("s1", 300))).await.unwrap());
        assert_eq!(first.id, second.id);
        tokio::time::sleep(Duration::from_secs(650)).await;
        service.shutdown().await.unwrap();

        let ticks = factory
            .ticks()
            .into_iter()
            .map(|(id, at)| {
                assert_eq!(id, first.id);
                (at - start_time).as_secs()
            })
            .collect::<Vec<_>>();
        // The old worker would have ticked again at 1200s
        assert_eq!(ticks, vec![0, 600, 650, 950, 1250]);
    }
}
