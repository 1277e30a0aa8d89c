use std::future::Future;

use crate::{
    db_types::{ProcessorConfig, TransferProcessorData},
    traits::PayoutDatabaseError,
};

/// Storage of automated transfer sender configurations.
pub trait ProcessorManagement: Clone + Send + Sync + 'static {
    fn fetch_processor_configs(
        &self,
    ) -> impl Future<Output = Result<Vec<TransferProcessorData>, PayoutDatabaseError>> + Send;

    fn fetch_processor_config(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<TransferProcessorData>, PayoutDatabaseError>> + Send;

    /// Saves the configuration. If one already exists for the same store, rail and processor type, its blob is
    /// replaced and it keeps its id.
    fn upsert_processor_config(
        &self,
        config: ProcessorConfig,
    ) -> impl Future<Output = Result<TransferProcessorData, PayoutDatabaseError>> + Send;

    /// Deletes the configuration. Returns false if it did not exist.
    fn delete_processor_config(&self, id: i64) -> impl Future<Output = Result<bool, PayoutDatabaseError>> + Send;
}
