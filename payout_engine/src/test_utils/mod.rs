//! Helpers for testing code that uses the payout engine.
mod fake_ledger;
mod memory_db;
#[cfg(feature = "sqlite")]
pub mod scratch_db;
mod recording;

pub use fake_ledger::FakeLedger;
pub use memory_db::MemoryDatabase;
pub use recording::{RecordingProcessorFactory, RecordingTransferSender, RECORDING_PROCESSOR};
