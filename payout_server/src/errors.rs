use payout_engine::{processors::SupervisorError, traits::LedgerError, PayoutDatabaseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("A database error occurred. {0}")]
    DatabaseError(#[from] PayoutDatabaseError),
    #[error("The bitcoin node could not be used. {0}")]
    LedgerError(#[from] LedgerError),
    #[error("The payout processors failed. {0}")]
    SupervisorError(#[from] SupervisorError),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
}
