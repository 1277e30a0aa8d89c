//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interaction are maintained by simple functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool,
//! or create an atomic transaction as the need arises and call through to the functions without any other changes.
use std::{env, str::FromStr, time::Duration};

use log::info;
use serde::de::DeserializeOwned;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Error as SqlxError,
    Row,
    SqlitePool,
};

pub mod payouts;
pub mod processors;
pub mod stores;

const SQLITE_DB_URL: &str = "sqlite://data/payouts.db";

pub fn db_url() -> String {
    let result = env::var("PSE_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ PSE_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

/// Senders and the sweep write from different tasks, so writers wait for the lock rather than fail immediately.
pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

/// Decodes a column holding a JSON document.
pub(crate) fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T, SqlxError> {
    let text: String = row.try_get(column)?;
    serde_json::from_str(&text).map_err(|e| SqlxError::ColumnDecode { index: column.to_string(), source: Box::new(e) })
}

pub(crate) fn optional_json_column<T: DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<T>, SqlxError> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| serde_json::from_str(&t))
        .transpose()
        .map_err(|e| SqlxError::ColumnDecode { index: column.to_string(), source: Box::new(e) })
}
