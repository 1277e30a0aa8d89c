use log::debug;
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqliteConnection};

use super::json_column;
use crate::{
    db_types::{ProcessorConfig, TransferProcessorData},
    traits::PayoutDatabaseError,
};

impl FromRow<'_, SqliteRow> for TransferProcessorData {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            store_id: row.try_get("store_id")?,
            payout_method_id: row.try_get("payout_method_id")?,
            processor: row.try_get("processor")?,
            blob: json_column(row, "blob")?,
        })
    }
}

pub async fn fetch_processor_configs(conn: &mut SqliteConnection) -> Result<Vec<TransferProcessorData>, sqlx::Error> {
    let configs = sqlx::query_as("SELECT * FROM transfer_processors ORDER BY id").fetch_all(conn).await?;
    Ok(configs)
}

pub async fn fetch_processor_config(
    id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<TransferProcessorData>, sqlx::Error> {
    let config =
        sqlx::query_as("SELECT * FROM transfer_processors WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(config)
}

/// Inserts the configuration, or replaces the blob of the existing configuration for the same store, rail and
/// processor type.
pub async fn upsert_processor_config(
    config: ProcessorConfig,
    conn: &mut SqliteConnection,
) -> Result<TransferProcessorData, PayoutDatabaseError> {
    let blob = serde_json::to_string(&config.blob)?;
    let data: TransferProcessorData = sqlx::query_as(
        r#"
            INSERT INTO transfer_processors (store_id, payout_method_id, processor, blob)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (store_id, payout_method_id, processor) DO UPDATE SET blob = excluded.blob
            RETURNING *;
        "#,
    )
    .bind(config.store_id)
    .bind(config.payout_method_id)
    .bind(config.processor)
    .bind(blob)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next()
    .ok_or(sqlx::Error::RowNotFound)?;
    debug!("🗃️ Processor configuration #{} ({}) saved for store {}", data.id, data.processor, data.store_id);
    Ok(data)
}

pub async fn delete_processor_config(id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM transfer_processors WHERE id = $1").bind(id).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}
