use sqlx::{sqlite::SqliteRow, FromRow, Row, SqliteConnection};

use crate::db_types::{PaymentMethodConfig, PayoutMethodId, StoreId};

impl FromRow<'_, SqliteRow> for PaymentMethodConfig {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            store_id: row.try_get("store_id")?,
            payout_method_id: row.try_get("payout_method_id")?,
            enabled: row.try_get("enabled")?,
            wallet: row.try_get("wallet")?,
        })
    }
}

pub async fn fetch_payment_method(
    store_id: &StoreId,
    payout_method_id: &PayoutMethodId,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentMethodConfig>, sqlx::Error> {
    let config = sqlx::query_as("SELECT * FROM store_payment_methods WHERE store_id = $1 AND payout_method_id = $2")
        .bind(store_id.as_str())
        .bind(payout_method_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(config)
}

pub async fn upsert_payment_method(
    config: PaymentMethodConfig,
    conn: &mut SqliteConnection,
) -> Result<PaymentMethodConfig, sqlx::Error> {
    let config = sqlx::query_as::<_, PaymentMethodConfig>(
        r#"
            INSERT INTO store_payment_methods (store_id, payout_method_id, enabled, wallet)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (store_id, payout_method_id) DO UPDATE SET enabled = excluded.enabled, wallet = excluded.wallet
            RETURNING *;
        "#,
    )
    .bind(config.store_id)
    .bind(config.payout_method_id)
    .bind(config.enabled)
    .bind(config.wallet)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next()
    .ok_or(sqlx::Error::RowNotFound)?;
    Ok(config)
}
