use chrono::Utc;
use log::{debug, trace};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, Row, SqliteConnection};

use super::{json_column, optional_json_column};
use crate::{
    db_types::{NewPayout, Payout, PayoutState},
    traits::{PayoutDatabaseError, PayoutQueryFilter},
};

impl FromRow<'_, SqliteRow> for Payout {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            store_id: row.try_get("store_id")?,
            pull_payment_id: row.try_get("pull_payment_id")?,
            payout_method_id: row.try_get("payout_method_id")?,
            state: row.try_get("state")?,
            destination: row.try_get("destination")?,
            amount: row.try_get("amount")?,
            blob: json_column(row, "blob")?,
            proof: optional_json_column(row, "proof")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Inserts a new payout in the `AwaitingPayment` state. The blob revision is stored as given.
pub async fn insert_payout(payout: NewPayout, conn: &mut SqliteConnection) -> Result<Payout, PayoutDatabaseError> {
    if !payout.amount.is_positive() {
        return Err(PayoutDatabaseError::InvalidAmount(format!("{} is not a positive amount", payout.amount)));
    }
    let blob = serde_json::to_string(&payout.blob)?;
    // Reading every row steps the statement to completion, which is what ends SQLite's implicit transaction
    let payout: Payout = sqlx::query_as(
        r#"
            INSERT INTO payouts (
                store_id,
                pull_payment_id,
                payout_method_id,
                state,
                destination,
                amount,
                blob,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *;
        "#,
    )
    .bind(payout.store_id)
    .bind(payout.pull_payment_id)
    .bind(payout.payout_method_id)
    .bind(PayoutState::AwaitingPayment)
    .bind(payout.destination)
    .bind(payout.amount)
    .bind(blob)
    .bind(payout.created_at)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next()
    .ok_or(sqlx::Error::RowNotFound)?;
    debug!("🗃️ Payout #{} for {} inserted for store {}", payout.id, payout.amount, payout.store_id);
    Ok(payout)
}

pub async fn fetch_payout(id: i64, conn: &mut SqliteConnection) -> Result<Option<Payout>, sqlx::Error> {
    let payout = sqlx::query_as("SELECT * FROM payouts WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(payout)
}

/// Fetches payouts according to criteria specified in the `PayoutQueryFilter`
///
/// Resulting payouts are ordered by `created_at` in ascending order. Payouts created at the same instant come out in
/// insertion order.
pub async fn search_payouts(query: PayoutQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Payout>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM payouts ");
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(store_id) = query.store_id {
        where_clause.push("store_id = ");
        where_clause.push_bind_unseparated(store_id);
    }
    if let Some(method) = query.payout_method_id {
        where_clause.push("payout_method_id = ");
        where_clause.push_bind_unseparated(method);
    }
    if let Some(pull_payment_id) = query.pull_payment_id {
        where_clause.push("pull_payment_id = ");
        where_clause.push_bind_unseparated(pull_payment_id);
    }
    if !query.states.is_empty() {
        let states = query.states.iter().map(|s| format!("'{s}'")).collect::<Vec<_>>().join(",");
        where_clause.push(format!("state IN ({states})"));
    }
    builder.push(" ORDER BY created_at ASC, id ASC");

    trace!("🗃️ Executing query: {}", builder.sql());
    let payouts = builder.build_query_as::<Payout>().fetch_all(conn).await?;
    trace!("🗃️ Result of search_payouts: {}", payouts.len());
    Ok(payouts)
}

/// Writes the state, blob and proof of the payout, if and only if the stored state is still `expected`.
///
/// The revision in the stored blob is one more than the revision of `payout.blob`.
pub async fn update_payout(
    payout: &Payout,
    expected: PayoutState,
    conn: &mut SqliteConnection,
) -> Result<Payout, PayoutDatabaseError> {
    if expected != payout.state && !expected.can_transition_to(payout.state) {
        return Err(PayoutDatabaseError::InvalidTransition { id: payout.id, from: expected, to: payout.state });
    }
    let mut blob = payout.blob.clone();
    blob.revision = blob.revision.saturating_add(1);
    let blob = serde_json::to_string(&blob)?;
    let proof = payout.proof.as_ref().map(serde_json::to_string).transpose()?;
    let updated: Option<Payout> = sqlx::query_as(
        r#"
            UPDATE payouts SET state = $1, blob = $2, proof = $3, updated_at = $4
            WHERE id = $5 AND state = $6
            RETURNING *;
        "#,
    )
    .bind(payout.state)
    .bind(blob)
    .bind(proof)
    .bind(Utc::now())
    .bind(payout.id)
    .bind(expected)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .next();
    match updated {
        Some(p) => {
            trace!("🗃️ Payout #{} is now {} (revision {})", p.id, p.state, p.blob.revision);
            Ok(p)
        },
        None => match fetch_payout(payout.id, conn).await? {
            Some(_) => Err(PayoutDatabaseError::StateConflict { id: payout.id, expected }),
            None => Err(PayoutDatabaseError::PayoutNotFound(payout.id)),
        },
    }
}
