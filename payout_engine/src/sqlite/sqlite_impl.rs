//! `SqliteDatabase` is a concrete implementation of a payout engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use log::*;
use sqlx::SqlitePool;

use super::db::{db_url, new_pool, payouts, processors, stores};
use crate::{
    db_types::{
        NewPayout,
        PaymentMethodConfig,
        Payout,
        PayoutMethodId,
        PayoutState,
        ProcessorConfig,
        StoreId,
        TransferProcessorData,
    },
    traits::{
        PayoutDatabase,
        PayoutDatabaseError,
        PayoutManagement,
        PayoutQueryFilter,
        ProcessorManagement,
        StoreManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl PayoutDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }
}

impl PayoutManagement for SqliteDatabase {
    async fn insert_payout(&self, payout: NewPayout) -> Result<Payout, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        payouts::insert_payout(payout, &mut conn).await
    }

    async fn fetch_payout(&self, id: i64) -> Result<Option<Payout>, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let payout = payouts::fetch_payout(id, &mut conn).await?;
        Ok(payout)
    }

    async fn search_payouts(&self, filter: PayoutQueryFilter) -> Result<Vec<Payout>, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let payouts = payouts::search_payouts(filter, &mut conn).await?;
        Ok(payouts)
    }

    async fn update_payout(&self, payout: &Payout, expected: PayoutState) -> Result<Payout, PayoutDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let updated = payouts::update_payout(payout, expected, &mut tx).await?;
        tx.commit().await?;
        Ok(updated)
    }
}

impl ProcessorManagement for SqliteDatabase {
    async fn fetch_processor_configs(&self) -> Result<Vec<TransferProcessorData>, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let configs = processors::fetch_processor_configs(&mut conn).await?;
        Ok(configs)
    }

    async fn fetch_processor_config(&self, id: i64) -> Result<Option<TransferProcessorData>, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let config = processors::fetch_processor_config(id, &mut conn).await?;
        Ok(config)
    }

    async fn upsert_processor_config(
        &self,
        config: ProcessorConfig,
    ) -> Result<TransferProcessorData, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        processors::upsert_processor_config(config, &mut conn).await
    }

    async fn delete_processor_config(&self, id: i64) -> Result<bool, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let deleted = processors::delete_processor_config(id, &mut conn).await?;
        if deleted {
            debug!("🗃️ Processor configuration #{id} deleted");
        }
        Ok(deleted)
    }
}

impl StoreManagement for SqliteDatabase {
    async fn fetch_payment_method(
        &self,
        store_id: &StoreId,
        payout_method_id: &PayoutMethodId,
    ) -> Result<Option<PaymentMethodConfig>, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let config = stores::fetch_payment_method(store_id, payout_method_id, &mut conn).await?;
        Ok(config)
    }

    async fn save_payment_method(
        &self,
        config: PaymentMethodConfig,
    ) -> Result<PaymentMethodConfig, PayoutDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let config = stores::upsert_payment_method(config, &mut conn).await?;
        Ok(config)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date. Safe to call on every start.
    pub async fn migrate(&self) -> Result<(), PayoutDatabaseError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
