//! Disposable SQLite databases. Every scratch database lives in its own file in the system temp directory, so tests
//! can run in parallel without seeing each other's rows.
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::SqliteDatabase;

/// A URL for a database file that does not exist yet. The pool creates the file on first connect.
pub fn scratch_db_url() -> String {
    let name = format!("pse_test_{:016x}.db", rand::random::<u64>());
    format!("sqlite://{}", std::env::temp_dir().join(name).display())
}

/// Creates a fully migrated database at a fresh URL.
///
/// Returns the URL alongside the pool so that callers can open more pools onto the same file, or discard it later.
pub async fn scratch_database(max_connections: u32) -> (String, SqliteDatabase) {
    let _ = env_logger::try_init();
    let url = scratch_db_url();
    let db = SqliteDatabase::new_with_url(&url, max_connections).await.expect("Error opening scratch database");
    db.migrate().await.expect("Error migrating scratch database");
    debug!("🗃️ Scratch database ready at {url}");
    (url, db)
}

/// Closes the pool and deletes the file behind it.
pub async fn discard_database(url: &str, db: &SqliteDatabase) {
    db.close().await;
    match Sqlite::drop_database(url).await {
        Ok(()) => trace!("🗃️ Scratch database {url} removed"),
        Err(e) => warn!("🗃️ Could not remove scratch database {url}. {e}"),
    }
}
