use std::path::Path;

use compass_common::{Error, Result};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::migrations;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Shared handle to the connection pool. Cheap to clone; every store holds one.
///
/// Broken connections are discarded by the pool's checkout test and replaced
/// on the next `conn()` call.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    /// Single-connection pool over a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys=ON;"));
        // One connection that never expires, otherwise each checkout could see a fresh database.
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> Result<PooledConnection> {
        self.pool
            .get()
            .map_err(|e| Error::Database(format!("failed to acquire connection: {e}")))
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        migrations::run(&conn)
    }

    pub fn pool_state(&self) -> (u32, u32) {
        let state = self.pool.state();
        (state.connections, state.idle_connections)
    }
}
