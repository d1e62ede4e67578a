pub mod schema;
pub mod utils;

use diesel::r2d2::{self, ConnectionManager};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::path::{Path, PathBuf};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database initialization error: {0}")]
    Init(String),

    #[error("database migration error: {0}")]
    Migration(String),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("diesel error: {0}")]
    Diesel(#[from] diesel::result::Error),
}

/// Default database path: `~/.castellan/app.db`, mirroring
/// `config::loader::default_config_path()`.
pub fn default_database_path() -> Result<PathBuf, DbError> {
    dirs::home_dir()
        .map(|h| h.join(".castellan").join("app.db"))
        .ok_or_else(|| DbError::Init("could not determine home directory".to_string()))
}

/// Build a connection pool against `db_path`, creating its parent directory
/// and running embedded migrations before returning.
pub fn init(db_path: &Path) -> Result<DbPool, DbError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DbError::Init(format!("failed to create database directory: {e}")))?;
    }

    let db_url = db_path.to_string_lossy().to_string();
    tracing::info!(path = %db_url, "initializing database");

    let manager = ConnectionManager::<SqliteConnection>::new(&db_url);
    let pool = r2d2::Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| DbError::Init(format!("failed to create connection pool: {e}")))?;

    let mut conn = pool
        .get()
        .map_err(|e| DbError::Init(format!("failed to get database connection: {e}")))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DbError::Migration(e.to_string()))?;

    tracing::info!("database initialized");
    Ok(pool)
}

/// Initialize the database at the default path (`~/.castellan/app.db`).
pub fn init_default() -> Result<DbPool, DbError> {
    init(&default_database_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_db_and_runs_migrations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("app.db");
        let pool = init(&db_path).expect("init should succeed");
        let mut conn = pool.get().expect("get connection");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("migrations should be idempotent");
        assert!(db_path.exists());
    }

    #[test]
    fn default_database_path_lands_under_home_dir_dot_castellan() {
        let path = default_database_path().expect("should resolve");
        assert!(path.ends_with(".castellan/app.db"));
    }
}
