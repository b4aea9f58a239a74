//! Database layer for the Herald platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Every table in Herald is created through
//! versioned migrations managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-process notification server does not
//!   need an external database; WAL allows concurrent readers with a single
//!   writer, which matches the outbox/feed access pattern.
//! - **`r2d2` connection pool**: bounded connection reuse shared between the
//!   HTTP handlers and the fan-out worker pool.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so schema and code cannot drift apart.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};

use thiserror::Error;

/// Errors that can occur while opening the database.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Could not check out a connection to run migrations on.
    #[error("failed to get connection for migrations: {0}")]
    Checkout(#[from] r2d2::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Opens the database: creates the pool and applies pending migrations.
///
/// The usual entry point for the server binary and integration tests;
/// [`create_pool`] and [`run_migrations`] remain available separately for
/// callers that need to interleave their own setup.
pub fn open(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, OpenError> {
    let pool = create_pool(db_path, settings)?;
    {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }
    Ok(pool)
}
