//! Primary store access for Waypoint
//!
//! Provides:
//! - Connection pool management
//! - The [`RetrievalStore`] seam consumed by the retrieval engine
//! - A PostgreSQL + pgvector implementation of it

mod store;

pub use store::{PgRetrievalStore, RetrievalStore, TextRow, VectorRow};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary store connection
    pub primary: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Preparing primary store pool...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false)
            // Connections open on first use so an unreachable store only
            // fails the queries that need it
            .connect_lazy(true);

        let primary = Database::connect(opts)
            .await
            .map_err(|e| AppError::connectivity("primary-store", format!("Failed to connect: {}", e)))?;

        info!("Primary store pool ready");

        Ok(Self { primary })
    }

    /// Get the connection used for search queries
    pub fn read(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::connectivity("primary-store", format!("Ping failed: {}", e)))?;

        Ok(())
    }
}
