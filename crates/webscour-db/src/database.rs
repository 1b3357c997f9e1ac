use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use webscour_core::CrawlError;

use crate::config::DatabaseConfig;
use crate::task_queue::PgTaskQueue;

/// Owns the connection pool, runs migrations, and vends named queues.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CrawlError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| CrawlError::QueueError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), CrawlError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CrawlError::QueueError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Handle to the queue called `name`. Nothing is created until
    /// [`declare`](webscour_core::WorkQueue::declare) is called.
    pub fn task_queue(&self, name: &str) -> PgTaskQueue {
        PgTaskQueue::new(self.pool.clone(), name)
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
