use webscour_core::CrawlError;

/// Default size of the connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    ///
    /// A crawl holds roughly one connection per worker while polling, so the
    /// pool should be at least as large as the worker count.
    pub fn from_env() -> Result<Self, CrawlError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            CrawlError::ConfigError("DATABASE_URL not set. Required to reach the work queue.".into())
        })?;

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Err(_) => DEFAULT_MAX_CONNECTIONS,
            Ok(raw) => {
                let parsed: u32 = raw.parse().map_err(|_| {
                    CrawlError::ConfigError(format!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(CrawlError::ConfigError(
                        "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        Ok(Self {
            url,
            max_connections,
        })
    }

    /// Override the pool size, e.g. to fit the number of workers.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }
}
