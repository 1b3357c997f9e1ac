pub mod config;
pub mod database;
pub mod task_queue;

pub use config::DatabaseConfig;
pub use database::Database;
pub use task_queue::PgTaskQueue;
