pub mod error;
pub mod frontier;
pub mod models;
pub mod pool;
pub mod queue;
pub mod scope;
pub mod task;
pub mod traits;
pub mod worker;


pub use error::CrawlError;
pub use frontier::{Frontier, UrlState};
pub use models::{PageArtifact, compute_hash};
pub use pool::{CrawlSummary, WorkerPool};
pub use queue::WorkQueue;
pub use task::{Delivery, PoolConfig, QueueDepth, RetryConfig, WorkerConfig};
pub use traits::{Fetcher, LinkExtractor, PageStore};
pub use worker::{TracingWorkerReporter, WorkerReporter, WorkerService};
