use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::CrawlError;
use crate::task::{Delivery, QueueDepth};

/// Named, durable work queue shared by every worker of a crawl.
///
/// Delivery is at-least-once with manual acknowledgment: a task leaves the
/// queue only when its consumer calls [`ack`](Self::ack). Implementations
/// must hand each pending task to at most one consumer at a time and must
/// not deliver a second task to a consumer that still holds an
/// unacknowledged one (prefetch = 1).
pub trait WorkQueue: Send + Sync + Clone {
    fn name(&self) -> &str;

    /// Create the queue if it does not exist. Declaring twice is a no-op.
    fn declare(&self) -> impl Future<Output = Result<(), CrawlError>> + Send;

    /// Discard every pending task. In-flight deliveries are left alone.
    ///
    /// Returns the number of discarded tasks.
    fn purge(&self) -> impl Future<Output = Result<u64, CrawlError>> + Send;

    /// Append a persistent task for `url`.
    fn publish(&self, url: &str) -> impl Future<Output = Result<(), CrawlError>> + Send;

    /// Deliver the next available task to `consumer`.
    ///
    /// Returns `None` if nothing is available, or if `consumer` still holds an
    /// unsettled delivery.
    fn receive(
        &self,
        consumer: &str,
    ) -> impl Future<Output = Result<Option<Delivery>, CrawlError>> + Send;

    /// Settle a delivery by removing its task from the queue.
    fn ack(&self, tag: i64) -> impl Future<Output = Result<(), CrawlError>> + Send;

    /// Settle a delivery by returning its task to the queue for another attempt,
    /// not deliverable before `available_at`.
    fn requeue(
        &self,
        tag: i64,
        available_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), CrawlError>> + Send;

    /// Return every delivery held by `consumer` to the queue (graceful shutdown).
    fn release_consumer(
        &self,
        consumer: &str,
    ) -> impl Future<Output = Result<u64, CrawlError>> + Send;

    fn depth(&self) -> impl Future<Output = Result<QueueDepth, CrawlError>> + Send;
}
