use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::CrawlError;
use crate::frontier::Frontier;
use crate::queue::WorkQueue;
use crate::task::PoolConfig;
use crate::traits::{Fetcher, LinkExtractor, PageStore};
use crate::worker::{WorkerReport, WorkerReporter, WorkerService};

/// A worker that ended with an error instead of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub worker_id: String,
    pub error: String,
}

/// Outcome of a whole crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    /// Reports of workers that terminated normally, ordered by worker id.
    pub reports: Vec<WorkerReport>,
    pub failures: Vec<WorkerFailure>,
    /// Pages fetched across all workers (size of the seen set).
    pub pages_fetched: u64,
}

impl CrawlSummary {
    pub fn total_processed(&self) -> u64 {
        self.reports.iter().map(|r| u64::from(r.processed)).sum()
    }

    pub fn total_consumed(&self) -> u64 {
        self.reports.iter().map(|r| r.consumed).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fixed-size set of workers sharing one queue and one frontier.
pub struct WorkerPool<Q, F, L, P>
where
    Q: WorkQueue,
    F: Fetcher,
    L: LinkExtractor,
    P: PageStore,
{
    queue: Q,
    fetcher: F,
    extractor: L,
    store: P,
    frontier: Frontier,
    config: PoolConfig,
}

impl<Q, F, L, P> WorkerPool<Q, F, L, P>
where
    Q: WorkQueue + 'static,
    F: Fetcher + 'static,
    L: LinkExtractor + 'static,
    P: PageStore + 'static,
{
    /// Create a pool with a fresh frontier for a new crawl run.
    pub fn new(queue: Q, fetcher: F, extractor: L, store: P, config: PoolConfig) -> Self {
        Self {
            queue,
            fetcher,
            extractor,
            store,
            frontier: Frontier::new(),
            config,
        }
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    /// Start every worker and wait until all of them have terminated.
    ///
    /// A worker failing does not stop the others; its error is recorded in
    /// the summary.
    pub async fn run<WR>(
        &self,
        cancel_token: CancellationToken,
        reporter: WR,
    ) -> Result<CrawlSummary, CrawlError>
    where
        WR: WorkerReporter + Clone + 'static,
    {
        self.config.validate()?;
        self.queue.declare().await?;

        tracing::info!(
            workers = self.config.workers,
            budget = self.config.worker.budget,
            queue = %self.queue.name(),
            "Starting worker pool"
        );

        let mut workers = JoinSet::new();
        for index in 0..self.config.workers {
            let config = self.config.worker_config(index);
            let worker_id = config.worker_id.clone();
            let service = WorkerService::new(
                self.queue.clone(),
                self.fetcher.clone(),
                self.extractor.clone(),
                self.store.clone(),
                self.frontier.clone(),
                config,
            );
            let token = cancel_token.clone();
            let reporter = reporter.clone();
            workers.spawn(async move { (worker_id, service.run(token, &reporter).await) });
        }

        let mut summary = CrawlSummary::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(report))) => summary.reports.push(report),
                Ok((worker_id, Err(e))) => {
                    tracing::error!(%worker_id, error = %e, "Worker failed");
                    summary.failures.push(WorkerFailure {
                        worker_id,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Worker task aborted");
                    summary.failures.push(WorkerFailure {
                        worker_id: "unknown".to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summary.reports.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        summary.pages_fetched = self.frontier.fetched_count();

        tracing::info!(
            pages = summary.pages_fetched,
            failures = summary.failures.len(),
            "All workers finished"
        );

        Ok(summary)
    }
}
