use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::CrawlError;
use crate::frontier::Frontier;
use crate::models::PageArtifact;
use crate::queue::WorkQueue;
use crate::scope::{in_scope, normalize};
use crate::task::{Delivery, WorkerConfig};
use crate::traits::{Fetcher, LinkExtractor, PageStore};

/// Where a worker is in its task cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Persisted,
    Extracting,
    Republishing,
    Acknowledged,
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Fetching => "fetching",
            WorkerState::Persisted => "persisted",
            WorkerState::Extracting => "extracting",
            WorkerState::Republishing => "republishing",
            WorkerState::Acknowledged => "acknowledged",
            WorkerState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a worker stopped consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    BudgetExhausted,
    /// The queue stayed empty for the idle grace window with nothing in flight.
    FrontierDrained,
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::BudgetExhausted => "budget exhausted",
            Termination::FrontierDrained => "frontier drained",
            Termination::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// What happened to one consumed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The URL was already fetched (or being fetched); dropped without a fetch.
    AlreadySeen,
    /// The task body was not an absolute http(s) URL.
    InvalidUrl,
    /// The fetch failed. `retry_at` is set when the task was requeued.
    FetchFailed { retry_at: Option<DateTime<Utc>> },
    /// Fetched, persisted, and mined for links.
    Processed { sequence: u64, published: usize },
}

/// Final counters of a worker that terminated normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: String,
    /// Tasks received from the queue.
    pub consumed: u64,
    /// Pages successfully fetched and persisted.
    pub processed: u32,
    pub termination: Termination,
}

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    Transition {
        worker_id: &'a str,
        state: WorkerState,
    },
    TaskReceived {
        worker_id: &'a str,
        delivery: &'a Delivery,
    },
    AlreadySeen {
        worker_id: &'a str,
        url: &'a str,
    },
    InvalidTask {
        worker_id: &'a str,
        url: &'a str,
    },
    FetchFailed {
        worker_id: &'a str,
        url: &'a str,
        error: &'a str,
        will_retry: bool,
    },
    PageSaved {
        worker_id: &'a str,
        url: &'a str,
        path: &'a Path,
    },
    LinkQueued {
        worker_id: &'a str,
        url: &'a str,
    },
    TaskSettled {
        worker_id: &'a str,
        tag: i64,
        requeued: bool,
    },
    BudgetReached {
        worker_id: &'a str,
        processed: u32,
    },
    FrontierDrained {
        worker_id: &'a str,
    },
    ShuttingDown {
        worker_id: &'a str,
        tasks_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::trace!("Polling for tasks");
            }
            WorkerEvent::Transition { worker_id, state } => {
                tracing::debug!(%worker_id, %state, "State change");
            }
            WorkerEvent::TaskReceived {
                worker_id,
                delivery,
            } => {
                tracing::debug!(
                    %worker_id,
                    url = %delivery.url,
                    tag = delivery.tag,
                    attempt = delivery.attempt,
                    redelivered = delivery.redelivered,
                    "Task received"
                );
            }
            WorkerEvent::AlreadySeen { worker_id, url } => {
                tracing::debug!(%worker_id, %url, "Already seen, skipping");
            }
            WorkerEvent::InvalidTask { worker_id, url } => {
                tracing::warn!(%worker_id, %url, "Dropping task with invalid URL");
            }
            WorkerEvent::FetchFailed {
                worker_id,
                url,
                error,
                will_retry,
            } => {
                tracing::warn!(%worker_id, %url, %error, %will_retry, "Failed to fetch");
            }
            WorkerEvent::PageSaved {
                worker_id,
                url,
                path,
            } => {
                tracing::info!(%worker_id, %url, path = %path.display(), "Crawled");
            }
            WorkerEvent::LinkQueued { worker_id, url } => {
                tracing::info!(%worker_id, %url, "Queued link");
            }
            WorkerEvent::TaskSettled {
                worker_id,
                tag,
                requeued,
            } => {
                tracing::debug!(%worker_id, tag, %requeued, "Task settled");
            }
            WorkerEvent::BudgetReached {
                worker_id,
                processed,
            } => {
                tracing::info!(%worker_id, %processed, "Reached crawl budget");
            }
            WorkerEvent::FrontierDrained { worker_id } => {
                tracing::info!(%worker_id, "Queue drained, nothing in flight");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                tasks_released,
            } => {
                tracing::info!(%worker_id, %tasks_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Worker that consumes crawl tasks one at a time.
///
/// Each task runs fetch → persist → extract → republish → acknowledge.
/// The worker stops once it has persisted `budget` pages, when the crawl
/// drains (see [`WorkerConfig::idle_shutdown`]), or on cancellation.
pub struct WorkerService<Q, F, L, P>
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
    config: WorkerConfig,
}

impl<Q, F, L, P> WorkerService<Q, F, L, P>
where
    Q: WorkQueue,
    F: Fetcher,
    L: LinkExtractor,
    P: PageStore,
{
    pub fn new(
        queue: Q,
        fetcher: F,
        extractor: L,
        store: P,
        frontier: Frontier,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            fetcher,
            extractor,
            store,
            frontier,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Run the worker loop until it terminates.
    ///
    /// Queue and storage failures end the loop with an error. Any delivery
    /// still held at that point is released back to the queue.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<WorkerReport, CrawlError> {
        self.config.validate()?;
        let worker_id = self.worker_id();

        reporter.report(WorkerEvent::Started { worker_id });
        self.enter(reporter, WorkerState::Idle);

        let mut consumed = 0u64;
        let mut processed = 0u32;
        let mut idle_since: Option<Instant> = None;

        let result = loop {
            if cancel_token.is_cancelled() {
                break Ok(Termination::Cancelled);
            }

            reporter.report(WorkerEvent::Polling);

            let delivery = match self.queue.receive(worker_id).await {
                Ok(delivery) => delivery,
                Err(e) => break Err(e),
            };

            let Some(delivery) = delivery else {
                match self.drained(&mut idle_since).await {
                    Ok(true) => {
                        reporter.report(WorkerEvent::FrontierDrained { worker_id });
                        break Ok(Termination::FrontierDrained);
                    }
                    Ok(false) => {}
                    Err(e) => break Err(e),
                }
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                    () = cancel_token.cancelled() => break Ok(Termination::Cancelled),
                }
                continue;
            };

            idle_since = None;
            consumed += 1;
            reporter.report(WorkerEvent::TaskReceived {
                worker_id,
                delivery: &delivery,
            });

            match self.process(&delivery, reporter).await {
                Ok(TaskOutcome::Processed { .. }) => processed += 1,
                Ok(_) => {}
                Err(e) => break Err(e),
            }

            if processed >= self.config.budget {
                reporter.report(WorkerEvent::BudgetReached {
                    worker_id,
                    processed,
                });
                break Ok(Termination::BudgetExhausted);
            }
            self.enter(reporter, WorkerState::Idle);
        };

        self.enter(reporter, WorkerState::Terminated);

        let released = match self.queue.release_consumer(worker_id).await {
            Ok(released) => released,
            Err(e) => {
                tracing::warn!(%worker_id, error = %e, "Failed to release held deliveries");
                0
            }
        };

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id,
            tasks_released: released,
        });
        reporter.report(WorkerEvent::Stopped { worker_id });

        Ok(WorkerReport {
            worker_id: worker_id.to_string(),
            consumed,
            processed,
            termination: result?,
        })
    }

    /// Handle one delivery and settle it. Every delivery is settled exactly
    /// once: requeued when a retry was scheduled, acknowledged otherwise.
    pub async fn process<WR: WorkerReporter>(
        &self,
        delivery: &Delivery,
        reporter: &WR,
    ) -> Result<TaskOutcome, CrawlError> {
        let worker_id = self.worker_id();

        let outcome = match parse_task_url(&delivery.url) {
            None => {
                reporter.report(WorkerEvent::InvalidTask {
                    worker_id,
                    url: &delivery.url,
                });
                TaskOutcome::InvalidUrl
            }
            Some(url) if !self.frontier.claim(url.as_str()) => {
                reporter.report(WorkerEvent::AlreadySeen {
                    worker_id,
                    url: url.as_str(),
                });
                TaskOutcome::AlreadySeen
            }
            Some(url) => self.crawl(delivery, &url, reporter).await?,
        };

        let requeued = match &outcome {
            TaskOutcome::FetchFailed {
                retry_at: Some(at),
            } => {
                self.queue.requeue(delivery.tag, *at).await?;
                true
            }
            _ => {
                self.queue.ack(delivery.tag).await?;
                false
            }
        };

        self.enter(reporter, WorkerState::Acknowledged);
        reporter.report(WorkerEvent::TaskSettled {
            worker_id,
            tag: delivery.tag,
            requeued,
        });

        Ok(outcome)
    }

    async fn crawl<WR: WorkerReporter>(
        &self,
        delivery: &Delivery,
        url: &Url,
        reporter: &WR,
    ) -> Result<TaskOutcome, CrawlError> {
        let worker_id = self.worker_id();

        self.enter(reporter, WorkerState::Fetching);
        let body = match self.fetcher.fetch(url.as_str()).await {
            Ok(body) => body,
            Err(e) => {
                let retry = &self.config.retry_config;
                let will_retry = e.is_retryable() && retry.can_retry(delivery.attempt);
                let error_msg = e.to_string();
                reporter.report(WorkerEvent::FetchFailed {
                    worker_id,
                    url: url.as_str(),
                    error: &error_msg,
                    will_retry,
                });

                if will_retry {
                    self.frontier.release(url.as_str());
                    return Ok(TaskOutcome::FetchFailed {
                        retry_at: Some(retry.next_attempt_at(delivery.attempt)),
                    });
                }
                self.frontier.abandon(url.as_str());
                return Ok(TaskOutcome::FetchFailed { retry_at: None });
            }
        };

        let sequence = self.frontier.next_sequence();
        let artifact = PageArtifact::new(worker_id, sequence, url.as_str(), &body);
        let path = match self.store.save(&artifact, &body).await {
            Ok(path) => path,
            Err(e) => {
                // Unsaved pages stay claimable for whoever gets the redelivery.
                self.frontier.release(url.as_str());
                return Err(e);
            }
        };
        self.frontier.complete(url.as_str());
        self.enter(reporter, WorkerState::Persisted);
        reporter.report(WorkerEvent::PageSaved {
            worker_id,
            url: url.as_str(),
            path: &path,
        });

        self.enter(reporter, WorkerState::Extracting);
        let links = self.extractor.extract_links(&body, url);

        self.enter(reporter, WorkerState::Republishing);
        let mut published = 0;
        for link in links {
            let link = normalize(link);
            if !in_scope(&link, url) || !self.frontier.discover(link.as_str()) {
                continue;
            }
            self.queue.publish(link.as_str()).await?;
            published += 1;
            reporter.report(WorkerEvent::LinkQueued {
                worker_id,
                url: link.as_str(),
            });
        }

        Ok(TaskOutcome::Processed {
            sequence,
            published,
        })
    }

    /// Whether the whole crawl has gone quiet: this worker has been idle for
    /// the grace window and the queue holds nothing pending or in flight.
    async fn drained(&self, idle_since: &mut Option<Instant>) -> Result<bool, CrawlError> {
        let Some(grace) = self.config.idle_shutdown else {
            return Ok(false);
        };
        let since = *idle_since.get_or_insert_with(Instant::now);
        if since.elapsed() < grace {
            return Ok(false);
        }
        if self.queue.depth().await?.is_drained() {
            return Ok(true);
        }
        // Someone is still mid-task and may publish more work.
        *idle_since = Some(Instant::now());
        Ok(false)
    }

    fn enter<WR: WorkerReporter>(&self, reporter: &WR, state: WorkerState) {
        reporter.report(WorkerEvent::Transition {
            worker_id: self.worker_id(),
            state,
        });
    }
}

/// Parse a task body into the canonical URL used as the frontier key.
fn parse_task_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(normalize(url))
}
