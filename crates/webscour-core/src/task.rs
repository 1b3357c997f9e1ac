use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CrawlError;

/// Status of a crawl task inside the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Ready to be delivered (possibly not before `available_at`).
    Pending,
    /// Delivered to a consumer and not yet settled.
    InFlight,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InFlight => "in_flight",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_flight" => Ok(TaskStatus::InFlight),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// One task handed to one consumer.
///
/// The task itself is only the URL; the rest is delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Identifier used to settle (ack or requeue) this delivery.
    pub tag: i64,
    pub url: String,
    /// Fetch retries already spent on this task.
    pub attempt: u32,
    /// True if the task was delivered before and never acknowledged.
    pub redelivered: bool,
}

/// Snapshot of how many tasks sit in a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub in_flight: u64,
}

impl QueueDepth {
    /// Nothing waiting and nobody mid-task.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}

/// Retry configuration with a stepped backoff.
///
/// Retrying is opt-in: the default allows no retries, so a failed fetch is
/// acknowledged and dropped. When enabled the delay schedule is 5s, 30s,
/// 2min (capped by `max_delay`).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub max_delay: TimeDelta,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            max_delay: TimeDelta::minutes(2),
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> TimeDelta {
        let delay = match attempt {
            0 | 1 => TimeDelta::seconds(5),
            2 => TimeDelta::seconds(30),
            _ => TimeDelta::minutes(2),
        };
        std::cmp::min(delay, self.max_delay)
    }

    /// Whether a delivery that has spent `attempt` retries may be retried again.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// When a retried delivery becomes available again.
    pub fn next_attempt_at(&self, attempt: u32) -> DateTime<Utc> {
        Utc::now() + self.delay_for_attempt(attempt + 1)
    }
}

/// Configuration for a single worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Number of successfully fetched pages after which the worker stops.
    pub budget: u32,
    pub poll_interval: Duration,
    /// Grace window after which an idle worker checks whether the whole
    /// crawl has drained. `None` (the default) blocks in `Idle` until the
    /// budget is reached or the worker is cancelled.
    pub idle_shutdown: Option<Duration>,
    pub retry_config: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            budget: 5,
            poll_interval: Duration::from_millis(500),
            idle_shutdown: None,
            retry_config: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_idle_shutdown(mut self, grace: Option<Duration>) -> Self {
        self.idle_shutdown = grace;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry_config = retry;
        self
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.worker_id.is_empty() {
            return Err(CrawlError::ConfigError("worker id must not be empty".into()));
        }
        if self.budget == 0 {
            return Err(CrawlError::ConfigError(
                "worker budget must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(CrawlError::ConfigError(
                "poll interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the worker pool.
///
/// Every worker gets a copy of `worker` with its own identity
/// `W{n}-{run_id}`. The run id keeps consumer tags and artifact names of
/// concurrent or successive crawl processes apart.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub run_id: String,
    pub worker: WorkerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            run_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            worker: WorkerConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_worker_config(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.workers == 0 {
            return Err(CrawlError::ConfigError(
                "pool needs at least one worker".into(),
            ));
        }
        if self.run_id.is_empty() {
            return Err(CrawlError::ConfigError("run id must not be empty".into()));
        }
        self.worker.validate()
    }

    /// The configuration handed to the worker at `index` (0-based).
    pub fn worker_config(&self, index: usize) -> WorkerConfig {
        self.worker
            .clone()
            .with_worker_id(format!("W{}-{}", index + 1, self.run_id))
    }
}
