//! Shared crawl frontier.
//!
//! One [`Frontier`] is shared by every worker of a crawl run. Each public
//! operation runs under a single lock, so compound steps such as
//! "publish only if unknown" or "claim only if not yet fetched" are atomic
//! across workers.
//!
//! A URL becomes `Fetched` only after its page has been persisted, so a
//! failed write leaves it claimable again.
//!
//! ```text
//!  (absent) --discover--> Discovered --claim--> Claimed --complete--> Fetched
//!      |                      ^                    |
//!      +------claim-----------|-------->           +--abandon--> Abandoned
//!                             +------release-------+
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// What the frontier knows about a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlState {
    /// Published to the queue by a worker, not fetched yet.
    Discovered,
    /// A worker is currently fetching it.
    Claimed,
    /// Fetched and persisted. Never leaves this state.
    Fetched,
    /// Dropped after a permanent failure or exhausted retries.
    Abandoned,
}

#[derive(Debug, Default)]
struct FrontierInner {
    urls: HashMap<String, UrlState>,
    fetched: u64,
    issued: u64,
}

/// Thread-safe dedup record for one crawl run.
#[derive(Debug, Clone, Default)]
pub struct Frontier {
    inner: Arc<Mutex<FrontierInner>>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned frontier mutex");
            poisoned.into_inner()
        })
    }

    /// Record a newly found link. Returns true if the URL was unknown, in
    /// which case the caller owns publishing it.
    pub fn discover(&self, url: &str) -> bool {
        let mut inner = self.lock_inner();
        if inner.urls.contains_key(url) {
            return false;
        }
        inner.urls.insert(url.to_string(), UrlState::Discovered);
        true
    }

    /// Take ownership of fetching `url`.
    ///
    /// Succeeds for unknown URLs (seeds) and discovered ones. Fails when
    /// the URL is fetched, abandoned, or claimed by another worker.
    pub fn claim(&self, url: &str) -> bool {
        let mut inner = self.lock_inner();
        match inner.urls.get(url) {
            None | Some(UrlState::Discovered) => {
                inner.urls.insert(url.to_string(), UrlState::Claimed);
                true
            }
            Some(_) => false,
        }
    }

    /// Issue the next artifact sequence number.
    ///
    /// Numbers start at 1 and are never handed out twice within a run. A
    /// number whose write failed is simply skipped.
    pub fn next_sequence(&self) -> u64 {
        let mut inner = self.lock_inner();
        inner.issued += 1;
        inner.issued
    }

    /// Mark a claimed URL as fetched once its page is persisted.
    pub fn complete(&self, url: &str) {
        let mut inner = self.lock_inner();
        if let Some(UrlState::Fetched) = inner.urls.get(url) {
            tracing::warn!(%url, "URL completed twice");
            return;
        }
        inner.urls.insert(url.to_string(), UrlState::Fetched);
        inner.fetched += 1;
    }

    /// Give a claimed URL back so a redelivered task can claim it again.
    pub fn release(&self, url: &str) {
        let mut inner = self.lock_inner();
        if let Some(state) = inner.urls.get_mut(url) {
            if *state == UrlState::Claimed {
                *state = UrlState::Discovered;
            }
        }
    }

    /// Permanently drop a claimed URL.
    pub fn abandon(&self, url: &str) {
        let mut inner = self.lock_inner();
        if let Some(state) = inner.urls.get_mut(url) {
            if *state == UrlState::Claimed {
                *state = UrlState::Abandoned;
            }
        }
    }

    pub fn state(&self, url: &str) -> Option<UrlState> {
        self.lock_inner().urls.get(url).copied()
    }

    /// Whether `url` has been fetched.
    pub fn is_seen(&self, url: &str) -> bool {
        self.state(url) == Some(UrlState::Fetched)
    }

    /// Number of URLs known to the frontier, in any state.
    pub fn len(&self) -> usize {
        self.lock_inner().urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fetched_count(&self) -> u64 {
        self.lock_inner().fetched
    }
}
