use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A fetched page as written to the page store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageArtifact {
    pub worker_id: String,
    /// Issued by the frontier when the URL was marked fetched; unique per run.
    pub sequence: u64,
    pub url: String,
    /// SHA-256 of the raw body
    pub content_hash: String,
    pub size: usize,
    pub fetched_at: DateTime<Utc>,
}

impl PageArtifact {
    pub fn new(worker_id: &str, sequence: u64, url: &str, body: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            sequence,
            url: url.to_string(),
            content_hash: compute_hash(body),
            size: body.len(),
            fetched_at: Utc::now(),
        }
    }

    /// File name without extension: `{worker}_{sequence}`.
    pub fn stem(&self) -> String {
        format!("{}_{}", self.worker_id, self.sequence)
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
