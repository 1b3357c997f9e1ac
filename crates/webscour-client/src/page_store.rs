use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use webscour_core::error::CrawlError;
use webscour_core::models::PageArtifact;
use webscour_core::traits::PageStore;

/// Name of the append-only index written next to the pages.
pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// Writes each page to `{dir}/{worker}_{sequence}.html` and appends its
/// metadata as one JSON line to `{dir}/manifest.jsonl`.
#[derive(Debug, Clone)]
pub struct FsPageStore {
    dir: PathBuf,
    manifest_lock: Arc<Mutex<()>>,
}

impl FsPageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            manifest_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn page_path(&self, artifact: &PageArtifact) -> PathBuf {
        self.dir.join(format!("{}.html", artifact.stem()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    async fn append_manifest(&self, artifact: &PageArtifact) -> Result<(), CrawlError> {
        let mut line = serde_json::to_string(artifact)?;
        line.push('\n');

        let path = self.manifest_path();
        let _guard = self.manifest_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage_error("open", &path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| storage_error("append to", &path, e))?;
        file.flush()
            .await
            .map_err(|e| storage_error("flush", &path, e))
    }
}

impl PageStore for FsPageStore {
    async fn save(&self, artifact: &PageArtifact, body: &str) -> Result<PathBuf, CrawlError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("create", &self.dir, e))?;

        let path = self.page_path(artifact);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| storage_error("write", &path, e))?;

        self.append_manifest(artifact).await?;

        tracing::debug!(path = %path.display(), url = %artifact.url, "Page written");
        Ok(path)
    }
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> CrawlError {
    CrawlError::StorageError(format!("Failed to {action} {}: {e}", path.display()))
}
