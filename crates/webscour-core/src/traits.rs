use std::future::Future;
use std::path::PathBuf;

use url::Url;

use crate::error::CrawlError;
use crate::models::PageArtifact;

/// Fetches the raw body of a page.
///
/// Implementations bound every request with a timeout and report non-success
/// statuses as errors.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, CrawlError>> + Send;
}

/// Finds hyperlink targets in a page.
pub trait LinkExtractor: Send + Sync + Clone {
    /// Returns every link target resolved against `base`. Malformed or
    /// unresolvable hrefs are skipped, never reported.
    fn extract_links(&self, html: &str, base: &Url) -> Vec<Url>;
}

/// Persists fetched pages.
pub trait PageStore: Send + Sync + Clone {
    /// Write `body` under the artifact's name. Returns where it was written.
    fn save(
        &self,
        artifact: &PageArtifact,
        body: &str,
    ) -> impl Future<Output = Result<PathBuf, CrawlError>> + Send;
}
