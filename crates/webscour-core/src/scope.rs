use url::Url;

/// Canonical form of a crawl URL: the fragment never changes what is fetched.
pub fn normalize(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

/// Whether `candidate`, found on the page at `origin`, belongs to the crawl.
///
/// Only http(s) links on exactly the same host and port are in scope;
/// subdomains and sibling domains are not.
pub fn in_scope(candidate: &Url, origin: &Url) -> bool {
    matches!(candidate.scheme(), "http" | "https")
        && candidate.host_str().is_some()
        && candidate.host_str() == origin.host_str()
        && candidate.port() == origin.port()
}
