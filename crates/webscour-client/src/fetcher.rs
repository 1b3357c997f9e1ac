use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Client, redirect};
use tokio::time::Instant;
use url::{Host, Url};
use webscour_core::error::CrawlError;
use webscour_core::traits::Fetcher;

/// Default per-request timeout for crawl fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Redirect hops followed before a fetch is given up.
const MAX_REDIRECTS: usize = 10;

/// Which hosts the fetcher is willing to contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressPolicy {
    /// Refuse loopback, private, link-local and other internal addresses,
    /// both for the requested URL and for every redirect target.
    #[default]
    PublicOnly,
    /// Contact any host. Needed to crawl sites on localhost or a LAN.
    AllowPrivate,
}

/// HTTP fetcher using reqwest.
///
/// Downloads raw pages under a single deadline that covers host screening,
/// connecting, redirects and reading the body. Every call either returns
/// the body of a 2xx response or fails.
///
/// A URL refused by the [`AddressPolicy`] fails with
/// [`CrawlError::InvalidUrl`], so the task is dropped rather than retried.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout: Duration,
    policy: AddressPolicy,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, CrawlError> {
        Self::with_options(DEFAULT_FETCH_TIMEOUT, AddressPolicy::default())
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, CrawlError> {
        Self::with_options(timeout, AddressPolicy::default())
    }

    pub fn with_options(timeout: Duration, policy: AddressPolicy) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(concat!("webscour/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect_policy(policy))
            .build()
            .map_err(|e| CrawlError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            policy,
        })
    }

    pub fn policy(&self) -> AddressPolicy {
        self.policy
    }

    fn timed_out(&self) -> CrawlError {
        CrawlError::Timeout(self.timeout.as_secs())
    }

    /// Reject URLs the crawler must not contact. Domain names are resolved
    /// and every address checked when only public hosts are allowed.
    async fn screen(&self, url: &Url, deadline: Instant) -> Result<(), CrawlError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrawlError::InvalidUrl(format!(
                "{url}: only http and https can be crawled"
            )));
        }
        let host = url
            .host()
            .ok_or_else(|| CrawlError::InvalidUrl(format!("{url}: missing host")))?;

        if self.policy == AddressPolicy::AllowPrivate {
            return Ok(());
        }

        let name = match host {
            Host::Ipv4(ip) => return refuse_internal(url, IpAddr::V4(ip)),
            Host::Ipv6(ip) => return refuse_internal(url, IpAddr::V6(ip)),
            Host::Domain(name) => name,
        };
        let port = url.port_or_known_default().unwrap_or(80);

        let addrs = tokio::time::timeout_at(deadline, tokio::net::lookup_host((name, port)))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| CrawlError::NetworkError(format!("DNS lookup for {name} failed: {e}")))?;

        let mut resolved = false;
        for addr in addrs {
            resolved = true;
            refuse_internal(url, addr.ip())?;
        }
        if !resolved {
            return Err(CrawlError::NetworkError(format!(
                "DNS lookup for {name} returned no addresses"
            )));
        }
        Ok(())
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CrawlError> {
        let deadline = Instant::now() + self.timeout;
        let parsed = Url::parse(url).map_err(|e| CrawlError::InvalidUrl(format!("{url}: {e}")))?;
        self.screen(&parsed, deadline).await?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.timed_out());
        }

        let response = self
            .client
            .get(parsed)
            .timeout(remaining)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.timed_out()
                } else if e.is_redirect() {
                    CrawlError::InvalidUrl(format!("{url}: redirect refused: {e}"))
                } else if e.is_connect() {
                    CrawlError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    CrawlError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                self.timed_out()
            } else {
                CrawlError::HttpError(format!("Failed to read response body: {e}"))
            }
        })
    }
}

/// Follow redirects only to crawlable targets.
///
/// Redirect targets are checked synchronously, so a domain name is judged by
/// its spelling (`localhost`) rather than by what it resolves to.
fn redirect_policy(policy: AddressPolicy) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        match check_redirect_target(attempt.url(), policy) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    })
}

fn check_redirect_target(target: &Url, policy: AddressPolicy) -> Result<(), String> {
    if !matches!(target.scheme(), "http" | "https") {
        return Err(format!("redirect to non-http URL {target}"));
    }
    if policy == AddressPolicy::AllowPrivate {
        return Ok(());
    }
    let internal = match target.host() {
        None => true,
        Some(Host::Ipv4(ip)) => is_internal(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_internal(IpAddr::V6(ip)),
        Some(Host::Domain(name)) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            name == "localhost" || name.ends_with(".localhost")
        }
    };
    if internal {
        return Err(format!("redirect to internal host {target}"));
    }
    Ok(())
}

fn refuse_internal(url: &Url, ip: IpAddr) -> Result<(), CrawlError> {
    if is_internal(ip) {
        return Err(CrawlError::InvalidUrl(format!(
            "{url}: refusing internal address {ip}"
        )));
    }
    Ok(())
}

/// Loopback, private, link-local, CGNAT, documentation and other addresses
/// that never belong to a public web site.
fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (a == 100 && (64..128).contains(&b))
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_internal(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xffc0) == 0xfe80
                || (first & 0xfe00) == 0xfc00
        }
    }
}
