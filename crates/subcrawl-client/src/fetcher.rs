use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use subcrawl_core::error::{AppError, FetchErrorKind};
use subcrawl_core::traits::Fetcher;
use url::Url;

/// HTTP fetcher using reqwest.
///
/// Downloads raw HTML from source pages and classifies failures into the
/// fetch error kinds the pipeline retries on. By default, SSRF protection is
/// **enabled**: requests to private/reserved IP ranges are blocked. Use
/// [`allow_private_urls`](Self::allow_private_urls) to disable this (e.g.,
/// for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("subcrawl/0.1 (subsidy announcement crawler)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::fetch(
                FetchErrorKind::from_status(status.as_u16()),
                format!("HTTP {} for {}", status.as_u16(), url),
            ));
        }

        response.text().await.map_err(|e| {
            let kind = if e.is_timeout() {
                FetchErrorKind::Timeout
            } else {
                FetchErrorKind::Network
            };
            AppError::fetch(kind, format!("Failed to read response body: {e}"))
        })
    }
}

fn classify_send_error(e: &reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::fetch(FetchErrorKind::Timeout, e.to_string())
    } else if let Some(status) = e.status() {
        AppError::fetch(FetchErrorKind::from_status(status.as_u16()), e.to_string())
    } else {
        AppError::fetch(FetchErrorKind::Network, e.to_string())
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
///
/// Blocked URLs fail as `http_4xx` so they are never retried.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let blocked = |message: String| AppError::fetch(FetchErrorKind::Http4xx, message);

    let parsed = Url::parse(url).map_err(|e| blocked(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(blocked(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| blocked("URL has no host".to_string()))?;

    if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(blocked(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host(format!("{host}:{port}"))
        .await
        .map_err(|e| {
            AppError::fetch(
                FetchErrorKind::Network,
                format!("DNS resolution failed for {host}: {e}"),
            )
        })?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::fetch(
            FetchErrorKind::Network,
            format!("DNS resolution returned no addresses for {host}"),
        ));
    }

    if let Some(private) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(blocked(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            private.ip()
        )));
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254.0.0/16, cloud metadata
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // fe80::/10
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // fc00::/7
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ipv4() {
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(is_private_ip("192.168.1.1".parse().unwrap()));
        assert!(is_private_ip("169.254.169.254".parse().unwrap()));
        assert!(is_private_ip("100.64.0.1".parse().unwrap()));
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("211.43.10.5".parse().unwrap()));
    }

    #[test]
    fn test_private_ipv6() {
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
        assert!(is_private_ip("fc00::1".parse().unwrap()));
        assert!(is_private_ip("::ffff:169.254.169.254".parse().unwrap()));
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_blocked_urls_are_permanent_failures() {
        for url in [
            "http://127.0.0.1/admin",
            "http://169.254.169.254/latest/meta-data/",
            "file:///etc/passwd",
        ] {
            let err = validate_url(url).await.unwrap_err();
            assert!(!err.is_retryable(), "{url} should not be retried");
            assert!(matches!(
                err,
                AppError::Fetch {
                    kind: FetchErrorKind::Http4xx,
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn test_private_fetch_is_blocked_before_any_request() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher.fetch("http://10.1.2.3/notice").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }
}
