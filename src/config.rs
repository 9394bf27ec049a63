//! Configuration for the proxy pool.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Source identifiers to fetch proxy lists from (URLs or file paths).
    pub sources: Vec<String>,
    /// Consecutive failures tolerated before a good proxy is moved to the bad bucket.
    pub fail_limit: u32,
    /// Maximum number of probes in flight at once.
    pub max_in_flight: usize,
    /// Timeout for a single probe.
    pub probe_timeout: Duration,
    /// URL used to probe proxies. Must echo the caller's origin as JSON.
    pub probe_url: String,
    /// How long a proxy stays banned before it is returned to the good bucket.
    pub ban_max_age: Duration,
    /// Interval between background ban expiry sweeps.
    pub maintenance_interval: Duration,
    /// Number of times to retry a request with different proxies.
    pub retry_count: usize,
    /// Timeout for requests sent through a proxy by the middleware.
    pub request_timeout: Duration,
    /// Maximum requests per second per proxy.
    pub max_requests_per_second: f64,
    /// Response statuses meaning the target banned the proxy.
    pub ban_statuses: Vec<u16>,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

/// Builder for `ProxyPoolConfig`.
#[derive(Debug, Default)]
pub struct ProxyPoolConfigBuilder {
    sources: Vec<String>,
    fail_limit: Option<u32>,
    max_in_flight: Option<usize>,
    probe_timeout: Option<Duration>,
    probe_url: Option<String>,
    ban_max_age: Option<Duration>,
    maintenance_interval: Option<Duration>,
    retry_count: Option<usize>,
    request_timeout: Option<Duration>,
    max_requests_per_second: Option<f64>,
    ban_statuses: Option<Vec<u16>>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source identifiers to fetch proxy lists from.
    pub fn sources(mut self, sources: Vec<impl Into<String>>) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Set the consecutive failures tolerated before a good proxy is moved to the bad bucket.
    pub fn fail_limit(mut self, limit: u32) -> Self {
        self.fail_limit = Some(limit);
        self
    }

    /// Set the maximum number of concurrent probes. Zero is treated as one.
    pub fn max_in_flight(mut self, count: usize) -> Self {
        self.max_in_flight = Some(count);
        self
    }

    /// Set the timeout for a single probe.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set the URL used to probe proxies.
    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }

    /// Set how long a proxy stays banned before it returns to the good bucket.
    pub fn ban_max_age(mut self, age: Duration) -> Self {
        self.ban_max_age = Some(age);
        self
    }

    /// Set the interval between background ban expiry sweeps.
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = Some(interval);
        self
    }

    /// Set the number of times to retry a request with different proxies.
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Set the timeout for requests sent through a proxy by the middleware.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Set the response statuses meaning the target banned the proxy.
    pub fn ban_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.ban_statuses = Some(statuses);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            sources: self.sources,
            fail_limit: self.fail_limit.unwrap_or(3),
            max_in_flight: self.max_in_flight.unwrap_or(64).max(1),
            probe_timeout: self.probe_timeout.unwrap_or(Duration::from_secs(5)),
            probe_url: self.probe_url.unwrap_or_else(|| "http://httpbin.org/ip".to_string()),
            ban_max_age: self.ban_max_age.unwrap_or(Duration::from_secs(3600)),
            maintenance_interval: self.maintenance_interval.unwrap_or(Duration::from_secs(300)),
            retry_count: self.retry_count.unwrap_or(3),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(10)),
            max_requests_per_second: self.max_requests_per_second.unwrap_or(5.0),
            ban_statuses: self.ban_statuses.unwrap_or_else(|| vec![403, 429]),
        }
    }
}

/// Paths of the three files a pool is exported to and imported from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFiles {
    pub good: PathBuf,
    pub bad: PathBuf,
    pub banned: PathBuf,
}

impl ExportFiles {
    pub fn new(good: impl Into<PathBuf>, bad: impl Into<PathBuf>, banned: impl Into<PathBuf>) -> Self {
        Self {
            good: good.into(),
            bad: bad.into(),
            banned: banned.into(),
        }
    }

    /// `good_proxies`, `bad_proxies` and `banned_proxies` inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::new(
            dir.join("good_proxies"),
            dir.join("bad_proxies"),
            dir.join("banned_proxies"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ProxyPoolConfig::default();
        assert_eq!(config.fail_limit, 3);
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.ban_statuses, vec![403, 429]);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ProxyPoolConfig::builder()
            .fail_limit(7)
            .probe_timeout(Duration::from_millis(250))
            .probe_url("http://127.0.0.1:8080/ip")
            .ban_max_age(Duration::from_secs(60))
            .maintenance_interval(Duration::from_secs(5))
            .request_timeout(Duration::from_secs(2))
            .ban_statuses(vec![503])
            .build();
        assert_eq!(config.fail_limit, 7);
        assert_eq!(config.probe_timeout, Duration::from_millis(250));
        assert_eq!(config.probe_url, "http://127.0.0.1:8080/ip");
        assert_eq!(config.ban_max_age, Duration::from_secs(60));
        assert_eq!(config.maintenance_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.ban_statuses, vec![503]);
        assert_eq!(config.retry_count, 3);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = ProxyPoolConfig::builder().max_in_flight(0).build();
        assert_eq!(config.max_in_flight, 1);
    }
}
