//! Single-endpoint verification.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::endpoint::Endpoint;

/// Outcome of probing one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reachable and returned a well-formed reply.
    Success,
    /// Reachable, well-formed, and the observed origin is not the proxy's own host.
    AnonymitySuccess,
    /// Timeout, transport error, malformed reply, or failed anonymity check.
    Failure,
}

impl Verdict {
    /// Whether the endpoint belongs in the good bucket.
    pub fn is_good(self) -> bool {
        matches!(self, Verdict::Success | Verdict::AnonymitySuccess)
    }
}

/// Performs one verification round-trip through an endpoint.
///
/// Implementations classify every transport problem as [`Verdict::Failure`]; they never error.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint, require_anonymity: bool, timeout: Duration) -> Verdict;
}

/// Prober sending a GET to an "echo my IP" service (httpbin style) through the proxy.
#[derive(Debug, Clone)]
pub struct HttpProber {
    check_url: String,
}

impl HttpProber {
    /// Create a prober against `check_url`, which must answer with `{"origin": "<ip>[, <ip>...]"}`.
    pub fn new(check_url: impl Into<String>) -> Self {
        Self {
            check_url: check_url.into(),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &Endpoint, require_anonymity: bool, timeout: Duration) -> Verdict {
        debug!("Testing proxy {}", endpoint);

        let proxy = match reqwest::Proxy::all(endpoint.key().url()) {
            Ok(proxy) => proxy,
            Err(e) => {
                debug!("Invalid proxy url for {}: {}", endpoint, e);
                return Verdict::Failure;
            }
        };
        let client = match Client::builder().timeout(timeout).proxy(proxy).build() {
            Ok(client) => client,
            Err(e) => {
                debug!("Failed to build client for {}: {}", endpoint, e);
                return Verdict::Failure;
            }
        };

        let body = match client.get(&self.check_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(body) => body,
                Err(e) => {
                    debug!("Malformed reply through {}: {}", endpoint, e);
                    return Verdict::Failure;
                }
            },
            Ok(resp) => {
                debug!("Proxy {} answered with status {}", endpoint, resp.status());
                return Verdict::Failure;
            }
            Err(e) => {
                debug!("Proxy connection error for {}: {}", endpoint, e);
                return Verdict::Failure;
            }
        };

        classify(&body, endpoint.host(), require_anonymity)
    }
}

/// Classify an echo reply received through the proxy at `host`.
pub fn classify(body: &Value, host: &str, require_anonymity: bool) -> Verdict {
    let Some(origin) = body.get("origin").and_then(Value::as_str) else {
        return Verdict::Failure;
    };
    if !require_anonymity {
        return Verdict::Success;
    }
    let observed = origin.split(',').next().unwrap_or_default().trim();
    if observed != host {
        Verdict::AnonymitySuccess
    } else {
        Verdict::Failure
    }
}
