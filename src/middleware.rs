//! Middleware implementation for reqwest.

use crate::endpoint::EndpointKey;
use crate::error::NoProxyAvailable;
use crate::pool::ProxyPool;

use anyhow::anyhow;
use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Middleware sending each request through a random good proxy of the pool.
///
/// Successes and failures are reported back to the pool. A response whose status is one
/// of the configured ban statuses bans the proxy and the request is retried elsewhere.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    pool: Arc<ProxyPool>,
    limiter: Arc<DefaultKeyedRateLimiter<EndpointKey>>,
}

impl ProxyPoolMiddleware {
    /// Create a new middleware over an already populated pool.
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        let stats = pool.stats();
        info!(
            "Proxy pool middleware using {}/{} good proxies",
            stats.good,
            stats.total()
        );
        if stats.good == 0 {
            warn!("No good proxies available in pool");
        }

        let rps = pool.config.max_requests_per_second.ceil() as u32;
        let quota = Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN));
        Self {
            pool,
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let max_retries = self.pool.config.retry_count;
        let mut retry_count = 0;

        // Drop limiter state of proxies idle long enough to be indistinguishable from fresh.
        self.limiter.retain_recent();

        loop {
            let Some(endpoint) = self.pool.select_random_good() else {
                let stats = self.pool.stats();
                warn!(
                    "No proxy available. Good: {}, Bad: {}, Banned: {}",
                    stats.good, stats.bad, stats.banned
                );
                return Err(Error::Middleware(anyhow!(NoProxyAvailable)));
            };
            let key = endpoint.key().clone();

            let proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                ))
            })?;

            info!("Using proxy: {} (attempt {})", key, retry_count + 1);
            self.limiter.until_key_ready(&key).await;

            let client = match reqwest::Proxy::all(key.url()).and_then(|proxy| {
                reqwest::Client::builder()
                    .proxy(proxy)
                    .timeout(self.pool.config.request_timeout)
                    .build()
            }) {
                Ok(client) => client,
                Err(e) => {
                    warn!("Failed to build client with proxy {}: {}", key, e);
                    self.pool.report_failure(&key);
                    retry_count += 1;
                    if retry_count > max_retries {
                        return Err(Error::Reqwest(e));
                    }
                    continue;
                }
            };

            match client.execute(proxied_request).await {
                Ok(response)
                    if self
                        .pool
                        .config
                        .ban_statuses
                        .contains(&response.status().as_u16()) =>
                {
                    warn!(
                        "Proxy {} rejected by target with status {}",
                        key,
                        response.status()
                    );
                    self.pool.ban(&key);
                    retry_count += 1;
                    if retry_count > max_retries {
                        return Ok(response);
                    }
                }
                Ok(response) => {
                    self.pool.report_success(&key);
                    return Ok(response);
                }
                Err(err) => {
                    warn!(
                        "Request failed with proxy {} (attempt {}): {}",
                        key,
                        retry_count + 1,
                        err
                    );
                    self.pool.report_failure(&key);
                    retry_count += 1;
                    if retry_count > max_retries {
                        return Err(Error::Reqwest(err));
                    }
                }
            }
        }
    }
}
