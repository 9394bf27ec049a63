//! Bounded concurrent verification of candidate endpoints.

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::config::ProxyPoolConfig;
use crate::endpoint::Endpoint;
use crate::events::PoolEvent;
use crate::pool::{Bucket, ProxyPool};
use crate::prober::{HttpProber, Prober, Verdict};

/// Outcome counts of one verification batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Probes started.
    pub dispatched: usize,
    /// Candidates inserted into the good bucket.
    pub good: usize,
    /// Candidates inserted into the bad bucket.
    pub bad: usize,
    /// Candidates not probed or not inserted because the pool already tracked them.
    pub skipped: usize,
}

/// How verdicts are applied to the pool.
#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Insert candidates the pool does not track yet.
    Import,
    /// Move endpoints already tracked in the given bucket.
    Recheck(Bucket),
}

/// Drives a [`Prober`] over a batch of candidates with at most `max_in_flight` probes at once.
#[derive(Clone)]
pub struct Verifier {
    prober: Arc<dyn Prober>,
    max_in_flight: usize,
    probe_timeout: Duration,
}

impl Verifier {
    /// Create a verifier using the concurrency bound and probe timeout from `config`.
    pub fn new(prober: Arc<dyn Prober>, config: &ProxyPoolConfig) -> Self {
        Self::with_limits(prober, config.max_in_flight, config.probe_timeout)
    }

    /// Create a verifier probing through HTTP against `config.probe_url`.
    pub fn http(config: &ProxyPoolConfig) -> Self {
        Self::new(Arc::new(HttpProber::new(config.probe_url.clone())), config)
    }

    pub fn with_limits(prober: Arc<dyn Prober>, max_in_flight: usize, probe_timeout: Duration) -> Self {
        Self {
            prober,
            max_in_flight: max_in_flight.max(1),
            probe_timeout,
        }
    }

    /// Probe every candidate unknown to `pool` and insert it into the good or bad bucket.
    ///
    /// Duplicate candidates are probed once. Once `limit` good verdicts have been applied no
    /// further probes are started; probes already in flight still complete and are applied.
    /// Verdicts are applied in completion order.
    pub async fn verify<I>(
        &self,
        pool: &ProxyPool,
        candidates: I,
        limit: Option<usize>,
        require_anonymity: bool,
    ) -> VerifyReport
    where
        I: IntoIterator<Item = Endpoint>,
    {
        self.run(pool, Mode::Import, candidates, limit, require_anonymity)
            .await
    }

    /// Verify snapshots of endpoints tracked in `bucket` and move each tracked endpoint to the
    /// bucket matching its verdict. Endpoints that left `bucket` meanwhile are skipped.
    pub(crate) async fn reverify(
        &self,
        pool: &ProxyPool,
        bucket: Bucket,
        snapshot: Vec<Endpoint>,
        require_anonymity: bool,
    ) -> VerifyReport {
        self.run(pool, Mode::Recheck(bucket), snapshot, None, require_anonymity)
            .await
    }

    async fn run<I>(
        &self,
        pool: &ProxyPool,
        mode: Mode,
        candidates: I,
        limit: Option<usize>,
        require_anonymity: bool,
    ) -> VerifyReport
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let mut seen = HashSet::new();
        let mut pending = candidates
            .into_iter()
            .filter(|candidate| seen.insert(candidate.key().clone()))
            .collect::<Vec<_>>()
            .into_iter();
        info!(
            "Verifying {} unique candidates, {} at a time",
            pending.len(),
            self.max_in_flight
        );

        let mut report = VerifyReport::default();
        let mut in_flight = FuturesUnordered::new();
        let target_reached = |good: usize| limit.is_some_and(|limit| good >= limit);

        loop {
            while in_flight.len() < self.max_in_flight && !target_reached(report.good) {
                let Some(candidate) = pending.next() else {
                    break;
                };
                let current = pool.bucket_of(candidate.key());
                let dispatch = match mode {
                    Mode::Import => current.is_none(),
                    Mode::Recheck(bucket) => current == Some(bucket),
                };
                if !dispatch {
                    let key = candidate.key().clone();
                    pool.emit(match current {
                        Some(bucket) => PoolEvent::AlreadyKnown { key, bucket },
                        None => PoolEvent::NotTracked { key },
                    });
                    report.skipped += 1;
                    continue;
                }
                report.dispatched += 1;
                in_flight.push(self.probe(candidate, require_anonymity));
            }

            let Some((endpoint, verdict)) = in_flight.next().await else {
                break;
            };
            let applied = match mode {
                Mode::Import => pool.insert_verified(endpoint, verdict),
                Mode::Recheck(bucket) => pool.apply_recheck(endpoint.key(), bucket, verdict),
            };
            if !applied {
                report.skipped += 1;
            } else if verdict.is_good() {
                report.good += 1;
            } else {
                report.bad += 1;
            }
        }

        info!(
            "Verification completed: {} good, {} bad, {} skipped",
            report.good, report.bad, report.skipped
        );
        report
    }

    async fn probe(&self, endpoint: Endpoint, require_anonymity: bool) -> (Endpoint, Verdict) {
        let probe = self
            .prober
            .probe(&endpoint, require_anonymity, self.probe_timeout);
        let verdict = match time::timeout(self.probe_timeout, probe).await {
            Ok(verdict) => verdict,
            Err(_) => {
                debug!("Probe of {} timed out", endpoint);
                Verdict::Failure
            }
        };
        (endpoint, verdict)
    }
}
