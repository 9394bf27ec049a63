//! Core proxy pool implementation.
//!
//! # Buckets
//! Every tracked endpoint lives in exactly one of three buckets:
//!
//! ```text
//! Unverified --(probe success)--> Good
//! Unverified --(probe failure)--> Bad
//! Good       --(consecutive fails > fail_limit)--> Bad
//! Good       --(ban)--> Banned
//! Banned     --(ban older than max age, unban)--> Good
//! ```
//!
//! Nothing moves an endpoint out of Bad automatically. [`ProxyPool::recheck_bad`] re-verifies
//! the whole bucket on explicit request.

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::ProxyPoolConfig;
use crate::endpoint::{Endpoint, EndpointKey};
use crate::events::{LogObserver, PoolEvent, PoolObserver};
use crate::prober::Verdict;
use crate::source::{self, Source};
use crate::verifier::{Verifier, VerifyReport};

/// One of the three partitions of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Verified and usable.
    Good,
    /// Failed verification or failed too many times in a row.
    Bad,
    /// Rejected by a target; waiting for the ban to expire.
    Banned,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Good, Bucket::Bad, Bucket::Banned];
}

/// Number of endpoints per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub good: usize,
    pub bad: usize,
    pub banned: usize,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.good + self.bad + self.banned
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Buckets {
    good: HashMap<EndpointKey, Endpoint>,
    bad: HashMap<EndpointKey, Endpoint>,
    banned: HashMap<EndpointKey, Endpoint>,
}

impl Buckets {
    pub(crate) fn get(&self, bucket: Bucket) -> &HashMap<EndpointKey, Endpoint> {
        match bucket {
            Bucket::Good => &self.good,
            Bucket::Bad => &self.bad,
            Bucket::Banned => &self.banned,
        }
    }

    fn get_mut(&mut self, bucket: Bucket) -> &mut HashMap<EndpointKey, Endpoint> {
        match bucket {
            Bucket::Good => &mut self.good,
            Bucket::Bad => &mut self.bad,
            Bucket::Banned => &mut self.banned,
        }
    }

    pub(crate) fn locate(&self, key: &EndpointKey) -> Option<Bucket> {
        Bucket::ALL
            .into_iter()
            .find(|bucket| self.get(*bucket).contains_key(key))
    }

    /// Insert unless the identity is already tracked. Returns the bucket holding it otherwise.
    pub(crate) fn insert(&mut self, bucket: Bucket, endpoint: Endpoint) -> Result<(), Bucket> {
        if let Some(existing) = self.locate(endpoint.key()) {
            return Err(existing);
        }
        self.get_mut(bucket).insert(endpoint.key().clone(), endpoint);
        Ok(())
    }

    fn transfer(&mut self, key: &EndpointKey, from: Bucket, to: Bucket) -> Option<&mut Endpoint> {
        let endpoint = self.get_mut(from).remove(key)?;
        Some(self.get_mut(to).entry(key.clone()).or_insert(endpoint))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            good: self.good.len(),
            bad: self.bad.len(),
            banned: self.banned.len(),
        }
    }
}

/// A pool of proxies split into good, bad and banned buckets.
///
/// All bucket mutation happens under one lock, so each transition is atomic with respect
/// to concurrent verifiers and reporters.
pub struct ProxyPool {
    buckets: RwLock<Buckets>,
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
    observer: Arc<dyn PoolObserver>,
}

impl ProxyPool {
    /// Create an empty pool reporting its events to the `log` facade.
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self::with_observer(config, Arc::new(LogObserver))
    }

    /// Create an empty pool reporting its events to `observer`.
    pub fn with_observer(config: ProxyPoolConfig, observer: Arc<dyn PoolObserver>) -> Self {
        Self::from_buckets(config, observer, Buckets::default())
    }

    pub(crate) fn from_buckets(
        config: ProxyPoolConfig,
        observer: Arc<dyn PoolObserver>,
        buckets: Buckets,
    ) -> Self {
        Self {
            buckets: RwLock::new(buckets),
            config,
            observer,
        }
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        self.observer.on_event(&event);
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        self.buckets.read().stats()
    }

    /// The bucket currently holding `key`, if tracked.
    pub fn bucket_of(&self, key: &EndpointKey) -> Option<Bucket> {
        self.buckets.read().locate(key)
    }

    /// A snapshot of the endpoint tracked under `key`.
    pub fn get(&self, key: &EndpointKey) -> Option<Endpoint> {
        let buckets = self.buckets.read();
        let bucket = buckets.locate(key)?;
        buckets.get(bucket).get(key).cloned()
    }

    /// A snapshot of every endpoint in `bucket`.
    pub fn endpoints(&self, bucket: Bucket) -> Vec<Endpoint> {
        self.buckets.read().get(bucket).values().cloned().collect()
    }

    pub(crate) fn snapshot(&self) -> Buckets {
        self.buckets.read().clone()
    }

    /// Insert a verified candidate into the bucket matching its verdict.
    /// Returns `false` if the identity was already tracked.
    pub(crate) fn insert_verified(&self, endpoint: Endpoint, verdict: Verdict) -> bool {
        let bucket = if verdict.is_good() {
            Bucket::Good
        } else {
            Bucket::Bad
        };
        let key = endpoint.key().clone();
        let mut buckets = self.buckets.write();
        match buckets.insert(bucket, endpoint) {
            Ok(()) => {
                self.emit(PoolEvent::Verified {
                    key,
                    verdict,
                    bucket,
                });
                true
            }
            Err(existing) => {
                self.emit(PoolEvent::AlreadyKnown {
                    key,
                    bucket: existing,
                });
                false
            }
        }
    }

    /// Verify candidates not yet tracked and add them to the good or bad bucket.
    pub async fn import_candidates<I>(
        &self,
        verifier: &Verifier,
        candidates: I,
        limit: Option<usize>,
        require_anonymity: bool,
    ) -> VerifyReport
    where
        I: IntoIterator<Item = Endpoint>,
    {
        verifier
            .verify(self, candidates, limit, require_anonymity)
            .await
    }

    /// Fetch every source, then verify the union of their candidates.
    /// A source that fails to fetch is skipped.
    pub async fn fetch_sources(
        &self,
        sources: &[Box<dyn Source>],
        verifier: &Verifier,
        require_anonymity: bool,
    ) -> VerifyReport {
        info!("Fetching proxies from {} sources", sources.len());

        let mut candidates = HashSet::new();
        for source in sources {
            match source.fetch().await {
                Ok(lines) => {
                    let found = source::parse_candidates(&lines);
                    info!("Fetched {} proxies from {}", found.len(), source.name());
                    candidates.extend(found);
                }
                Err(e) => {
                    warn!("Failed to fetch proxies from {}: {}", source.name(), e);
                }
            }
        }

        info!("Found {} unique proxies before verification", candidates.len());
        let report = self
            .import_candidates(
                verifier,
                candidates.into_iter().map(Endpoint::from),
                None,
                require_anonymity,
            )
            .await;

        let stats = self.stats();
        info!(
            "Proxy pool status: {} good, {} bad, {} banned",
            stats.good, stats.bad, stats.banned
        );
        report
    }

    /// Re-verify every good endpoint. Statistics are kept.
    pub async fn recheck_good(&self, verifier: &Verifier, require_anonymity: bool) -> VerifyReport {
        self.recheck(Bucket::Good, verifier, require_anonymity).await
    }

    /// Re-verify every bad endpoint. Statistics are kept.
    pub async fn recheck_bad(&self, verifier: &Verifier, require_anonymity: bool) -> VerifyReport {
        self.recheck(Bucket::Bad, verifier, require_anonymity).await
    }

    /// Endpoints stay in `bucket` while their snapshot is verified, so they remain selectable
    /// and reportable. Each verdict then moves the tracked endpoint in place.
    async fn recheck(&self, bucket: Bucket, verifier: &Verifier, require_anonymity: bool) -> VerifyReport {
        let snapshot = self.endpoints(bucket);
        info!("Rechecking {} {:?} proxies", snapshot.len(), bucket);
        verifier
            .reverify(self, bucket, snapshot, require_anonymity)
            .await
    }

    /// Apply a recheck verdict to `key` if it is still in `from`, keeping its statistics.
    /// Returns `false` if the endpoint left `from` while it was being verified.
    pub(crate) fn apply_recheck(&self, key: &EndpointKey, from: Bucket, verdict: Verdict) -> bool {
        let to = if verdict.is_good() {
            Bucket::Good
        } else {
            Bucket::Bad
        };
        let mut buckets = self.buckets.write();
        match buckets.locate(key) {
            Some(current) if current == from => {
                if from != to {
                    buckets.transfer(key, from, to);
                }
                self.emit(PoolEvent::Verified {
                    key: key.clone(),
                    verdict,
                    bucket: to,
                });
                true
            }
            Some(current) => {
                self.emit(PoolEvent::AlreadyKnown {
                    key: key.clone(),
                    bucket: current,
                });
                false
            }
            None => {
                self.emit(PoolEvent::NotTracked { key: key.clone() });
                false
            }
        }
    }

    /// Record a successful request through `key`. Returns `false` if it is not tracked.
    pub fn report_success(&self, key: &EndpointKey) -> bool {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.locate(key) else {
            self.emit(PoolEvent::NotTracked { key: key.clone() });
            return false;
        };
        if let Some(endpoint) = buckets.get_mut(bucket).get_mut(key) {
            endpoint.record_success();
        }
        true
    }

    /// Record a failed request through `key`, moving it to the bad bucket once its
    /// consecutive failures exceed the limit. Returns `false` if it is not tracked.
    pub fn report_failure(&self, key: &EndpointKey) -> bool {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.locate(key) else {
            self.emit(PoolEvent::NotTracked { key: key.clone() });
            return false;
        };
        let Some(endpoint) = buckets.get_mut(bucket).get_mut(key) else {
            return false;
        };
        endpoint.record_failure();
        let consecutive_fails = endpoint.consecutive_fails();

        if consecutive_fails > u64::from(self.config.fail_limit) {
            if bucket == Bucket::Good {
                buckets.transfer(key, Bucket::Good, Bucket::Bad);
                self.emit(PoolEvent::MovedToBad {
                    key: key.clone(),
                    consecutive_fails,
                });
            } else {
                self.emit(PoolEvent::AlreadyRemoved {
                    key: key.clone(),
                    bucket,
                });
            }
        }
        true
    }

    /// Move a good endpoint to the banned bucket. Returns `false` (a no-op) otherwise.
    pub fn ban(&self, key: &EndpointKey) -> bool {
        self.ban_at(key, Utc::now())
    }

    /// Like [`ban`](Self::ban), stamping the ban with `at`.
    pub fn ban_at(&self, key: &EndpointKey, at: DateTime<Utc>) -> bool {
        let mut buckets = self.buckets.write();
        match buckets.locate(key) {
            Some(Bucket::Good) => {
                if let Some(endpoint) = buckets.transfer(key, Bucket::Good, Bucket::Banned) {
                    endpoint.ban_at(at);
                }
                self.emit(PoolEvent::Banned { key: key.clone() });
                true
            }
            Some(bucket) => {
                self.emit(PoolEvent::AlreadyBanned {
                    key: key.clone(),
                    bucket,
                });
                false
            }
            None => {
                self.emit(PoolEvent::NotTracked { key: key.clone() });
                false
            }
        }
    }

    /// Return a banned endpoint to the good bucket. Returns `false` (a no-op) otherwise.
    pub fn unban(&self, key: &EndpointKey) -> bool {
        let mut buckets = self.buckets.write();
        match buckets.locate(key) {
            Some(Bucket::Banned) => {
                if let Some(endpoint) = buckets.transfer(key, Bucket::Banned, Bucket::Good) {
                    endpoint.unban();
                }
                self.emit(PoolEvent::Unbanned { key: key.clone() });
                true
            }
            Some(bucket) => {
                self.emit(PoolEvent::AlreadyUnbanned {
                    key: key.clone(),
                    bucket,
                });
                false
            }
            None => {
                self.emit(PoolEvent::NotTracked { key: key.clone() });
                false
            }
        }
    }

    /// Unban every endpoint banned for longer than `max_age`. Returns the unbanned keys.
    pub fn unban_expired(&self, max_age: Duration) -> Vec<EndpointKey> {
        self.unban_expired_at(max_age, Utc::now())
    }

    /// Like [`unban_expired`](Self::unban_expired), measuring ban age at `now`.
    pub fn unban_expired_at(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<EndpointKey> {
        let mut buckets = self.buckets.write();
        let expired: Vec<EndpointKey> = buckets
            .banned
            .values()
            .filter(|endpoint| endpoint.since_ban_at(now).is_some_and(|age| age > max_age))
            .map(|endpoint| endpoint.key().clone())
            .collect();

        for key in &expired {
            if let Some(endpoint) = buckets.transfer(key, Bucket::Banned, Bucket::Good) {
                endpoint.unban();
            }
            self.emit(PoolEvent::Unbanned { key: key.clone() });
        }
        expired
    }

    /// A uniformly random good endpoint, or `None` if there is none right now.
    pub fn select_random_good(&self) -> Option<Endpoint> {
        self.select_random(Bucket::Good)
    }

    /// A uniformly random bad endpoint, or `None` if there is none.
    pub fn select_random_bad(&self) -> Option<Endpoint> {
        self.select_random(Bucket::Bad)
    }

    fn select_random(&self, bucket: Bucket) -> Option<Endpoint> {
        let selected = {
            let buckets = self.buckets.read();
            let mut rng = rand::rng();
            buckets.get(bucket).values().choose(&mut rng).cloned()
        };
        if selected.is_none() {
            self.emit(PoolEvent::Empty { bucket });
        }
        selected
    }

    /// Add every endpoint of `other` whose identity this pool does not track yet,
    /// into the same bucket it occupies in `other`. Returns how many were added.
    pub fn merge_from(&self, other: &ProxyPool) -> usize {
        let incoming = other.snapshot();
        let mut buckets = self.buckets.write();
        let mut merged = 0;
        for bucket in Bucket::ALL {
            for endpoint in incoming.get(bucket).values() {
                if buckets.insert(bucket, endpoint.clone()).is_ok() {
                    merged += 1;
                }
            }
        }
        merged
    }

    /// Spawn a background task that periodically unbans expired endpoints.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                time::sleep(pool.config.maintenance_interval).await;
                let unbanned = pool.unban_expired(pool.config.ban_max_age);

                let stats = pool.stats();
                info!(
                    "Proxy pool maintenance: {} unbanned, {} good, {} bad, {} banned",
                    unbanned.len(),
                    stats.good,
                    stats.bad,
                    stats.banned
                );
            }
        })
    }
}
