//! End-to-end lifecycle tests for the proxy pool.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use proxy_rotator::source::FileSource;
use proxy_rotator::{
    Bucket, Endpoint, EndpointKey, ExportFiles, Prober, ProxyPool, ProxyPoolConfig, Source,
    Verdict, Verifier,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Verdicts scripted per host; unknown hosts fail. Sleeps a pseudo-random time so
/// completions arrive out of dispatch order.
struct ScriptedProber {
    verdicts: HashMap<String, Verdict>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    probed: Mutex<Vec<EndpointKey>>,
}

impl ScriptedProber {
    fn new(verdicts: HashMap<String, Verdict>) -> Self {
        Self {
            verdicts,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            probed: Mutex::new(Vec::new()),
        }
    }

    fn probe_count(&self, key: &EndpointKey) -> usize {
        self.probed.lock().iter().filter(|k| *k == key).count()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, endpoint: &Endpoint, require_anonymity: bool, _timeout: Duration) -> Verdict {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        self.probed.lock().push(endpoint.key().clone());

        let jitter = (endpoint.port() as u64 * 7919) % 13;
        tokio::time::sleep(Duration::from_millis(jitter)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.verdicts.get(endpoint.host()) {
            Some(Verdict::Success) if require_anonymity => Verdict::Failure,
            Some(verdict) => *verdict,
            None => Verdict::Failure,
        }
    }
}

fn tracked(pool: &ProxyPool) -> Vec<EndpointKey> {
    Bucket::ALL
        .into_iter()
        .flat_map(|bucket| pool.endpoints(bucket))
        .map(|endpoint| endpoint.key().clone())
        .collect()
}

fn assert_disjoint(pool: &ProxyPool) {
    let keys = tracked(pool);
    let unique: HashSet<_> = keys.iter().cloned().collect();
    assert_eq!(keys.len(), unique.len(), "an identity is tracked in two buckets");
}

#[tokio::test]
async fn import_of_hundred_candidates_loses_and_duplicates_nothing() {
    init_logging();
    let verdicts = (0..100u16)
        .map(|i| {
            let verdict = if i % 3 == 0 { Verdict::Failure } else { Verdict::Success };
            (format!("10.2.0.{}", i), verdict)
        })
        .collect();
    let prober = Arc::new(ScriptedProber::new(verdicts));
    let config = ProxyPoolConfig::builder().max_in_flight(10).build();
    let verifier = Verifier::new(prober.clone(), &config);
    let pool = ProxyPool::new(config);

    let candidates: Vec<Endpoint> = (0..100u16)
        .map(|i| Endpoint::new(format!("10.2.0.{}", i), 8000 + i))
        .collect();
    let report = pool.import_candidates(&verifier, candidates, None, false).await;

    assert_eq!(report.dispatched, 100);
    assert_eq!(report.good + report.bad, 100);
    assert_eq!(pool.stats().good, 66);
    assert_eq!(pool.stats().bad, 34);
    assert_eq!(pool.stats().banned, 0);
    assert!(prober.peak.load(Ordering::SeqCst) <= 10);
    assert_disjoint(&pool);
}

#[tokio::test]
async fn candidate_already_bad_is_not_retested() {
    init_logging();
    let prober = Arc::new(ScriptedProber::new(HashMap::new()));
    let verifier = Verifier::with_limits(prober.clone(), 4, Duration::from_secs(1));
    let pool = ProxyPool::new(ProxyPoolConfig::default());
    let key = EndpointKey::new("10.3.0.1", 3128);

    pool.import_candidates(&verifier, [Endpoint::from(key.clone())], None, false)
        .await;
    assert_eq!(pool.bucket_of(&key), Some(Bucket::Bad));

    let report = pool
        .import_candidates(&verifier, [Endpoint::from(key.clone())], None, false)
        .await;
    assert_eq!(report.skipped, 1);
    assert_eq!(prober.probe_count(&key), 1);
    assert_eq!(pool.stats().bad, 1);
    assert_eq!(tracked(&pool), vec![key]);
}

#[tokio::test]
async fn anonymity_requirement_turns_plain_success_into_failure() {
    init_logging();
    let verdicts = HashMap::from([
        ("10.4.0.1".to_string(), Verdict::Success),
        ("10.4.0.2".to_string(), Verdict::AnonymitySuccess),
    ]);
    let verifier = Verifier::with_limits(
        Arc::new(ScriptedProber::new(verdicts)),
        4,
        Duration::from_secs(1),
    );
    let pool = ProxyPool::new(ProxyPoolConfig::default());

    pool.import_candidates(
        &verifier,
        [Endpoint::new("10.4.0.1", 80), Endpoint::new("10.4.0.2", 80)],
        None,
        true,
    )
    .await;

    assert_eq!(pool.bucket_of(&EndpointKey::new("10.4.0.1", 80)), Some(Bucket::Bad));
    assert_eq!(pool.bucket_of(&EndpointKey::new("10.4.0.2", 80)), Some(Bucket::Good));
}

#[tokio::test]
async fn sources_feed_the_pool_and_failing_sources_are_skipped() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("list.txt");
    std::fs::write(&list, "10.5.0.1:80\nnot a proxy\n10.5.0.2:81 HTTPS\n10.5.0.1:80\n").unwrap();

    let verdicts = HashMap::from([("10.5.0.1".to_string(), Verdict::Success)]);
    let verifier = Verifier::with_limits(
        Arc::new(ScriptedProber::new(verdicts)),
        4,
        Duration::from_secs(1),
    );
    let pool = ProxyPool::new(ProxyPoolConfig::default());
    let sources: Vec<Box<dyn Source>> = vec![
        Box::new(FileSource::new(&list)),
        Box::new(FileSource::new(dir.path().join("missing.txt"))),
    ];

    let report = pool.fetch_sources(&sources, &verifier, false).await;

    assert_eq!(report.dispatched, 2);
    assert_eq!(pool.bucket_of(&EndpointKey::new("10.5.0.1", 80)), Some(Bucket::Good));
    assert_eq!(pool.bucket_of(&EndpointKey::new("10.5.0.2", 81)), Some(Bucket::Bad));
}

#[tokio::test]
async fn recheck_bad_can_promote_recovered_endpoints() {
    init_logging();
    let verdicts = HashMap::from([("10.6.0.1".to_string(), Verdict::Success)]);
    let verifier = Verifier::with_limits(
        Arc::new(ScriptedProber::new(verdicts)),
        4,
        Duration::from_secs(1),
    );
    let config = ProxyPoolConfig::builder().fail_limit(0).build();
    let pool = ProxyPool::new(config);
    let key = EndpointKey::new("10.6.0.1", 80);

    pool.import_candidates(&verifier, [Endpoint::from(key.clone())], None, false)
        .await;
    pool.report_failure(&key);
    assert_eq!(pool.bucket_of(&key), Some(Bucket::Bad));

    let report = pool.recheck_bad(&verifier, false).await;

    assert_eq!(report.good, 1);
    assert_eq!(pool.bucket_of(&key), Some(Bucket::Good));
    assert_eq!(pool.get(&key).unwrap().fails(), 1);
}

#[tokio::test]
async fn full_cycle_survives_export_and_merge() {
    init_logging();
    let verdicts = (1..=4u16)
        .map(|i| (format!("10.7.0.{}", i), Verdict::Success))
        .collect();
    let verifier = Verifier::with_limits(
        Arc::new(ScriptedProber::new(verdicts)),
        2,
        Duration::from_secs(1),
    );
    let pool = ProxyPool::new(ProxyPoolConfig::builder().fail_limit(1).build());
    let candidates: Vec<Endpoint> = (1..=5u16)
        .map(|i| Endpoint::new(format!("10.7.0.{}", i), 80))
        .collect();
    pool.import_candidates(&verifier, candidates, None, false).await;

    let k = |i: u8| EndpointKey::new(format!("10.7.0.{}", i), 80);
    pool.report_failure(&k(1));
    pool.report_failure(&k(1));
    pool.ban_at(&k(2), Utc::now() - TimeDelta::hours(3));
    pool.ban(&k(3));
    pool.report_success(&k(4));

    assert_eq!(pool.bucket_of(&k(1)), Some(Bucket::Bad));
    assert_eq!(pool.bucket_of(&k(5)), Some(Bucket::Bad));
    assert_eq!(pool.stats().banned, 2);

    let unbanned = pool.unban_expired(Duration::from_secs(3600));
    assert_eq!(unbanned, vec![k(2)]);
    assert_disjoint(&pool);

    let dir = tempfile::tempdir().unwrap();
    let files = ExportFiles::in_dir(dir.path());
    pool.export(&files).unwrap();
    let restored = ProxyPool::import(ProxyPoolConfig::default(), &files).unwrap();

    assert_eq!(restored.stats(), pool.stats());
    let two = restored.get(&k(2)).unwrap();
    assert!(!two.is_banned());
    assert_eq!(two.ban_history().len(), 2);
    assert_eq!(restored.get(&k(4)).unwrap().successes(), 1);
    assert_eq!(restored.get(&k(1)).unwrap().consecutive_fails(), 2);

    let other = ProxyPool::new(ProxyPoolConfig::default());
    other.import_candidates(&verifier, [Endpoint::new("10.7.0.1", 80), Endpoint::new("10.7.0.9", 80)], None, false)
        .await;
    assert_eq!(restored.merge_from(&other), 1);
    assert_eq!(restored.bucket_of(&k(1)), Some(Bucket::Bad));
    assert_eq!(restored.bucket_of(&k(9)), Some(Bucket::Bad));
    assert_disjoint(&restored);
}

/// Returns a fixed verdict after a fixed delay.
struct DelayedProber {
    delay: Duration,
    verdict: Verdict,
}

#[async_trait]
impl Prober for DelayedProber {
    async fn probe(&self, _endpoint: &Endpoint, _anon: bool, _timeout: Duration) -> Verdict {
        tokio::time::sleep(self.delay).await;
        self.verdict
    }
}

fn delayed(delay_ms: u64, verdict: Verdict) -> Verifier {
    Verifier::with_limits(
        Arc::new(DelayedProber {
            delay: Duration::from_millis(delay_ms),
            verdict,
        }),
        4,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn recheck_keeps_endpoints_tracked_and_history_intact() {
    init_logging();
    let pool = ProxyPool::new(ProxyPoolConfig::builder().fail_limit(10).build());
    let key = EndpointKey::new("10.8.0.1", 80);
    pool.import_candidates(&delayed(0, Verdict::Success), [Endpoint::from(key.clone())], None, false)
        .await;
    pool.report_success(&key);
    for _ in 0..5 {
        pool.report_failure(&key);
    }

    let slow = delayed(200, Verdict::Failure);
    let during = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.bucket_of(&key), Some(Bucket::Good));
        assert!(pool.select_random_good().is_some());
        let reimport = pool
            .import_candidates(&slow, [Endpoint::from(key.clone())], None, false)
            .await;
        assert_eq!(reimport.dispatched, 0);
        assert_eq!(reimport.skipped, 1);
        assert!(pool.report_failure(&key));
    };
    let (report, ()) = tokio::join!(pool.recheck_good(&slow, false), during);

    assert_eq!(report.bad, 1);
    assert_eq!(pool.bucket_of(&key), Some(Bucket::Bad));
    let endpoint = pool.get(&key).unwrap();
    assert_eq!(endpoint.successes(), 1);
    assert_eq!(endpoint.fails(), 6);
    assert_eq!(pool.stats().total(), 1);
}

#[tokio::test]
async fn endpoint_banned_during_recheck_stays_banned() {
    init_logging();
    let pool = ProxyPool::new(ProxyPoolConfig::default());
    let key = EndpointKey::new("10.8.0.2", 80);
    pool.import_candidates(&delayed(0, Verdict::Success), [Endpoint::from(key.clone())], None, false)
        .await;

    let slow = delayed(150, Verdict::Success);
    let during = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pool.ban(&key));
    };
    let (report, ()) = tokio::join!(pool.recheck_good(&slow, false), during);

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(pool.bucket_of(&key), Some(Bucket::Banned));
    assert!(pool.get(&key).unwrap().is_banned());
}
