//! Informational events emitted by the pool.
//!
//! Redundant or racy calls (banning an already banned proxy, failing one that was
//! already moved out of the good bucket) are never errors. They are reported here.

use log::{debug, info, warn};

use crate::endpoint::EndpointKey;
use crate::pool::Bucket;
use crate::prober::Verdict;

/// Something the pool did, or declined to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A verified candidate was inserted into a bucket.
    Verified { key: EndpointKey, verdict: Verdict, bucket: Bucket },
    /// A candidate was skipped because its identity is already tracked.
    AlreadyKnown { key: EndpointKey, bucket: Bucket },
    /// A reported outcome or transition referenced an untracked endpoint.
    NotTracked { key: EndpointKey },
    /// An endpoint exceeded the consecutive failure limit and moved to the bad bucket.
    MovedToBad { key: EndpointKey, consecutive_fails: u64 },
    /// An endpoint exceeded the failure limit but was not in the good bucket.
    AlreadyRemoved { key: EndpointKey, bucket: Bucket },
    Banned { key: EndpointKey },
    /// Ban requested for an endpoint that is not in the good bucket.
    AlreadyBanned { key: EndpointKey, bucket: Bucket },
    Unbanned { key: EndpointKey },
    /// Unban requested for an endpoint that is not in the banned bucket.
    AlreadyUnbanned { key: EndpointKey, bucket: Bucket },
    /// Selection was attempted on an empty bucket.
    Empty { bucket: Bucket },
}

/// Receives pool events. Implementations must be cheap; they run under the pool lock.
pub trait PoolObserver: Send + Sync {
    fn on_event(&self, event: &PoolEvent);
}

/// Default observer forwarding events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl PoolObserver for LogObserver {
    fn on_event(&self, event: &PoolEvent) {
        match event {
            PoolEvent::Verified { key, verdict, bucket } => {
                debug!("Adding {:?} proxy {} ({:?})", bucket, key, verdict)
            }
            PoolEvent::AlreadyKnown { key, bucket } => {
                debug!("Already knew {} ({:?})", key, bucket)
            }
            PoolEvent::NotTracked { key } => info!("Proxy {} is not tracked by the pool", key),
            PoolEvent::MovedToBad {
                key,
                consecutive_fails,
            } => warn!(
                "Proxy {} marked bad after {} consecutive failures",
                key, consecutive_fails
            ),
            PoolEvent::AlreadyRemoved { key, bucket } => {
                info!("Proxy {} already removed ({:?})", key, bucket)
            }
            PoolEvent::Banned { key } => info!("Banning proxy {}", key),
            PoolEvent::AlreadyBanned { key, bucket } => {
                info!("Proxy {} already banned or not usable ({:?})", key, bucket)
            }
            PoolEvent::Unbanned { key } => info!("Unbanning proxy {}", key),
            PoolEvent::AlreadyUnbanned { key, bucket } => {
                info!("Proxy {} already unbanned ({:?})", key, bucket)
            }
            PoolEvent::Empty { bucket } => warn!("No proxy in {:?} bucket", bucket),
        }
    }
}

/// Observer that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PoolObserver for NoopObserver {
    fn on_event(&self, _event: &PoolEvent) {}
}
