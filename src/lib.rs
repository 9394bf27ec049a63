//! # proxy-rotator
//!
//! A rotating pool of HTTP proxies for outbound scraping traffic.
//!
//! Candidates are collected from [`Source`]s, verified concurrently by a [`Verifier`] and
//! sorted into good and bad buckets. Consumers pick a random good proxy, report how it
//! behaved, and ban it when a target rejects it; bans expire after a configurable age.
//! The whole pool can be exported to and imported from three record files.

pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod middleware;
pub mod pool;
pub mod prober;
pub mod source;
mod store;
pub mod verifier;

pub use config::{ExportFiles, ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use endpoint::{Endpoint, EndpointKey, Reliability};
pub use error::{DecodeError, NoProxyAvailable, ParseEndpointError, PersistError, SourceError};
pub use events::{LogObserver, NoopObserver, PoolEvent, PoolObserver};
pub use middleware::ProxyPoolMiddleware;
pub use pool::{Bucket, PoolStats, ProxyPool};
pub use prober::{HttpProber, Prober, Verdict};
pub use source::{FileSource, HttpSource, Source};
pub use verifier::{Verifier, VerifyReport};
