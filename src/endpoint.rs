//! Proxy endpoint identity, reliability statistics and ban history.

use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ParseEndpointError;

/// Identity of a proxy endpoint. Two endpoints are the same proxy iff their keys match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    /// Network address of the proxy.
    pub host: String,
    /// Listening port of the proxy.
    pub port: u16,
}

impl EndpointKey {
    /// Create a new key from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The proxy URL (e.g. "http://127.0.0.1:3128").
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for EndpointKey {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseEndpointError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseEndpointError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| ParseEndpointError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Snapshot of an endpoint's reliability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reliability {
    /// `successes / (successes + fails)`, or 1.0 for an untested endpoint.
    pub success_ratio: f64,
    /// Failures since the last success.
    pub consecutive_fails: u64,
}

/// A proxy endpoint with its accumulated statistics.
///
/// Equality and hashing only consider the [`EndpointKey`]; statistics are state, not identity.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub(crate) key: EndpointKey,
    pub(crate) successes: u64,
    pub(crate) fails: u64,
    pub(crate) consecutive_fails: u64,
    /// Never empty. The last slot is `Some` while banned.
    pub(crate) bans: Vec<Option<DateTime<Utc>>>,
}

impl Endpoint {
    /// Create a fresh, untested and unbanned endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        EndpointKey::new(host, port).into()
    }

    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    pub fn host(&self) -> &str {
        &self.key.host
    }

    pub fn port(&self) -> u16 {
        self.key.port
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn fails(&self) -> u64 {
        self.fails
    }

    pub fn consecutive_fails(&self) -> u64 {
        self.consecutive_fails
    }

    /// Every ban slot, oldest first. `None` marks an open (unbanned) slot.
    pub fn ban_history(&self) -> &[Option<DateTime<Utc>>] {
        &self.bans
    }

    /// Record a successful request through this endpoint.
    pub fn record_success(&mut self) {
        self.successes += 1;
        self.consecutive_fails = 0;
    }

    /// Record a failed request through this endpoint.
    pub fn record_failure(&mut self) {
        self.fails += 1;
        self.consecutive_fails += 1;
    }

    pub fn reliability(&self) -> Reliability {
        let total = self.successes + self.fails;
        let success_ratio = if total > 0 {
            self.successes as f64 / total as f64
        } else {
            1.0
        };
        Reliability {
            success_ratio,
            consecutive_fails: self.consecutive_fails,
        }
    }

    /// Ban the endpoint now. Returns `false` if it was already banned.
    pub fn ban(&mut self) -> bool {
        self.ban_at(Utc::now())
    }

    /// Ban the endpoint as of `at`. Returns `false` if it was already banned.
    ///
    /// Timestamps are kept at microsecond precision so they survive persistence unchanged.
    pub fn ban_at(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_banned() {
            return false;
        }
        let at = at.trunc_subsecs(6);
        match self.bans.last_mut() {
            Some(slot) => *slot = Some(at),
            None => self.bans.push(Some(at)),
        }
        true
    }

    /// Close the current ban. Returns `false` if the endpoint was not banned.
    pub fn unban(&mut self) -> bool {
        if !self.is_banned() {
            return false;
        }
        self.bans.push(None);
        true
    }

    pub fn is_banned(&self) -> bool {
        matches!(self.bans.last(), Some(Some(_)))
    }

    /// When the current ban started, if banned.
    pub fn banned_since(&self) -> Option<DateTime<Utc>> {
        self.bans.last().copied().flatten()
    }

    /// Time elapsed since the current ban started, if banned.
    pub fn since_ban(&self) -> Option<Duration> {
        self.since_ban_at(Utc::now())
    }

    /// Time elapsed between the current ban and `now`, if banned.
    /// A ban stamped after `now` counts as zero elapsed time.
    pub fn since_ban_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.banned_since()
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn hours_since_ban(&self) -> Option<f64> {
        self.since_ban().map(|elapsed| elapsed.as_secs_f64() / 3600.0)
    }
}

impl From<EndpointKey> for Endpoint {
    fn from(key: EndpointKey) -> Self {
        Self {
            key,
            successes: 0,
            fails: 0,
            consecutive_fails: 0,
            bans: vec![None],
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key.url())
    }
}
