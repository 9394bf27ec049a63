//! Error types for the proxy-rotator crate.

use std::path::PathBuf;
use thiserror::Error;

use crate::endpoint::EndpointKey;

/// Error returned when no healthy proxy is available in the pool.
#[derive(Debug, Error)]
#[error("No proxy available in pool")]
pub struct NoProxyAvailable;

/// A `host:port` string that could not be turned into an endpoint identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseEndpointError {
    #[error("missing ':' separator in {0:?}")]
    MissingPort(String),
    #[error("empty host in {0:?}")]
    EmptyHost(String),
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

/// A persisted endpoint record that cannot be restored.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("record for {0} has an empty ban history")]
    EmptyBanHistory(EndpointKey),
    #[error("malformed ban timestamp {value:?}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Failure while exporting or importing a pool.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: DecodeError,
    },
    #[error("{path}:{line}: {key} is already present in another record")]
    Duplicate {
        path: PathBuf,
        line: usize,
        key: EndpointKey,
    },
    #[error("failed to encode {key}: {source}")]
    Encode {
        key: EndpointKey,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure while fetching raw candidates from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid source url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
