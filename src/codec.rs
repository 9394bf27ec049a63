//! One-line record format for persisted endpoints.
//!
//! Each endpoint is a JSON object on its own line:
//!
//! ```text
//! {"host":"10.0.0.1","port":3128,"successes":4,"fails":1,"consecutive_fails":0,"bans":["2024-05-01T10:00:00.000000Z",null]}
//! ```
//!
//! Ban timestamps are RFC 3339 in UTC with microsecond precision; `null` marks an open slot.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::{Endpoint, EndpointKey};
use crate::error::DecodeError;

/// Format used by earlier exports, read as UTC.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Serialize, Deserialize)]
struct Record {
    host: String,
    port: u16,
    successes: u64,
    fails: u64,
    consecutive_fails: u64,
    bans: Vec<Option<String>>,
}

/// Encode an endpoint as a single record line (without the trailing newline).
pub fn encode(endpoint: &Endpoint) -> Result<String, serde_json::Error> {
    let record = Record {
        host: endpoint.key.host.clone(),
        port: endpoint.key.port,
        successes: endpoint.successes,
        fails: endpoint.fails,
        consecutive_fails: endpoint.consecutive_fails,
        bans: endpoint
            .bans
            .iter()
            .map(|slot| slot.map(|at| at.to_rfc3339_opts(SecondsFormat::Micros, true)))
            .collect(),
    };
    serde_json::to_string(&record)
}

/// Decode a record line back into an endpoint with all statistics restored.
pub fn decode(line: &str) -> Result<Endpoint, DecodeError> {
    let record: Record = serde_json::from_str(line.trim())?;
    let key = EndpointKey::new(record.host, record.port);
    if record.bans.is_empty() {
        return Err(DecodeError::EmptyBanHistory(key));
    }
    let bans = record
        .bans
        .into_iter()
        .map(|slot| slot.as_deref().map(parse_timestamp).transpose())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Endpoint {
        key,
        successes: record.successes,
        fails: record.fails,
        consecutive_fails: record.consecutive_fails,
        bans,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, LEGACY_TIMESTAMP_FORMAT).map(|at| at.and_utc())
        })
        .map_err(|source| DecodeError::Timestamp {
            value: value.to_string(),
            source,
        })
}
