//! NGINX Plus status document decoding
//!
//! Turns the raw `/status` payload into a typed [`StatusSnapshot`]:
//! - unknown fields are ignored
//! - missing or `null` fields decode to zero / empty
//! - integer and float numbers are both accepted (floats truncate)
//! - the peer list is located according to a [`SchemaVersion`]

mod number;

use crate::error::{json_kind, DecodeError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Where the upstream peer list lives in the status document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// Pick `peers` or `legacy` from the JSON type of `cache_servers`
    #[default]
    Auto,
    /// `upstreams.cache_servers.peers[]`
    Peers,
    /// `upstreams.cache_servers[]`
    Legacy,
}

impl SchemaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::Auto => "auto",
            SchemaVersion::Peers => "peers",
            SchemaVersion::Legacy => "legacy",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SchemaVersion::Auto),
            "peers" => Ok(SchemaVersion::Peers),
            "legacy" => Ok(SchemaVersion::Legacy),
            other => Err(format!("unknown schema version '{other}' (expected auto, peers or legacy)")),
        }
    }
}

/// Complete decoded state of one status document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub address: String,
    pub nginx_version: String,
    pub version: u64,
    pub timestamp: u64,
    pub load_timestamp: u64,
    pub connections: Connections,
    pub requests: Requests,
    /// Upstream peers in document order; the index is only a positional tag
    pub peers: Vec<PeerStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Connections {
    #[serde(deserialize_with = "number::lenient")]
    pub accepted: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub active: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub dropped: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub idle: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requests {
    #[serde(deserialize_with = "number::lenient")]
    pub total: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub current: u64,
}

/// One upstream server entry of the `cache_servers` group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerStats {
    #[serde(deserialize_with = "number::lenient")]
    pub id: u64,
    #[serde(deserialize_with = "null_default")]
    pub server: String,
    #[serde(deserialize_with = "null_default")]
    pub state: String,
    #[serde(deserialize_with = "null_default")]
    pub backup: bool,
    #[serde(deserialize_with = "number::lenient")]
    pub weight: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub active: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub requests: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub fails: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub unavail: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub sent: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub received: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub selected: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub downtime: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub downstart: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub keepalive: u64,
    #[serde(deserialize_with = "null_default")]
    pub responses: ResponseCounters,
    #[serde(deserialize_with = "null_default")]
    pub health_checks: HealthCheck,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCounters {
    #[serde(rename = "1xx", deserialize_with = "number::lenient")]
    pub informational: u64,
    #[serde(rename = "2xx", deserialize_with = "number::lenient")]
    pub success: u64,
    #[serde(rename = "3xx", deserialize_with = "number::lenient")]
    pub redirection: u64,
    #[serde(rename = "4xx", deserialize_with = "number::lenient")]
    pub client_error: u64,
    #[serde(rename = "5xx", deserialize_with = "number::lenient")]
    pub server_error: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    #[serde(deserialize_with = "number::lenient")]
    pub checks: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub fails: u64,
    #[serde(deserialize_with = "number::lenient")]
    pub unhealthy: u64,
    #[serde(deserialize_with = "null_default")]
    pub last_passed: bool,
}

// Wire shape of the document; `cache_servers` stays raw until the
// schema version has been applied.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStatus {
    #[serde(deserialize_with = "null_default")]
    address: String,
    #[serde(deserialize_with = "null_default")]
    nginx_version: String,
    #[serde(deserialize_with = "number::lenient")]
    version: u64,
    #[serde(deserialize_with = "number::lenient")]
    timestamp: u64,
    #[serde(deserialize_with = "number::lenient")]
    load_timestamp: u64,
    #[serde(deserialize_with = "null_default")]
    connections: Connections,
    #[serde(deserialize_with = "null_default")]
    requests: Requests,
    #[serde(deserialize_with = "null_default")]
    upstreams: RawUpstreams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawUpstreams {
    cache_servers: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PeersWrapper {
    peers: Option<Vec<PeerStats>>,
}

// `null` on a known field means the same as the field being absent
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a raw status payload. Nothing is returned unless the whole
/// document decodes.
pub fn decode(payload: &[u8], version: SchemaVersion) -> Result<StatusSnapshot, DecodeError> {
    let root: Value = serde_json::from_slice(payload)?;
    if !root.is_object() {
        return Err(DecodeError::NotAnObject { found: json_kind(&root) });
    }

    let raw: RawStatus = serde_json::from_value(root)?;
    let peers = decode_peers(raw.upstreams.cache_servers, version)?;

    let snapshot = StatusSnapshot {
        address: raw.address,
        nginx_version: raw.nginx_version,
        version: raw.version,
        timestamp: raw.timestamp,
        load_timestamp: raw.load_timestamp,
        connections: raw.connections,
        requests: raw.requests,
        peers,
    };

    debug!(
        address = %snapshot.address,
        nginx_version = %snapshot.nginx_version,
        version = snapshot.version,
        timestamp = snapshot.timestamp,
        load_timestamp = snapshot.load_timestamp,
        peers = snapshot.peers.len(),
        "Decoded status snapshot"
    );
    for (index, peer) in snapshot.peers.iter().enumerate() {
        debug!(index, id = peer.id, server = %peer.server, state = %peer.state, backup = peer.backup, "Upstream peer");
    }

    Ok(snapshot)
}

fn decode_peers(cache_servers: Value, version: SchemaVersion) -> Result<Vec<PeerStats>, DecodeError> {
    match (version, cache_servers) {
        (_, Value::Null) => Ok(Vec::new()),
        (SchemaVersion::Auto | SchemaVersion::Peers, wrapper @ Value::Object(_)) => {
            let wrapper: PeersWrapper = serde_json::from_value(wrapper)?;
            Ok(wrapper.peers.unwrap_or_default())
        }
        (SchemaVersion::Auto | SchemaVersion::Legacy, list @ Value::Array(_)) => {
            Ok(serde_json::from_value(list)?)
        }
        (version, other) => Err(DecodeError::SchemaMismatch {
            expected: version.as_str(),
            found: json_kind(&other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCENARIO: &str = r#"{"connections":{"accepted":5,"active":2,"dropped":0,"idle":1},"requests":{"total":100,"current":3},"upstreams":{"cache_servers":{"peers":[{"active":1,"requests":10,"fails":0,"unavail":0,"sent":500,"received":900,"responses":{"1xx":0,"2xx":9,"3xx":1,"4xx":0,"5xx":0,"total":10},"health_checks":{"fails":0,"unhealthy":0}}]}}}"#;

    // Inverse of `decode` for the wrapped layout
    fn encode(snapshot: &StatusSnapshot) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "address": snapshot.address,
            "nginx_version": snapshot.nginx_version,
            "version": snapshot.version,
            "timestamp": snapshot.timestamp,
            "load_timestamp": snapshot.load_timestamp,
            "connections": snapshot.connections,
            "requests": snapshot.requests,
            "upstreams": { "cache_servers": { "peers": snapshot.peers } },
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_scenario_document() {
        let snapshot = decode(SCENARIO.as_bytes(), SchemaVersion::Auto).unwrap();

        assert_eq!(snapshot.connections.accepted, 5);
        assert_eq!(snapshot.connections.active, 2);
        assert_eq!(snapshot.connections.idle, 1);
        assert_eq!(snapshot.requests.total, 100);
        assert_eq!(snapshot.requests.current, 3);
        assert_eq!(snapshot.peers.len(), 1);

        let peer = &snapshot.peers[0];
        assert_eq!(peer.sent, 500);
        assert_eq!(peer.received, 900);
        assert_eq!(peer.responses.success, 9);
        assert_eq!(peer.responses.redirection, 1);
        assert_eq!(peer.responses.total, 10);
    }

    #[test]
    fn test_default_snapshot_round_trip() {
        let default = StatusSnapshot::default();
        let decoded = decode(&encode(&default), SchemaVersion::Peers).unwrap();
        assert_eq!(decoded, default);
    }

    #[test]
    fn test_empty_object_decodes_to_zero() {
        let snapshot = decode(b"{}", SchemaVersion::Auto).unwrap();
        assert_eq!(snapshot, StatusSnapshot::default());
    }

    #[test]
    fn test_unknown_fields_ignored_and_missing_fields_zero() {
        let doc = json!({
            "caches": {},
            "server_zones": { "example.com": { "processing": 1 } },
            "connections": { "accepted": 7, "brand_new_counter": 3 },
            "upstreams": { "cache_servers": { "peers": [ { "requests": 4, "zone": "x" } ] } }
        });
        let snapshot = decode(&serde_json::to_vec(&doc).unwrap(), SchemaVersion::Auto).unwrap();

        assert_eq!(snapshot.connections.accepted, 7);
        assert_eq!(snapshot.connections.active, 0);
        assert_eq!(snapshot.requests, Requests::default());
        assert_eq!(snapshot.peers[0].requests, 4);
        assert_eq!(snapshot.peers[0].health_checks, HealthCheck::default());
    }

    #[test]
    fn test_float_and_null_numbers() {
        let doc = br#"{"connections":{"accepted":12.9,"active":null,"dropped":-3.5},"requests":{"total":1e3}}"#;
        let snapshot = decode(doc, SchemaVersion::Auto).unwrap();

        assert_eq!(snapshot.connections.accepted, 12);
        assert_eq!(snapshot.connections.active, 0);
        assert_eq!(snapshot.connections.dropped, 0);
        assert_eq!(snapshot.requests.total, 1000);
    }

    #[test]
    fn test_null_fields_decode_as_absent() {
        let doc = br#"{"address":null,"connections":null,"requests":null,"upstreams":{"cache_servers":{"peers":[{"server":null,"state":null,"backup":null,"requests":4,"responses":null,"health_checks":{"fails":1,"last_passed":null}}]}}}"#;
        let snapshot = decode(doc, SchemaVersion::Auto).unwrap();

        assert_eq!(snapshot.address, "");
        assert_eq!(snapshot.connections, Connections::default());
        assert_eq!(snapshot.requests, Requests::default());

        let peer = &snapshot.peers[0];
        assert_eq!(peer.server, "");
        assert_eq!(peer.state, "");
        assert!(!peer.backup);
        assert_eq!(peer.requests, 4);
        assert_eq!(peer.responses, ResponseCounters::default());
        assert_eq!(peer.health_checks.fails, 1);
        assert!(!peer.health_checks.last_passed);

        let snapshot = decode(br#"{"upstreams":null}"#, SchemaVersion::Peers).unwrap();
        assert!(snapshot.peers.is_empty());
    }

    #[test]
    fn test_legacy_layout() {
        let doc = json!({
            "upstreams": { "cache_servers": [
                { "server": "10.0.0.1:80", "requests": 1 },
                { "server": "10.0.0.2:80", "requests": 2, "received": 64 }
            ] }
        });
        let bytes = serde_json::to_vec(&doc).unwrap();

        for version in [SchemaVersion::Auto, SchemaVersion::Legacy] {
            let snapshot = decode(&bytes, version).unwrap();
            assert_eq!(snapshot.peers.len(), 2);
            assert_eq!(snapshot.peers[0].server, "10.0.0.1:80");
            assert_eq!(snapshot.peers[1].requests, 2);
            assert_eq!(snapshot.peers[1].received, 64);
        }
    }

    #[test]
    fn test_explicit_version_mismatch() {
        let err = decode(SCENARIO.as_bytes(), SchemaVersion::Legacy).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SchemaMismatch { expected: "legacy", found: "object" }
        ));

        let legacy = br#"{"upstreams":{"cache_servers":[]}}"#;
        let err = decode(legacy, SchemaVersion::Peers).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SchemaMismatch { expected: "peers", found: "array" }
        ));
    }

    #[test]
    fn test_missing_upstreams_means_no_peers() {
        for version in [SchemaVersion::Auto, SchemaVersion::Peers, SchemaVersion::Legacy] {
            let snapshot = decode(br#"{"requests":{"total":1}}"#, version).unwrap();
            assert!(snapshot.peers.is_empty());
        }
        let snapshot = decode(br#"{"upstreams":{"cache_servers":{}}}"#, SchemaVersion::Peers).unwrap();
        assert!(snapshot.peers.is_empty());
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        assert!(matches!(decode(b"<html>502</html>", SchemaVersion::Auto), Err(DecodeError::Json(_))));
        assert!(matches!(decode(b"", SchemaVersion::Auto), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode(b"[1,2,3]", SchemaVersion::Auto),
            Err(DecodeError::NotAnObject { found: "array" })
        ));
        assert!(matches!(
            decode(br#"{"connections":"lots"}"#, SchemaVersion::Auto),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode(br#"{"upstreams":{"cache_servers":"none"}}"#, SchemaVersion::Auto),
            Err(DecodeError::SchemaMismatch { expected: "auto", found: "string" })
        ));
    }

    #[test]
    fn test_schema_version_from_str() {
        assert_eq!("peers".parse::<SchemaVersion>().unwrap(), SchemaVersion::Peers);
        assert_eq!("LEGACY".parse::<SchemaVersion>().unwrap(), SchemaVersion::Legacy);
        assert_eq!("auto".parse::<SchemaVersion>().unwrap(), SchemaVersion::Auto);
        assert!("v2".parse::<SchemaVersion>().is_err());
    }
}
