//! Flattening of a status snapshot into dotted statsd metrics
//!
//! Every numeric field of the schema yields exactly one [`Emission`] per
//! cycle, zero values included. Whether a field is a counter or a gauge is
//! fixed by its path and never depends on the value.

use crate::sink::MetricSink;
use crate::status::{PeerStats, StatusSnapshot};
use std::fmt;
use tracing::warn;

/// Path prefix of each upstream peer block
pub const PEER_PREFIX: &str = "upstreams.cache_servers";

/// Number of metrics emitted per peer
pub const PEER_METRICS: usize = 14;

/// Number of top-level metrics emitted every cycle
pub const TOP_LEVEL_METRICS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Lifetime total of the server, sent as an increment
    Counter,
    /// Instantaneous value, sent as an absolute set
    Gauge,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Gauge => f.write_str("gauge"),
        }
    }
}

/// A single metric ready to be handed to a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub path: String,
    pub kind: MetricKind,
    pub value: u64,
}

impl Emission {
    fn counter(path: impl Into<String>, value: u64) -> Self {
        Self { path: path.into(), kind: MetricKind::Counter, value }
    }

    fn gauge(path: impl Into<String>, value: u64) -> Self {
        Self { path: path.into(), kind: MetricKind::Gauge, value }
    }
}

/// Delivery tally for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub sent: usize,
    pub failed: usize,
}

impl EmitReport {
    pub fn attempted(&self) -> usize {
        self.sent + self.failed
    }
}

/// Build the ordered list of metrics for a snapshot: the top-level
/// connection and request metrics first, then one block per peer.
pub fn emissions(snapshot: &StatusSnapshot) -> Vec<Emission> {
    let mut out = Vec::with_capacity(TOP_LEVEL_METRICS + PEER_METRICS * snapshot.peers.len());

    let connections = &snapshot.connections;
    out.push(Emission::counter("connections.accepted", connections.accepted));
    out.push(Emission::gauge("connections.active", connections.active));
    out.push(Emission::counter("connections.dropped", connections.dropped));
    out.push(Emission::gauge("connections.idle", connections.idle));

    out.push(Emission::counter("requests.total", snapshot.requests.total));
    out.push(Emission::gauge("requests.current", snapshot.requests.current));

    for (index, peer) in snapshot.peers.iter().enumerate() {
        push_peer(&mut out, index, peer);
    }

    out
}

fn push_peer(out: &mut Vec<Emission>, index: usize, peer: &PeerStats) {
    let base = format!("{PEER_PREFIX}.{index}.");
    let path = |suffix: &str| format!("{base}{suffix}");

    out.push(Emission::gauge(path("active"), peer.active));
    out.push(Emission::counter(path("requests"), peer.requests));
    out.push(Emission::counter(path("fails"), peer.fails));
    out.push(Emission::counter(path("unavail"), peer.unavail));
    out.push(Emission::gauge(path("sent"), peer.sent));
    out.push(Emission::gauge(path("received"), peer.received));

    let responses = &peer.responses;
    out.push(Emission::counter(path("responses.1xx"), responses.informational));
    out.push(Emission::counter(path("responses.2xx"), responses.success));
    out.push(Emission::counter(path("responses.3xx"), responses.redirection));
    out.push(Emission::counter(path("responses.4xx"), responses.client_error));
    out.push(Emission::counter(path("responses.5xx"), responses.server_error));
    out.push(Emission::counter(path("responses.total"), responses.total));

    out.push(Emission::counter(path("health_checks.fails"), peer.health_checks.fails));
    out.push(Emission::counter(path("health_checks.unhealthy"), peer.health_checks.unhealthy));
}

/// Send every metric of the snapshot. A failed send is logged and counted
/// but never stops the remaining metrics.
pub fn emit<S: MetricSink + ?Sized>(snapshot: &StatusSnapshot, sink: &S) -> EmitReport {
    let mut report = EmitReport::default();

    for emission in emissions(snapshot) {
        match sink.send(&emission) {
            Ok(()) => report.sent += 1,
            Err(e) => {
                warn!(metric = %emission.path, kind = %emission.kind, error = %e, "Metric send failed");
                report.failed += 1;
            }
        }
    }

    report
}
