//! statsd sink over UDP
//!
//! One datagram per metric, fire-and-forget. The host is resolved once and
//! the socket bound to the resolved address family; after a send error the
//! next send resolves again, so a moved statsd daemon is picked up without
//! restarting the agent. Lookups never run more than once per second.

use crate::emitter::{Emission, MetricKind};
use crate::error::SinkSendError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Destination for emitted metrics
pub trait MetricSink {
    fn send(&self, emission: &Emission) -> Result<(), SinkSendError>;
}

/// statsd type suffix used for counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterType {
    /// `|c`, plain increment understood by every statsd
    #[default]
    Count,
    /// `|t`, the "total" extension
    Total,
}

impl CounterType {
    fn suffix(&self) -> &'static str {
        match self {
            CounterType::Count => "c",
            CounterType::Total => "t",
        }
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterType::Count => f.write_str("count"),
            CounterType::Total => f.write_str("total"),
        }
    }
}

impl FromStr for CounterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" | "c" => Ok(CounterType::Count),
            "total" | "t" => Ok(CounterType::Total),
            other => Err(format!("unknown counter type '{other}' (expected count or total)")),
        }
    }
}

/// Format one metric as a statsd line, e.g. `nginx.stats.requests.total:100|c`
pub fn format_line(prefix: &str, emission: &Emission, counter_type: CounterType) -> String {
    let suffix = match emission.kind {
        MetricKind::Counter => counter_type.suffix(),
        MetricKind::Gauge => "g",
    };
    let prefix = prefix.trim_end_matches('.');
    if prefix.is_empty() {
        format!("{}:{}|{}", emission.path, emission.value, suffix)
    } else {
        format!("{}.{}:{}|{}", prefix, emission.path, emission.value, suffix)
    }
}

/// Minimum delay between two lookups of the statsd host
const RESOLVE_BACKOFF: Duration = Duration::from_secs(1);

pub struct StatsdSink {
    host: String,
    port: u16,
    prefix: String,
    counter_type: CounterType,
    route: Mutex<Route>,
}

// Socket bound to the family of the resolved target. `None` until the host
// resolves, and again after a send error so the next send looks it up anew.
struct Route {
    link: Option<(UdpSocket, SocketAddr)>,
    next_lookup: Instant,
}

impl StatsdSink {
    /// Resolve `host` and bind a local UDP socket of the same address family.
    ///
    /// A host that does not resolve yet is not fatal: sends report
    /// [`SinkSendError`] and lookups are retried at most once per second.
    pub fn bind(host: &str, port: u16, prefix: &str, counter_type: CounterType) -> io::Result<Self> {
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let sink = Self {
            host,
            port,
            prefix: prefix.to_string(),
            counter_type,
            route: Mutex::new(Route { link: None, next_lookup: Instant::now() }),
        };

        let opened = sink.open();
        {
            let mut route = sink.lock_route();
            route.next_lookup = Instant::now() + RESOLVE_BACKOFF;
            match opened {
                Ok(link) => route.link = Some(link),
                Err(SinkSendError::Bind { source, .. }) => return Err(source),
                Err(e) => warn!(error = %e, "statsd host not reachable yet, will retry on send"),
            }
        }

        Ok(sink)
    }

    fn lock_route(&self) -> MutexGuard<'_, Route> {
        self.route.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<(UdpSocket, SocketAddr), SinkSendError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| SinkSendError::Resolve { host: self.host.clone(), source })?
            .collect();

        let target = pick_target(&addrs).ok_or_else(|| SinkSendError::NoAddress { host: self.host.clone() })?;
        let socket = UdpSocket::bind(unspecified_for(&target))
            .map_err(|source| SinkSendError::Bind { host: self.host.clone(), source })?;

        debug!(host = %self.host, %target, "Resolved statsd target");
        Ok((socket, target))
    }

    /// Local and remote address currently in use, if any
    #[cfg(test)]
    fn endpoints(&self) -> Option<(SocketAddr, SocketAddr)> {
        let route = self.lock_route();
        let (socket, target) = route.link.as_ref()?;
        Some((socket.local_addr().ok()?, *target))
    }
}

impl MetricSink for StatsdSink {
    fn send(&self, emission: &Emission) -> Result<(), SinkSendError> {
        let mut route = self.lock_route();

        if route.link.is_none() {
            let now = Instant::now();
            if now < route.next_lookup {
                return Err(SinkSendError::Unresolved { host: self.host.clone() });
            }
            let opened = self.open();
            route.next_lookup = Instant::now() + RESOLVE_BACKOFF;
            route.link = Some(opened?);
        }

        let line = format_line(&self.prefix, emission, self.counter_type);
        let Some((socket, target)) = route.link.as_ref() else {
            return Err(SinkSendError::Unresolved { host: self.host.clone() });
        };
        let target = *target;

        if let Err(source) = socket.send_to(line.as_bytes(), target) {
            route.link = None;
            return Err(SinkSendError::Io { metric: emission.path.clone(), source });
        }

        trace!(%target, %line, "Sent metric");
        Ok(())
    }
}

// IPv4 first: a name like `localhost` often lists `::1` before `127.0.0.1`
// and statsd daemons commonly listen on IPv4 only.
fn pick_target(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs.iter().find(|addr| addr.is_ipv4()).or_else(|| addrs.first()).copied()
}

fn unspecified_for(target: &SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nginxplus_devkit::MockStatsdServer;

    fn counter(path: &str, value: u64) -> Emission {
        Emission { path: path.to_string(), kind: MetricKind::Counter, value }
    }

    fn gauge(path: &str, value: u64) -> Emission {
        Emission { path: path.to_string(), kind: MetricKind::Gauge, value }
    }

    #[test]
    fn test_format_line() {
        let total = counter("requests.total", 100);
        let active = gauge("connections.active", 2);

        assert_eq!(format_line("nginx.stats", &total, CounterType::Count), "nginx.stats.requests.total:100|c");
        assert_eq!(format_line("nginx.stats", &total, CounterType::Total), "nginx.stats.requests.total:100|t");
        assert_eq!(format_line("nginx.stats.", &active, CounterType::Total), "nginx.stats.connections.active:2|g");
        assert_eq!(format_line("", &active, CounterType::Count), "connections.active:2|g");
    }

    #[test]
    fn test_counter_type_from_str() {
        assert_eq!("count".parse::<CounterType>().unwrap(), CounterType::Count);
        assert_eq!("Total".parse::<CounterType>().unwrap(), CounterType::Total);
        assert!("histogram".parse::<CounterType>().is_err());
    }

    #[test]
    fn test_target_prefers_ipv4_and_matches_family() {
        let v4: SocketAddr = "127.0.0.1:8125".parse().unwrap();
        let v6: SocketAddr = "[::1]:8125".parse().unwrap();

        assert_eq!(pick_target(&[v6, v4]), Some(v4));
        assert_eq!(pick_target(&[v6]), Some(v6));
        assert_eq!(pick_target(&[]), None);

        assert!(unspecified_for(&v4).is_ipv4());
        assert!(unspecified_for(&v6).is_ipv6());
        assert_eq!(unspecified_for(&v6).port(), 0);
    }

    #[tokio::test]
    async fn test_sends_datagrams_to_statsd() {
        let server = MockStatsdServer::start().await.unwrap();
        let sink = StatsdSink::bind("127.0.0.1", server.port(), "nginx.stats", CounterType::Count).unwrap();

        sink.send(&counter("requests.total", 100)).unwrap();
        sink.send(&gauge("connections.active", 2)).unwrap();

        let lines = server.wait_for_lines(2, 2000).await;
        assert_eq!(
            lines,
            vec![
                "nginx.stats.requests.total:100|c".to_string(),
                "nginx.stats.connections.active:2|g".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_hostname_binds_socket_of_resolved_family() {
        let server = MockStatsdServer::start().await.unwrap();
        let sink = StatsdSink::bind("localhost", server.port(), "nginx", CounterType::Count).unwrap();

        let (local, target) = sink.endpoints().unwrap();
        assert_eq!(local.is_ipv4(), target.is_ipv4());
        assert_eq!(target.port(), server.port());

        sink.send(&counter("requests.total", 3)).unwrap();
        assert_eq!(server.wait_for_lines(1, 2000).await, vec!["nginx.requests.total:3|c".to_string()]);
    }

    #[test]
    fn test_unresolvable_host_is_a_send_error() {
        let sink = StatsdSink::bind("statsd.invalid", 8125, "nginx", CounterType::Count).unwrap();
        assert!(sink.endpoints().is_none());

        // bind already spent the lookup; the next one waits for the backoff
        let err = sink.send(&counter("requests.total", 1)).unwrap_err();
        assert!(matches!(err, SinkSendError::Unresolved { .. }));

        std::thread::sleep(RESOLVE_BACKOFF);
        let err = sink.send(&counter("requests.total", 1)).unwrap_err();
        assert!(matches!(err, SinkSendError::Resolve { .. } | SinkSendError::NoAddress { .. }));
        let err = sink.send(&counter("requests.total", 1)).unwrap_err();
        assert!(matches!(err, SinkSendError::Unresolved { .. }));
    }
}
