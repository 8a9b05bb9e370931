/*!
Serveur statsd factice pour tests sans daemon

Écoute en UDP sur 127.0.0.1 (port éphémère), enregistre chaque ligne reçue
et permet d'inspecter les métriques envoyées par l'agent.
*/

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Ligne statsd décodée: `name:value|type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsdLine {
    pub name: String,
    pub value: String,
    pub metric_type: String,
}

impl StatsdLine {
    /// Parse une ligne `name:value|type[|@rate]`
    pub fn parse(line: &str) -> Option<Self> {
        let (name, rest) = line.rsplit_once(':')?;
        let mut parts = rest.split('|');
        let value = parts.next()?;
        let metric_type = parts.next()?;

        if name.is_empty() || value.is_empty() || metric_type.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            value: value.to_string(),
            metric_type: metric_type.to_string(),
        })
    }
}

/// Daemon statsd simulé, arrêté quand il est droppé
pub struct MockStatsdServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockStatsdServer {
    pub async fn start() -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65_535];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        let datagram = String::from_utf8_lossy(&buf[..len]).to_string();
                        // Un datagramme peut contenir plusieurs lignes
                        let mut lines = sink.lock().unwrap();
                        for line in datagram.lines().filter(|l| !l.is_empty()) {
                            log::debug!("📥 [MOCK statsd] {} from {}", line, from);
                            lines.push(line.to_string());
                        }
                    }
                    Err(e) => {
                        log::warn!("⚠️ [MOCK statsd] recv error: {}", e);
                    }
                }
            }
        });

        log::info!("📡 [MOCK statsd] listening on {}", addr);
        Ok(Self { addr, received, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Toutes les lignes reçues, dans l'ordre d'arrivée
    pub fn lines(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Lignes reçues et décodées (les lignes invalides sont ignorées)
    pub fn metrics(&self) -> Vec<StatsdLine> {
        self.lines().iter().filter_map(|l| StatsdLine::parse(l)).collect()
    }

    /// Dernière valeur reçue pour une métrique
    pub fn find(&self, name: &str) -> Option<StatsdLine> {
        self.metrics().into_iter().rev().find(|m| m.name == name)
    }

    /// Attend d'avoir reçu au moins `count` lignes (ou le timeout)
    pub async fn wait_for_lines(&self, count: usize, timeout_ms: u64) -> Vec<String> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let lines = self.lines();
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        log::warn!("⏰ [MOCK statsd] timeout waiting for {} lines", count);
        self.lines()
    }

    pub fn clear(&self) {
        self.received.lock().unwrap().clear();
    }
}

impl Drop for MockStatsdServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
