/*!
Test Harness pour l'agent NGINX Plus

Facilite l'écriture de tests de bout en bout avec:
- un serveur `/status` simulé (source)
- un daemon statsd simulé (destination)
- des assertions sur les métriques reçues
*/

use crate::statsd_stub::MockStatsdServer;
use crate::status_stub::StatusServerStub;
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;

/// Source + destination simulées pour un cycle complet
pub struct TestHarness {
    pub status: StatusServerStub,
    pub statsd: MockStatsdServer,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    name: String,
    value: String,
    metric_type: String,
}

impl TestHarness {
    /// Démarre les deux stubs; `body` est le document servi sur `/status`
    pub async fn start(body: impl Into<String>) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        Ok(Self {
            status: StatusServerStub::start(body).await?,
            statsd: MockStatsdServer::start().await?,
            expectations: Vec::new(),
        })
    }

    /// Ajoute une expectation: la métrique doit arriver avec cette valeur et ce type
    pub fn expect_metric(&mut self, name: &str, value: &str, metric_type: &str) -> &mut Self {
        self.expectations.push(Expectation {
            name: name.to_string(),
            value: value.to_string(),
            metric_type: metric_type.to_string(),
        });
        self
    }

    /// Attend que toutes les expectations soient satisfaites
    pub async fn verify_expectations(&self, timeout_ms: u64) -> Result<()> {
        log::info!("🔍 Verifying {} expectations...", self.expectations.len());
        let start = std::time::Instant::now();

        loop {
            let pending: Vec<&Expectation> = self
                .expectations
                .iter()
                .filter(|e| self.check(&e.name, &e.value, &e.metric_type).is_err())
                .collect();

            if pending.is_empty() {
                log::info!("🎉 All expectations verified successfully");
                return Ok(());
            }

            if start.elapsed() >= Duration::from_millis(timeout_ms) {
                anyhow::bail!(
                    "{} expectation(s) not met, first: {:?}; received: {:?}",
                    pending.len(),
                    pending[0],
                    self.statsd.lines()
                );
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Assert que la dernière valeur reçue pour `name` correspond
    pub fn assert_metric(&self, name: &str, value: &str, metric_type: &str) -> Result<()> {
        self.check(name, value, metric_type)?;
        log::info!("✅ Metric '{}' = {}|{}", name, value, metric_type);
        Ok(())
    }

    /// Assert qu'aucune métrique n'a été reçue
    pub fn assert_no_metrics(&self) -> Result<()> {
        let lines = self.statsd.lines();
        if !lines.is_empty() {
            anyhow::bail!("Expected no metrics, got {}: {:?}", lines.len(), lines);
        }
        Ok(())
    }

    fn check(&self, name: &str, value: &str, metric_type: &str) -> Result<()> {
        match self.statsd.find(name) {
            Some(m) if m.value == value && m.metric_type == metric_type => Ok(()),
            Some(m) => anyhow::bail!(
                "Metric '{}' mismatch: expected {}|{}, got {}|{}",
                name, value, metric_type, m.value, m.metric_type
            ),
            None => anyhow::bail!("Metric '{}' not received", name),
        }
    }

    /// Stats sur les métriques collectées
    pub fn get_stats(&self) -> TestStats {
        let metrics = self.statsd.metrics();
        let mut type_counts = HashMap::new();

        for m in &metrics {
            *type_counts.entry(m.metric_type.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_metrics: metrics.len(),
            type_counts,
            status_hits: self.status.hits(),
        }
    }

    /// Reset le harness pour un nouveau test
    pub fn reset(&mut self) {
        self.statsd.clear();
        self.expectations.clear();
        log::info!("🧹 Test harness reset");
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_metrics: usize,
    pub type_counts: HashMap<String, usize>,
    pub status_hits: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::start("{}").await.unwrap();
        harness
            .expect_metric("nginx.requests.total", "7", "c")
            .expect_metric("nginx.connections.idle", "1", "g");

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"nginx.requests.total:7|c", harness.statsd.addr()).await.unwrap();
        client.send_to(b"nginx.connections.idle:1|g", harness.statsd.addr()).await.unwrap();

        harness.verify_expectations(2000).await.unwrap();
        harness.assert_metric("nginx.connections.idle", "1", "g").unwrap();
        assert!(harness.assert_metric("nginx.connections.idle", "1", "c").is_err());

        let stats = harness.get_stats();
        assert_eq!(stats.total_metrics, 2);
        assert_eq!(stats.type_counts["c"], 1);
        assert_eq!(stats.status_hits, 0);

        harness.reset();
        harness.assert_no_metrics().unwrap();
    }

    #[tokio::test]
    async fn test_verify_times_out_on_missing_metric() {
        let mut harness = TestHarness::start("{}").await.unwrap();
        harness.expect_metric("never.sent", "1", "c");
        assert!(harness.verify_expectations(100).await.is_err());
    }
}
