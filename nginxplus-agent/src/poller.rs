//! Poll loop: fetch → decode → emit → sleep, one cycle at a time
//!
//! Cycles never overlap and share no state. Fetch and decode failures come
//! back as [`CycleError`]; the configured [`FailurePolicy`] decides whether
//! they end the loop or just skip to the next scheduled poll. Metric send
//! failures never do either.

use crate::config::{FailurePolicy, PollConfig};
use crate::emitter::{self, EmitReport};
use crate::error::CycleError;
use crate::fetch::StatusSource;
use crate::sink::MetricSink;
use crate::status::{self, SchemaVersion};
use std::fmt;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Decoding,
    Emitting,
    Sleeping,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollState::Idle => "idle",
            PollState::Fetching => "fetching",
            PollState::Decoding => "decoding",
            PollState::Emitting => "emitting",
            PollState::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// Result of a cycle that reached the emit stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub peers: usize,
    pub emit: EmitReport,
}

pub struct Poller<S, K> {
    source: S,
    sink: K,
    schema_version: SchemaVersion,
    poll: PollConfig,
}

impl<S, K> Poller<S, K>
where
    S: StatusSource,
    K: MetricSink,
{
    pub fn new(source: S, sink: K, schema_version: SchemaVersion, poll: PollConfig) -> Self {
        Self { source, sink, schema_version, poll }
    }

    fn enter(&self, state: PollState) {
        debug!(%state, "Poller state");
    }

    /// Run a single fetch-decode-emit cycle
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.enter(PollState::Fetching);
        let payload = self.source.fetch().await?;

        self.enter(PollState::Decoding);
        let snapshot = status::decode(&payload, self.schema_version)?;

        self.enter(PollState::Emitting);
        let emit = emitter::emit(&snapshot, &self.sink);

        Ok(CycleReport { peers: snapshot.peers.len(), emit })
    }

    /// Poll until `shutdown` resolves, or until a cycle fails under
    /// [`FailurePolicy::Exit`]. Shutdown is only observed between cycles.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), CycleError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut cycle: u64 = 0;

        info!(
            interval_secs = self.poll.interval.as_secs_f64(),
            schema = %self.schema_version,
            on_error = %self.poll.on_error,
            "Starting poll loop"
        );

        loop {
            cycle += 1;
            self.enter(PollState::Idle);
            let started = Instant::now();

            match self.run_cycle().await {
                Ok(report) => {
                    info!(
                        cycle,
                        peers = report.peers,
                        attempted = report.emit.attempted(),
                        sent = report.emit.sent,
                        failed = report.emit.failed,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Cycle done"
                    );
                }
                Err(e) => match self.poll.on_error {
                    FailurePolicy::Exit => {
                        error!(cycle, error = %e, "Cycle failed, stopping");
                        return Err(e);
                    }
                    FailurePolicy::Continue => {
                        error!(cycle, error = %e, "Cycle failed, waiting for next poll");
                    }
                },
            }

            self.enter(PollState::Sleeping);
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(cycles = cycle, "Shutdown requested, leaving poll loop");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll.interval) => {}
            }
        }
    }
}
