//! Swarm orchestration
//!
//! The orchestrator owns everything the sessions share: the config, the
//! frame sink, the delivery table, the lease registry, and the counters.
//! Sessions are preloaded into a queue and drained by a fixed pool of
//! workers, so at most `max_concurrent` exchanges are in flight at once.
//! On shutdown the workers stop pulling, in-flight sessions wind down at
//! their next await point, and leases still held get a best-effort RELEASE
//! sweep bounded by the grace period.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use dhcpswarm_core::{ProtocolVariant, SimConfig};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dhcpv4::Dhcpv4Session;
use crate::dhcpv6::Dhcpv6Session;
use crate::identity::generate_batch;
use crate::release::{LeaseRegistry, SweepReport};
use crate::session::{
    ClientSession, SessionContext, SessionOutcome, SessionReport, Shutdown,
};
use crate::stats::{RunSummary, SwarmStats};
use crate::transport::{DeliveryTable, FrameSink};

/// Everything a finished run has to say for itself
pub struct RunReport {
    /// Per-session reports, ordered by session index
    pub reports: Vec<SessionReport>,
    pub summary: RunSummary,
}

pub struct SessionOrchestrator {
    config: Arc<SimConfig>,
    sink: Arc<dyn FrameSink>,
    table: Arc<DeliveryTable>,
    registry: Arc<LeaseRegistry>,
    stats: Arc<SwarmStats>,
    shutdown: Shutdown,
}

impl SessionOrchestrator {
    pub fn new(
        config: SimConfig,
        sink: Arc<dyn FrameSink>,
        table: Arc<DeliveryTable>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sink,
            table,
            registry: Arc::new(LeaseRegistry::new()),
            stats: Arc::new(SwarmStats::new()),
            shutdown,
        }
    }

    /// The shared context handed to every session and to the readiness probe
    pub fn context(&self) -> SessionContext {
        SessionContext {
            config: Arc::clone(&self.config),
            sink: Arc::clone(&self.sink),
            table: Arc::clone(&self.table),
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            shutdown: self.shutdown.signal(),
        }
    }

    /// Drive the whole swarm to completion and report on every session
    pub async fn run(&self) -> RunReport {
        let started_at = Instant::now();
        let identities = generate_batch(self.config.total_clients, self.config.mode);
        info!(
            total = identities.len(),
            concurrency = self.config.max_concurrent,
            mode = ?self.config.mode,
            "launching swarm"
        );

        // Preload the whole swarm, then close the queue so workers drain it
        let (tx, rx) = mpsc::channel(identities.len().max(1));
        for identity in identities {
            let session: Box<dyn ClientSession> = match identity.variant {
                ProtocolVariant::V4 => Box::new(Dhcpv4Session::new(identity)),
                ProtocolVariant::V6 => Box::new(Dhcpv6Session::new(identity)),
            };
            if tx.send(session).await.is_err() {
                break;
            }
        }
        drop(tx);

        let queue = Arc::new(Mutex::new(rx));
        let reports: Arc<DashMap<usize, SessionReport>> = Arc::new(DashMap::new());
        let workers: Vec<_> = (0..self.config.max_concurrent)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let reports = Arc::clone(&reports);
                let stats = Arc::clone(&self.stats);
                let signal = self.shutdown.signal();
                let ctx = self.context();
                tokio::spawn(async move {
                    loop {
                        if signal.is_triggered() {
                            break;
                        }
                        let next = { queue.lock().await.recv().await };
                        let Some(session) = next else { break };
                        stats.session_started();
                        debug!(worker, id = %session.id(), variant = %session.variant(), "session starting");
                        let report = session.run(ctx.clone()).await;
                        stats.session_finished(&report);
                        debug!(worker, id = %report.id, outcome = %report.outcome, "session finished");
                        reports.insert(report.index, report);
                    }
                    debug!(worker, "worker finished");
                })
            })
            .collect();

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker panicked");
            }
        }

        self.sweep_remaining(&reports).await;

        let mut reports: Vec<SessionReport> = reports
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        reports.sort_by_key(|report| report.index);

        let summary = self
            .stats
            .summary(self.config.total_clients, started_at.elapsed());
        info!(
            bound = summary.bound,
            released = summary.released,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "swarm finished"
        );
        RunReport { reports, summary }
    }

    /// Best-effort RELEASE for leases interrupted sessions left behind,
    /// bounded by the grace period
    async fn sweep_remaining(&self, reports: &DashMap<usize, SessionReport>) {
        if self.registry.is_empty() {
            return;
        }
        info!(
            leases = self.registry.len(),
            grace_secs = self.config.grace.as_secs(),
            "releasing leases still held"
        );
        let registry = Arc::clone(&self.registry);
        let sink = Arc::clone(&self.sink);
        let swept = match tokio::time::timeout(
            self.config.grace,
            tokio::task::spawn_blocking(move || registry.sweep(sink.as_ref())),
        )
        .await
        {
            Ok(Ok(swept)) => swept,
            Ok(Err(e)) => {
                error!(error = %e, "release sweep failed");
                SweepReport::default()
            }
            Err(_) => {
                warn!("grace period expired before every lease was released");
                SweepReport::default()
            }
        };

        // Sessions the sweep covered end up released after all
        let released: HashSet<Uuid> = swept.released.iter().copied().collect();
        for mut entry in reports.iter_mut() {
            if released.contains(&entry.id) && matches!(entry.outcome, SessionOutcome::Bound) {
                entry.outcome = SessionOutcome::Released;
            }
        }
        self.stats.add_swept_releases(swept.released.len() as u64);
        for _ in &swept.released {
            self.stats.frame_sent();
        }
    }
}
