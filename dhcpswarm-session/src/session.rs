//! Shared session vocabulary
//!
//! The v4 and v6 client state machines differ in wire format but share the
//! same life cycle: register a transaction, run retransmitting exchanges
//! until bound, hold the lease, release it. Everything common to that life
//! cycle lives here.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dhcpswarm_core::{Error, MacAddr, ProtocolVariant, SimConfig};
use ipnetwork::Ipv6Network;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::release::LeaseRegistry;
use crate::stats::SwarmStats;
use crate::transport::{DeliveredFrame, DeliveryQueue, DeliveryTable, FrameSink};

/// Where a session currently is in its life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    /// DHCPv4: DISCOVER sent, waiting for an OFFER
    Selecting,
    /// DHCPv6: SOLICIT sent, waiting for an ADVERTISE
    Soliciting,
    /// REQUEST sent, waiting for the server to commit
    Requesting,
    Bound,
    Releasing,
    Released,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Init => "init",
            SessionPhase::Selecting => "selecting",
            SessionPhase::Soliciting => "soliciting",
            SessionPhase::Requesting => "requesting",
            SessionPhase::Bound => "bound",
            SessionPhase::Releasing => "releasing",
            SessionPhase::Released => "released",
            SessionPhase::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of this phase
    ///
    /// Requesting may fall back to Selecting/Soliciting: a rejected exchange
    /// restarts from the top with a fresh transaction id.
    pub fn can_transition(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Init, Selecting)
                | (Init, Soliciting)
                | (Init, Failed)
                | (Selecting, Requesting)
                | (Selecting, Failed)
                | (Soliciting, Requesting)
                | (Soliciting, Failed)
                | (Requesting, Bound)
                | (Requesting, Selecting)
                | (Requesting, Soliciting)
                | (Requesting, Failed)
                | (Bound, Releasing)
                | (Releasing, Released)
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append `next` to a phase trace, checking legality in debug builds
pub(crate) fn record_phase(trace: &mut Vec<SessionPhase>, next: SessionPhase) {
    if let Some(last) = trace.last() {
        debug_assert!(
            last.can_transition(next),
            "illegal phase transition {last} -> {next}"
        );
    }
    trace.push(next);
}

/// Why a session ended without holding-then-releasing its lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Every retransmission window of some phase expired unanswered
    Timeout,
    /// The server kept refusing (NAK or non-zero status) past the restart budget
    Rejected,
    /// The raw channel failed underneath the session
    Transport,
    /// Shutdown arrived before the session was bound
    Interrupted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Rejected => "rejected",
            FailureReason::Transport => "transport",
            FailureReason::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Terminal state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Bound when shutdown hit; the lease is left to the shutdown sweep
    Bound,
    /// Bound, held, and released
    Released,
    Failed(FailureReason),
}

impl SessionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionOutcome::Failed(_))
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Bound => f.write_str("bound"),
            SessionOutcome::Released => f.write_str("released"),
            SessionOutcome::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// What the server granted a bound session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseRecord {
    V4 {
        address: Ipv4Addr,
        server_id: Ipv4Addr,
        /// Ethernet source of the ACK; RELEASE unicasts straight back to it
        server_mac: MacAddr,
        lease_secs: u32,
    },
    V6 {
        address: Option<Ipv6Addr>,
        prefix: Option<Ipv6Network>,
        server_duid: Vec<u8>,
        iaid: u32,
        valid_secs: u32,
    },
}

/// Everything the orchestrator keeps about a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: Uuid,
    pub index: usize,
    pub variant: ProtocolVariant,
    pub mac: MacAddr,
    pub outcome: SessionOutcome,
    pub lease: Option<LeaseRecord>,
    /// Session start to entering Bound
    pub bind_latency: Option<Duration>,
    /// Rejected exchanges that were started over
    pub restarts: u32,
    /// Phases visited, in order
    pub phases: Vec<SessionPhase>,
}

/// Owning side of the shutdown broadcast
///
/// Cloned freely; any clone can trigger. Sessions observe it through
/// [`ShutdownSignal`] at every await point that can block.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the shutdown broadcast
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested, immediately if it already was
    pub async fn triggered(&mut self) {
        // A dropped sender counts as shutdown
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Shared handles a session needs to run
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<SimConfig>,
    pub sink: Arc<dyn FrameSink>,
    pub table: Arc<DeliveryTable>,
    pub registry: Arc<LeaseRegistry>,
    pub stats: Arc<SwarmStats>,
    pub shutdown: ShutdownSignal,
}

/// One simulated client, drivable to a terminal outcome
#[async_trait]
pub trait ClientSession: Send + Sync {
    fn id(&self) -> Uuid;

    fn variant(&self) -> ProtocolVariant;

    /// Drive the session until it is released, failed, or interrupted
    async fn run(&self, ctx: SessionContext) -> SessionReport;
}

/// How a phase's matcher judged a delivered reply
pub(crate) enum Reply<T> {
    /// The awaited reply; carries what the next phase needs
    Accept(T),
    /// A negative answer from the server
    Reject,
}

/// Why an exchange ended without an accepted reply
#[derive(Debug)]
pub(crate) enum ExchangeError {
    Timeout,
    Rejected,
    Interrupted,
    Transport(Error),
}

impl ExchangeError {
    pub(crate) fn failure_reason(&self) -> FailureReason {
        match self {
            ExchangeError::Timeout => FailureReason::Timeout,
            ExchangeError::Rejected => FailureReason::Rejected,
            ExchangeError::Interrupted => FailureReason::Interrupted,
            ExchangeError::Transport(_) => FailureReason::Transport,
        }
    }
}

/// Run one retransmitting request/reply exchange
///
/// Each attempt rebuilds the outgoing frame (so time-since-start fields stay
/// current), sends it, then waits out a backoff window for a reply the
/// matcher accepts. Replies the matcher ignores leave the window running; a
/// rejected reply or shutdown ends the exchange at once.
pub(crate) async fn exchange<T, B, M>(
    ctx: &SessionContext,
    queue: &mut DeliveryQueue,
    shutdown: &mut ShutdownSignal,
    started: Instant,
    build: B,
    mut matcher: M,
) -> Result<T, ExchangeError>
where
    B: Fn(Duration) -> Vec<u8>,
    M: FnMut(&DeliveredFrame) -> Option<Reply<T>>,
{
    let policy = ctx.config.retry;
    for attempt in 0..policy.max_attempts {
        if shutdown.is_triggered() {
            return Err(ExchangeError::Interrupted);
        }

        let frame = build(started.elapsed());
        if let Err(e) = ctx.sink.send_frame(&frame) {
            return Err(ExchangeError::Transport(e));
        }
        ctx.stats.frame_sent();

        let window = policy.backoff(attempt);
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => return Err(ExchangeError::Interrupted),
                _ = &mut deadline => break,
                delivered = queue.recv() => match delivered {
                    Some(frame) => {
                        ctx.stats.frame_received();
                        match matcher(&frame) {
                            Some(Reply::Accept(value)) => return Ok(value),
                            Some(Reply::Reject) => return Err(ExchangeError::Rejected),
                            None => continue,
                        }
                    }
                    None => {
                        return Err(ExchangeError::Transport(Error::transport(
                            "delivery queue closed mid-exchange",
                        )))
                    }
                },
            }
        }
        debug!(attempt, window_ms = window.as_millis() as u64, "reply window expired");
    }
    Err(ExchangeError::Timeout)
}
