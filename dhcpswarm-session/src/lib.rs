//! Client sessions and swarm orchestration for dhcpswarm
//!
//! This crate holds the moving parts of the simulator: the DHCPv4 and
//! DHCPv6 client state machines, the raw-socket transport with its
//! transaction-keyed delivery table, the lease registry backing the
//! shutdown sweep, the readiness probe, and the orchestrator that drives
//! a bounded pool of concurrent sessions and totals up the run.

pub mod dhcpv4;
pub mod dhcpv6;
pub mod identity;
pub mod orchestrator;
pub mod probe;
pub mod release;
pub mod session;
pub mod stats;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use dhcpv4::Dhcpv4Session;
pub use dhcpv6::Dhcpv6Session;
pub use identity::ClientIdentity;
pub use orchestrator::{RunReport, SessionOrchestrator};
pub use probe::wait_for_server;
pub use release::{LeaseRegistry, ReleaseTicket, SweepReport};
pub use session::{
    ClientSession, FailureReason, LeaseRecord, SessionContext, SessionOutcome, SessionPhase,
    SessionReport, Shutdown, ShutdownSignal,
};
pub use stats::{RunSummary, SwarmStats};
pub use transport::{
    DeliveredFrame, DeliveryQueue, DeliveryTable, FrameSink, RawTransport, TxKey,
};
