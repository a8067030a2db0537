//! Lease registry and the best-effort release sweep
//!
//! Every session that reaches Bound records a [`ReleaseTicket`] here. A
//! session that lives out its hold time claims its own ticket back and
//! releases in-line; whatever is left when the run winds down is released
//! by one final sweep, so interrupting the simulator does not strand
//! leases on the server.

use dashmap::DashMap;
use dhcpswarm_core::MacAddr;
use dhcpswarm_protocols::dhcpv6::Dhcpv6Packet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::session::LeaseRecord;
use crate::transport::FrameSink;

/// Everything needed to build a RELEASE for one bound lease
#[derive(Debug, Clone)]
pub struct ReleaseTicket {
    pub session_id: Uuid,
    /// Client MAC the lease was acquired under
    pub mac: MacAddr,
    /// Client DUID, present for v6 leases
    pub duid: Option<Vec<u8>>,
    pub lease: LeaseRecord,
}

/// Outcome of one release sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Tickets the sweep picked up
    pub attempted: usize,
    /// Sends that errored; the lease expires server-side instead
    pub failed: usize,
    /// Sessions whose RELEASE went out
    pub released: Vec<Uuid>,
}

/// Tickets for every lease currently held by the swarm
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    entries: DashMap<Uuid, ReleaseTicket>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ticket: ReleaseTicket) {
        self.entries.insert(ticket.session_id, ticket);
    }

    /// Take a ticket back for an in-session release
    pub fn claim(&self, session_id: Uuid) -> Option<ReleaseTicket> {
        self.entries.remove(&session_id).map(|(_, ticket)| ticket)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every remaining lease, best effort
    ///
    /// Send failures are logged and skipped; a RELEASE is fire-and-forget
    /// and the server will expire the lease on its own eventually.
    pub fn sweep(&self, sink: &dyn FrameSink) -> SweepReport {
        let mut report = SweepReport::default();
        let ids: Vec<Uuid> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            let Some((_, ticket)) = self.entries.remove(&id) else {
                continue;
            };
            report.attempted += 1;
            let frame = release_frame(&ticket);
            match sink.send_frame(&frame) {
                Ok(()) => {
                    debug!(session = %ticket.session_id, mac = %ticket.mac, "lease released");
                    report.released.push(ticket.session_id);
                }
                Err(e) => {
                    warn!(session = %ticket.session_id, error = %e, "release send failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Build the RELEASE frame for a ticket, v4 or v6
pub(crate) fn release_frame(ticket: &ReleaseTicket) -> Vec<u8> {
    match &ticket.lease {
        LeaseRecord::V4 {
            address,
            server_id,
            server_mac,
            ..
        } => crate::dhcpv4::release_frame(ticket.mac, *address, *server_id, *server_mac),
        LeaseRecord::V6 {
            address,
            prefix,
            server_duid,
            iaid,
            ..
        } => {
            let duid = ticket
                .duid
                .clone()
                .unwrap_or_else(|| Dhcpv6Packet::generate_duid_llt(ticket.mac));
            crate::dhcpv6::release_frame(ticket.mac, &duid, server_duid, *iaid, *address, *prefix)
        }
    }
}
