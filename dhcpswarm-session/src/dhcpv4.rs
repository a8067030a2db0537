//! The DHCPv4 client session
//!
//! One session walks the DORA exchange: broadcast DISCOVER, pick the first
//! usable OFFER, broadcast REQUEST for it, and treat the ACK as binding.
//! A NAK sends the whole exchange back to the top under a fresh xid, a
//! bounded number of times. The bound lease is held, then released with a
//! unicast RELEASE straight to the server that granted it.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dhcpswarm_core::{MacAddr, ProtocolVariant};
use dhcpswarm_packet::{EtherType, EthernetFrame, IpProtocol, Ipv4Packet, UdpDatagram};
use dhcpswarm_protocols::dhcpv4::packet::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use dhcpswarm_protocols::dhcpv4::{DhcpMessageType, DhcpPacket};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::identity::ClientIdentity;
use crate::release::ReleaseTicket;
use crate::session::{
    exchange, record_phase, ClientSession, ExchangeError, LeaseRecord, Reply, SessionContext,
    SessionOutcome, SessionPhase, SessionReport,
};
use crate::transport::{DeliveredFrame, DeliveryQueue, DeliveryTable, TxKey};

/// What an OFFER hands to the REQUEST phase
struct Offer {
    address: Ipv4Addr,
    server_id: Ipv4Addr,
}

/// What an ACK commits
struct Commitment {
    address: Ipv4Addr,
    server_id: Ipv4Addr,
    server_mac: MacAddr,
    lease_secs: u32,
}

pub struct Dhcpv4Session {
    id: Uuid,
    identity: ClientIdentity,
}

impl Dhcpv4Session {
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            id: Uuid::now_v7(),
            identity,
        }
    }

    fn report(
        &self,
        outcome: SessionOutcome,
        lease: Option<LeaseRecord>,
        bind_latency: Option<Duration>,
        restarts: u32,
        phases: Vec<SessionPhase>,
    ) -> SessionReport {
        SessionReport {
            id: self.id,
            index: self.identity.index,
            variant: ProtocolVariant::V4,
            mac: self.identity.mac,
            outcome,
            lease,
            bind_latency,
            restarts,
            phases,
        }
    }
}

#[async_trait]
impl ClientSession for Dhcpv4Session {
    fn id(&self) -> Uuid {
        self.id
    }

    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::V4
    }

    async fn run(&self, ctx: SessionContext) -> SessionReport {
        let mac = self.identity.mac;
        let started = Instant::now();
        let mut shutdown = ctx.shutdown.clone();
        let mut phases = vec![SessionPhase::Init];
        let mut restarts = 0u32;

        let commitment = loop {
            // Fresh transaction per acquisition cycle, shared by both phases
            let (xid, mut queue) = register(&ctx.table, mac);
            record_phase(&mut phases, SessionPhase::Selecting);
            debug!(id = %self.id, %mac, xid = format_args!("{xid:#010x}"), "discovering");

            let offer = match exchange(
                &ctx,
                &mut queue,
                &mut shutdown,
                started,
                |elapsed| discover_frame(xid, mac, elapsed),
                |frame| match_offer(xid, mac, frame),
            )
            .await
            {
                Ok(offer) => offer,
                Err(end) => {
                    if let ExchangeError::Transport(e) = &end {
                        warn!(id = %self.id, %mac, error = %e, "transport failure");
                    }
                    record_phase(&mut phases, SessionPhase::Failed);
                    return self.report(
                        SessionOutcome::Failed(end.failure_reason()),
                        None,
                        None,
                        restarts,
                        phases,
                    );
                }
            };

            record_phase(&mut phases, SessionPhase::Requesting);
            debug!(id = %self.id, %mac, address = %offer.address, server = %offer.server_id, "requesting offered address");

            match exchange(
                &ctx,
                &mut queue,
                &mut shutdown,
                started,
                |elapsed| request_frame(xid, mac, offer.address, offer.server_id, elapsed),
                |frame| match_ack(xid, mac, frame),
            )
            .await
            {
                Ok(commitment) => break commitment,
                Err(ExchangeError::Rejected) => {
                    restarts += 1;
                    if restarts > ctx.config.retry.max_restarts {
                        warn!(id = %self.id, %mac, restarts, "server kept refusing, giving up");
                        record_phase(&mut phases, SessionPhase::Failed);
                        return self.report(
                            SessionOutcome::Failed(ExchangeError::Rejected.failure_reason()),
                            None,
                            None,
                            restarts,
                            phases,
                        );
                    }
                    debug!(id = %self.id, %mac, restarts, "NAKed, restarting with a fresh xid");
                    continue;
                }
                Err(end) => {
                    if let ExchangeError::Transport(e) = &end {
                        warn!(id = %self.id, %mac, error = %e, "transport failure");
                    }
                    record_phase(&mut phases, SessionPhase::Failed);
                    return self.report(
                        SessionOutcome::Failed(end.failure_reason()),
                        None,
                        None,
                        restarts,
                        phases,
                    );
                }
            }
        };

        record_phase(&mut phases, SessionPhase::Bound);
        let bind_latency = started.elapsed();
        info!(
            id = %self.id,
            %mac,
            address = %commitment.address,
            server = %commitment.server_id,
            lease_secs = commitment.lease_secs,
            latency_ms = bind_latency.as_millis() as u64,
            "bound"
        );

        let lease = LeaseRecord::V4 {
            address: commitment.address,
            server_id: commitment.server_id,
            server_mac: commitment.server_mac,
            lease_secs: commitment.lease_secs,
        };
        ctx.registry.record(ReleaseTicket {
            session_id: self.id,
            mac,
            duid: None,
            lease: lease.clone(),
        });

        // Hold the lease; on shutdown the ticket is left to the sweep
        tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                return self.report(
                    SessionOutcome::Bound,
                    Some(lease),
                    Some(bind_latency),
                    restarts,
                    phases,
                );
            }
            _ = tokio::time::sleep(ctx.config.hold) => {}
        }

        record_phase(&mut phases, SessionPhase::Releasing);
        if let Some(ticket) = ctx.registry.claim(self.id) {
            match ctx.sink.send_frame(&crate::release::release_frame(&ticket)) {
                Ok(()) => ctx.stats.frame_sent(),
                Err(e) => warn!(id = %self.id, %mac, error = %e, "release send failed"),
            }
        }
        record_phase(&mut phases, SessionPhase::Released);
        debug!(id = %self.id, %mac, address = %commitment.address, "released");
        self.report(
            SessionOutcome::Released,
            Some(lease),
            Some(bind_latency),
            restarts,
            phases,
        )
    }
}

/// Claim a random unused xid on the delivery table
pub(crate) fn register(table: &Arc<DeliveryTable>, chaddr: MacAddr) -> (u32, DeliveryQueue) {
    loop {
        let xid: u32 = rand::random();
        if let Some(queue) = table.register(TxKey::V4(xid), chaddr) {
            return (xid, queue);
        }
    }
}

fn secs_field(elapsed: Duration) -> u16 {
    elapsed.as_secs().min(u16::MAX as u64) as u16
}

pub(crate) fn discover_frame(xid: u32, mac: MacAddr, elapsed: Duration) -> Vec<u8> {
    let mut packet = DhcpPacket::new_discover(xid, mac);
    packet.secs = secs_field(elapsed);
    broadcast_frame(mac, packet.build())
}

fn request_frame(
    xid: u32,
    mac: MacAddr,
    address: Ipv4Addr,
    server_id: Ipv4Addr,
    elapsed: Duration,
) -> Vec<u8> {
    let mut packet = DhcpPacket::new_request(xid, mac, address, server_id);
    packet.secs = secs_field(elapsed);
    broadcast_frame(mac, packet.build())
}

/// Frame a client-to-server message for a host that has no address yet:
/// all-ones ethernet destination, 0.0.0.0 -> 255.255.255.255
fn broadcast_frame(mac: MacAddr, payload: Vec<u8>) -> Vec<u8> {
    let udp = UdpDatagram::new(DHCP_CLIENT_PORT, DHCP_SERVER_PORT, payload);
    let ip = Ipv4Packet::new(
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::BROADCAST,
        IpProtocol::Udp,
        udp.to_bytes(),
    );
    EthernetFrame::new(MacAddr::broadcast(), mac, EtherType::IPv4, ip.to_bytes()).to_bytes()
}

/// RELEASE goes unicast from the leased address straight to the server
pub(crate) fn release_frame(
    mac: MacAddr,
    address: Ipv4Addr,
    server_id: Ipv4Addr,
    server_mac: MacAddr,
) -> Vec<u8> {
    let packet = DhcpPacket::new_release(rand::random(), mac, address, server_id);
    let udp = UdpDatagram::new(DHCP_CLIENT_PORT, DHCP_SERVER_PORT, packet.build());
    let ip = Ipv4Packet::new(address, server_id, IpProtocol::Udp, udp.to_bytes());
    EthernetFrame::new(server_mac, mac, EtherType::IPv4, ip.to_bytes()).to_bytes()
}

fn match_offer(xid: u32, mac: MacAddr, frame: &DeliveredFrame) -> Option<Reply<Offer>> {
    let packet = DhcpPacket::parse(&frame.payload).ok()?;
    if packet.xid != xid || packet.client_mac() != mac {
        return None;
    }
    match packet.message_type()? {
        DhcpMessageType::Offer => {
            if packet.yiaddr.is_unspecified() {
                return None;
            }
            let server_id = packet.server_id()?;
            Some(Reply::Accept(Offer {
                address: packet.yiaddr,
                server_id,
            }))
        }
        _ => None,
    }
}

fn match_ack(xid: u32, mac: MacAddr, frame: &DeliveredFrame) -> Option<Reply<Commitment>> {
    let packet = DhcpPacket::parse(&frame.payload).ok()?;
    if packet.xid != xid || packet.client_mac() != mac {
        return None;
    }
    match packet.message_type()? {
        DhcpMessageType::Ack => {
            if packet.yiaddr.is_unspecified() {
                return None;
            }
            let server_id = packet.server_id()?;
            Some(Reply::Accept(Commitment {
                address: packet.yiaddr,
                server_id,
                server_mac: frame.source_mac,
                lease_secs: packet.lease_time().unwrap_or(0),
            }))
        }
        DhcpMessageType::Nak => {
            if let Some(reason) = packet.message() {
                debug!(%mac, reason, "NAK");
            }
            Some(Reply::Reject)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FailureReason;
    use crate::testing::{self, FailingSink, MockV4Server};
    use dhcpswarm_core::{RetryPolicy, RunMode};
    use dhcpswarm_protocols::dhcpv4::packet::DHCP_BROADCAST_FLAG;

    fn session() -> Dhcpv4Session {
        Dhcpv4Session::new(ClientIdentity::generate(0, RunMode::V4))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_acquire_hold_release_cycle() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV4Server::new(Arc::clone(&table));
        let (ctx, _shutdown) =
            testing::context(testing::fast_config(), server.clone(), Arc::clone(&table));

        let session = session();
        let mac = session.identity.mac;
        let report = session.run(ctx.clone()).await;

        assert_eq!(report.outcome, SessionOutcome::Released);
        assert_eq!(report.restarts, 0);
        assert!(report.bind_latency.is_some());
        assert_eq!(
            report.phases,
            vec![
                SessionPhase::Init,
                SessionPhase::Selecting,
                SessionPhase::Requesting,
                SessionPhase::Bound,
                SessionPhase::Releasing,
                SessionPhase::Released,
            ]
        );

        let Some(LeaseRecord::V4 { address, server_id, .. }) = report.lease else {
            panic!("expected a v4 lease");
        };
        assert_eq!(server_id, server.server_id);
        assert_eq!(server.acks.lock().as_slice(), &[(mac, address)]);
        assert_eq!(server.releases.lock().as_slice(), &[(mac, address)]);
        // Nothing left behind for the sweep, and the xid is freed
        assert!(ctx.registry.is_empty());
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nak_restarts_under_a_fresh_xid() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV4Server::new(Arc::clone(&table));
        server.refuse_next_requests(1);
        let (ctx, _shutdown) =
            testing::context(testing::fast_config(), server.clone(), Arc::clone(&table));

        let report = session().run(ctx).await;

        assert_eq!(report.outcome, SessionOutcome::Released);
        assert_eq!(report.restarts, 1);
        let xids = server.discover_xids.lock();
        assert_eq!(xids.len(), 2);
        assert_ne!(xids[0], xids[1]);
        assert_eq!(
            report.phases,
            vec![
                SessionPhase::Init,
                SessionPhase::Selecting,
                SessionPhase::Requesting,
                SessionPhase::Selecting,
                SessionPhase::Requesting,
                SessionPhase::Bound,
                SessionPhase::Releasing,
                SessionPhase::Released,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_discover_times_out_after_all_windows() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV4Server::new(Arc::clone(&table));
        server.go_silent();
        let (ctx, _shutdown) =
            testing::context(testing::fast_config(), server.clone(), Arc::clone(&table));

        let t0 = Instant::now();
        let report = session().run(ctx.clone()).await;
        let elapsed = t0.elapsed();

        assert_eq!(report.outcome, SessionOutcome::Failed(FailureReason::Timeout));
        assert_eq!(
            report.phases,
            vec![SessionPhase::Init, SessionPhase::Selecting, SessionPhase::Failed]
        );
        // One frame per attempt, windows of 1s, 2s, 4s
        assert_eq!(ctx.stats.frames_sent_total(), 3);
        assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_exhaust_the_restart_budget() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV4Server::new(Arc::clone(&table));
        server.refuse_next_requests(10);
        let config = testing::fast_config().with_retry(RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(8),
            3,
            1,
        ));
        let (ctx, _shutdown) = testing::context(config, server.clone(), Arc::clone(&table));

        let report = session().run(ctx).await;

        assert_eq!(report.outcome, SessionOutcome::Failed(FailureReason::Rejected));
        assert_eq!(report.restarts, 2);
        assert_eq!(server.discover_xids.lock().len(), 2);
        assert_eq!(report.phases.last(), Some(&SessionPhase::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_hold_leaves_lease_to_the_sweep() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV4Server::new(Arc::clone(&table));
        let config = testing::fast_config().with_hold(Duration::from_secs(300));
        let (ctx, shutdown) = testing::context(config, server.clone(), Arc::clone(&table));

        let session = session();
        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move { session.run(run_ctx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        let report = handle.await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::Bound);
        assert_eq!(report.phases.last(), Some(&SessionPhase::Bound));
        // The ticket is still registered and no RELEASE went out yet
        assert_eq!(ctx.registry.len(), 1);
        assert!(server.releases.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_fails_the_session() {
        let table = Arc::new(DeliveryTable::new());
        let (ctx, _shutdown) = testing::context(
            testing::fast_config(),
            Arc::new(FailingSink),
            Arc::clone(&table),
        );

        let report = session().run(ctx).await;
        assert_eq!(
            report.outcome,
            SessionOutcome::Failed(FailureReason::Transport)
        );
        assert_eq!(
            report.phases,
            vec![SessionPhase::Init, SessionPhase::Selecting, SessionPhase::Failed]
        );
    }

    #[test]
    fn test_discover_frame_broadcast_shape() {
        let mac = MacAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let frame = discover_frame(0x1f2e_3d4c, mac, Duration::from_secs(3));

        let eth = EthernetFrame::from_bytes(&frame).unwrap();
        assert_eq!(eth.destination, MacAddr::broadcast());
        assert_eq!(eth.source, mac);
        let ip = Ipv4Packet::from_bytes(&eth.payload).unwrap();
        assert_eq!(ip.source, Ipv4Addr::UNSPECIFIED);
        assert_eq!(ip.destination, Ipv4Addr::BROADCAST);
        let udp = UdpDatagram::from_bytes(&ip.payload).unwrap();
        assert_eq!(udp.source_port, DHCP_CLIENT_PORT);
        assert_eq!(udp.destination_port, DHCP_SERVER_PORT);
        let packet = DhcpPacket::parse(&udp.payload).unwrap();
        assert_eq!(packet.secs, 3);
        assert_ne!(packet.flags & DHCP_BROADCAST_FLAG, 0);
    }

    #[test]
    fn test_release_frame_unicast_shape() {
        let mac = MacAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let server_mac = MacAddr::new([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
        let address = Ipv4Addr::new(10, 0, 0, 20);
        let server_id = Ipv4Addr::new(10, 0, 0, 1);

        let frame = release_frame(mac, address, server_id, server_mac);
        let eth = EthernetFrame::from_bytes(&frame).unwrap();
        assert_eq!(eth.destination, server_mac);
        assert_eq!(eth.source, mac);
        let ip = Ipv4Packet::from_bytes(&eth.payload).unwrap();
        assert_eq!(ip.source, address);
        assert_eq!(ip.destination, server_id);
        let udp = UdpDatagram::from_bytes(&ip.payload).unwrap();
        let packet = DhcpPacket::parse(&udp.payload).unwrap();
        assert_eq!(packet.message_type(), Some(DhcpMessageType::Release));
        assert_eq!(packet.ciaddr, address);
        assert_eq!(packet.flags, 0);
        assert_eq!(packet.server_id(), Some(server_id));
    }
}
