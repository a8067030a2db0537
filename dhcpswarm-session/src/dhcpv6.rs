//! The DHCPv6 client session
//!
//! One session walks the SARR exchange: multicast SOLICIT carrying empty
//! IA_NA and IA_PD options, pick the first ADVERTISE that grants at least
//! one of them, then REQUEST those bindings from the advertising server.
//! SOLICIT and REQUEST are separate transactions, each under its own
//! transaction id. A REPLY with a non-zero status code restarts the whole
//! exchange a bounded number of times. The bound lease is held, then a
//! RELEASE naming the bound IAs goes back out on the multicast group.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dhcpswarm_core::{MacAddr, ProtocolVariant};
use dhcpswarm_packet::{EtherType, EthernetFrame, IpProtocol, Ipv6Packet, UdpDatagram};
use dhcpswarm_protocols::dhcpv6::{
    eui64_link_local, status_code_name, DelegatedPrefix, Dhcpv6MessageType, Dhcpv6Option,
    Dhcpv6Packet, IaAddress, DHCPV6_CLIENT_PORT, DHCPV6_MULTICAST, DHCPV6_MULTICAST_MAC,
    DHCPV6_SERVER_PORT,
};
use ipnetwork::Ipv6Network;
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

/// What an ADVERTISE offers
struct Advertisement {
    server_duid: Vec<u8>,
    address: Option<IaAddress>,
    prefix: Option<DelegatedPrefix>,
}

/// What a committing REPLY grants
struct Binding {
    address: Option<IaAddress>,
    prefix: Option<DelegatedPrefix>,
}

pub struct Dhcpv6Session {
    id: Uuid,
    identity: ClientIdentity,
}

impl Dhcpv6Session {
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            id: Uuid::now_v7(),
            identity,
        }
    }

    fn duid(&self) -> Vec<u8> {
        self.identity
            .duid
            .clone()
            .unwrap_or_else(|| Dhcpv6Packet::generate_duid_llt(self.identity.mac))
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
            variant: ProtocolVariant::V6,
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
impl ClientSession for Dhcpv6Session {
    fn id(&self) -> Uuid {
        self.id
    }

    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::V6
    }

    async fn run(&self, ctx: SessionContext) -> SessionReport {
        let mac = self.identity.mac;
        let duid = self.duid();
        let iaid = self.identity.iaid();
        let started = Instant::now();
        let mut shutdown = ctx.shutdown.clone();
        let mut phases = vec![SessionPhase::Init];
        let mut restarts = 0u32;

        let (advert, binding) = loop {
            let (txid, mut queue) = register(&ctx.table, mac);
            record_phase(&mut phases, SessionPhase::Soliciting);
            debug!(
                id = %self.id,
                %mac,
                txid = format_args!("{:02x}{:02x}{:02x}", txid[0], txid[1], txid[2]),
                "soliciting"
            );

            let advert = match exchange(
                &ctx,
                &mut queue,
                &mut shutdown,
                started,
                |elapsed| solicit_frame(txid, mac, &duid, iaid, elapsed),
                |frame| match_advertise(txid, &duid, frame),
            )
            .await
            {
                Ok(advert) => advert,
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

            // The REQUEST is its own transaction; free the solicit txid first
            drop(queue);
            let (txid, mut queue) = register(&ctx.table, mac);
            record_phase(&mut phases, SessionPhase::Requesting);
            debug!(
                id = %self.id,
                %mac,
                txid = format_args!("{:02x}{:02x}{:02x}", txid[0], txid[1], txid[2]),
                "requesting advertised bindings"
            );

            match exchange(
                &ctx,
                &mut queue,
                &mut shutdown,
                started,
                |elapsed| request_frame(txid, mac, &duid, &advert, iaid, elapsed),
                |frame| match_reply(txid, &duid, &advert.server_duid, frame),
            )
            .await
            {
                Ok(binding) => break (advert, binding),
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
                    debug!(id = %self.id, %mac, restarts, "refused, soliciting again");
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
        let address = binding.address.map(|granted| granted.address);
        let prefix = binding
            .prefix
            .and_then(|granted| Ipv6Network::new(granted.prefix, granted.prefix_length).ok());
        let valid_secs = u32::max(
            binding.address.map_or(0, |granted| granted.valid_lifetime),
            binding.prefix.map_or(0, |granted| granted.valid_lifetime),
        );
        info!(
            id = %self.id,
            %mac,
            address = ?address,
            prefix = ?prefix,
            valid_secs,
            latency_ms = bind_latency.as_millis() as u64,
            "bound"
        );

        let lease = LeaseRecord::V6 {
            address,
            prefix,
            server_duid: advert.server_duid.clone(),
            iaid,
            valid_secs,
        };
        ctx.registry.record(ReleaseTicket {
            session_id: self.id,
            mac,
            duid: Some(duid),
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
        debug!(id = %self.id, %mac, "released");
        self.report(
            SessionOutcome::Released,
            Some(lease),
            Some(bind_latency),
            restarts,
            phases,
        )
    }
}

/// Claim a random unused transaction id on the delivery table
pub(crate) fn register(table: &Arc<DeliveryTable>, chaddr: MacAddr) -> ([u8; 3], DeliveryQueue) {
    loop {
        let txid = Dhcpv6Packet::random_transaction_id();
        if let Some(queue) = table.register(TxKey::V6(txid), chaddr) {
            return (txid, queue);
        }
    }
}

/// Elapsed time in centiseconds, saturating at the field width
fn elapsed_cs(elapsed: Duration) -> u16 {
    (elapsed.as_millis() / 10).min(u16::MAX as u128) as u16
}

pub(crate) fn solicit_frame(
    txid: [u8; 3],
    mac: MacAddr,
    duid: &[u8],
    iaid: u32,
    elapsed: Duration,
) -> Vec<u8> {
    let packet = Dhcpv6Packet::solicit(txid, duid, elapsed_cs(elapsed))
        .add_option(Dhcpv6Option::ia_na(iaid, 0, 0, &[]))
        .add_option(Dhcpv6Option::ia_pd(iaid, 0, 0, &[]));
    multicast_frame(mac, packet.to_bytes())
}

/// Mirror the advertised IAs back so the server commits exactly those
fn request_frame(
    txid: [u8; 3],
    mac: MacAddr,
    duid: &[u8],
    advert: &Advertisement,
    iaid: u32,
    elapsed: Duration,
) -> Vec<u8> {
    let mut packet = Dhcpv6Packet::request(txid, duid, &advert.server_duid, elapsed_cs(elapsed));
    if let Some(granted) = advert.address {
        packet = packet.add_option(Dhcpv6Option::ia_na(
            iaid,
            0,
            0,
            &[Dhcpv6Option::ia_addr(
                granted.address,
                granted.preferred_lifetime,
                granted.valid_lifetime,
            )],
        ));
    }
    if let Some(granted) = advert.prefix {
        packet = packet.add_option(Dhcpv6Option::ia_pd(
            iaid,
            0,
            0,
            &[Dhcpv6Option::ia_prefix(
                granted.prefix,
                granted.prefix_length,
                granted.preferred_lifetime,
                granted.valid_lifetime,
            )],
        ));
    }
    multicast_frame(mac, packet.to_bytes())
}

/// Frame a client message for the All_DHCP_Relay_Agents_and_Servers group.
/// The source is the EUI-64 link-local address derived from `mac`, and the
/// UDP checksum over the v6 pseudo-header is mandatory.
fn multicast_frame(mac: MacAddr, payload: Vec<u8>) -> Vec<u8> {
    let source = eui64_link_local(mac);
    let udp = UdpDatagram::new(DHCPV6_CLIENT_PORT, DHCPV6_SERVER_PORT, payload);
    let bytes = udp.to_bytes_with_checksum_v6(&source, &DHCPV6_MULTICAST);
    let ip = Ipv6Packet::new(source, DHCPV6_MULTICAST, IpProtocol::Udp, bytes).with_hop_limit(1);
    EthernetFrame::new(DHCPV6_MULTICAST_MAC, mac, EtherType::IPv6, ip.to_bytes()).to_bytes()
}

/// RELEASE names the bound IAs with zeroed lifetimes
pub(crate) fn release_frame(
    mac: MacAddr,
    duid: &[u8],
    server_duid: &[u8],
    iaid: u32,
    address: Option<Ipv6Addr>,
    prefix: Option<Ipv6Network>,
) -> Vec<u8> {
    let mut packet =
        Dhcpv6Packet::release(Dhcpv6Packet::random_transaction_id(), duid, server_duid);
    if let Some(bound) = address {
        packet = packet.add_option(Dhcpv6Option::ia_na(
            iaid,
            0,
            0,
            &[Dhcpv6Option::ia_addr(bound, 0, 0)],
        ));
    }
    if let Some(bound) = prefix {
        packet = packet.add_option(Dhcpv6Option::ia_pd(
            iaid,
            0,
            0,
            &[Dhcpv6Option::ia_prefix(bound.ip(), bound.prefix(), 0, 0)],
        ));
    }
    multicast_frame(mac, packet.to_bytes())
}

fn match_advertise(
    txid: [u8; 3],
    duid: &[u8],
    frame: &DeliveredFrame,
) -> Option<Reply<Advertisement>> {
    let packet = Dhcpv6Packet::parse(&frame.payload).ok()?;
    if packet.msg_type != Dhcpv6MessageType::Advertise || packet.transaction_id != txid {
        return None;
    }
    if packet.client_duid() != Some(duid) {
        return None;
    }
    let server_duid = packet.server_duid()?.to_vec();
    if let Some((code, detail)) = packet.status_code() {
        if code != 0 {
            // Declined advertisements are ignored, another server may answer
            debug!(status = status_code_name(code), detail = %detail, "advertise declined");
            return None;
        }
    }
    let address = packet.ia_na_address();
    let prefix = packet.ia_pd_prefix();
    if address.is_none() && prefix.is_none() {
        return None;
    }
    Some(Reply::Accept(Advertisement {
        server_duid,
        address,
        prefix,
    }))
}

fn match_reply(
    txid: [u8; 3],
    duid: &[u8],
    server_duid: &[u8],
    frame: &DeliveredFrame,
) -> Option<Reply<Binding>> {
    let packet = Dhcpv6Packet::parse(&frame.payload).ok()?;
    if packet.msg_type != Dhcpv6MessageType::Reply || packet.transaction_id != txid {
        return None;
    }
    if packet.client_duid() != Some(duid) || packet.server_duid() != Some(server_duid) {
        return None;
    }
    if let Some((code, detail)) = packet.status_code() {
        if code != 0 {
            debug!(status = status_code_name(code), detail = %detail, "request refused");
            return Some(Reply::Reject);
        }
    }
    let address = packet.ia_na_address();
    let prefix = packet.ia_pd_prefix();
    if address.is_none() && prefix.is_none() {
        // The server answered but committed nothing
        return Some(Reply::Reject);
    }
    Some(Reply::Accept(Binding { address, prefix }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FailureReason;
    use crate::testing::{self, FailingSink, MockV6Server, MOCK_PREFIX_LEN};
    use dhcpswarm_core::RunMode;
    use dhcpswarm_protocols::dhcpv6::Dhcpv6OptionType;

    fn session() -> Dhcpv6Session {
        Dhcpv6Session::new(ClientIdentity::generate(0, RunMode::V6))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sarr_hold_release_cycle() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV6Server::new(Arc::clone(&table));
        let (ctx, _shutdown) =
            testing::context(testing::fast_config(), server.clone(), Arc::clone(&table));

        let session = session();
        let duid = session.duid();
        let report = session.run(ctx.clone()).await;

        assert_eq!(report.outcome, SessionOutcome::Released);
        assert_eq!(report.restarts, 0);
        assert!(report.bind_latency.is_some());
        assert_eq!(
            report.phases,
            vec![
                SessionPhase::Init,
                SessionPhase::Soliciting,
                SessionPhase::Requesting,
                SessionPhase::Bound,
                SessionPhase::Releasing,
                SessionPhase::Released,
            ]
        );

        let expected_address = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x101);
        let expected_prefix = Ipv6Network::new(
            Ipv6Addr::new(0x2001, 0xdb8, 1, 1, 0, 0, 0, 0),
            MOCK_PREFIX_LEN,
        )
        .unwrap();
        let Some(LeaseRecord::V6 {
            address,
            prefix,
            server_duid,
            valid_secs,
            ..
        }) = report.lease
        else {
            panic!("expected a v6 lease");
        };
        assert_eq!(address, Some(expected_address));
        assert_eq!(prefix, Some(expected_prefix));
        assert_eq!(server_duid, server.server_duid);
        assert_eq!(valid_secs, 7200);

        let releases = server.releases.lock();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].0, duid);
        assert_eq!(releases[0].1, Some(expected_address));
        assert_eq!(releases[0].2, Some(expected_prefix.ip()));
        assert!(ctx.registry.is_empty());
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reject_restarts_the_exchange() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV6Server::new(Arc::clone(&table));
        server.refuse_next_requests(1);
        let (ctx, _shutdown) =
            testing::context(testing::fast_config(), server.clone(), Arc::clone(&table));

        let report = session().run(ctx).await;

        assert_eq!(report.outcome, SessionOutcome::Released);
        assert_eq!(report.restarts, 1);
        assert_eq!(server.commits.lock().len(), 1);
        assert_eq!(
            report.phases,
            vec![
                SessionPhase::Init,
                SessionPhase::Soliciting,
                SessionPhase::Requesting,
                SessionPhase::Soliciting,
                SessionPhase::Requesting,
                SessionPhase::Bound,
                SessionPhase::Releasing,
                SessionPhase::Released,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_solicit_times_out_after_all_windows() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV6Server::new(Arc::clone(&table));
        server.go_silent();
        let (ctx, _shutdown) =
            testing::context(testing::fast_config(), server.clone(), Arc::clone(&table));

        let report = session().run(ctx.clone()).await;

        assert_eq!(report.outcome, SessionOutcome::Failed(FailureReason::Timeout));
        assert_eq!(
            report.phases,
            vec![SessionPhase::Init, SessionPhase::Soliciting, SessionPhase::Failed]
        );
        assert_eq!(ctx.stats.frames_sent_total(), 3);
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
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_hold_leaves_lease_to_the_sweep() {
        let table = Arc::new(DeliveryTable::new());
        let server = MockV6Server::new(Arc::clone(&table));
        let config = testing::fast_config().with_hold(Duration::from_secs(300));
        let (ctx, shutdown) = testing::context(config, server.clone(), Arc::clone(&table));

        let session = session();
        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move { session.run(run_ctx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        let report = handle.await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::Bound);
        assert_eq!(ctx.registry.len(), 1);
        assert!(server.releases.lock().is_empty());
    }

    #[test]
    fn test_solicit_frame_multicast_shape() {
        let mac = MacAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let duid = Dhcpv6Packet::generate_duid_llt(mac);
        let frame = solicit_frame([0xab, 0xcd, 0xef], mac, &duid, 0x2233_4455, Duration::from_millis(1250));

        let eth = EthernetFrame::from_bytes(&frame).unwrap();
        assert_eq!(eth.destination, DHCPV6_MULTICAST_MAC);
        assert_eq!(eth.source, mac);
        let ip = Ipv6Packet::from_bytes(&eth.payload).unwrap();
        assert_eq!(ip.source, eui64_link_local(mac));
        assert_eq!(ip.destination, DHCPV6_MULTICAST);
        assert_eq!(ip.hop_limit, 1);
        let udp = UdpDatagram::from_bytes(&ip.payload).unwrap();
        assert_eq!(udp.source_port, DHCPV6_CLIENT_PORT);
        assert_eq!(udp.destination_port, DHCPV6_SERVER_PORT);
        assert_ne!(udp.checksum, 0);

        let packet = Dhcpv6Packet::parse(&udp.payload).unwrap();
        assert_eq!(packet.msg_type, Dhcpv6MessageType::Solicit);
        assert_eq!(packet.transaction_id, [0xab, 0xcd, 0xef]);
        assert_eq!(packet.client_duid(), Some(duid.as_slice()));
        // 1250ms of waiting is 125 centiseconds
        let elapsed = packet.option(Dhcpv6OptionType::ElapsedTime).unwrap();
        assert_eq!(elapsed.data, 125u16.to_be_bytes());
        assert!(packet.option(Dhcpv6OptionType::IaNa).is_some());
        assert!(packet.option(Dhcpv6OptionType::IaPd).is_some());
    }

    #[test]
    fn test_release_frame_names_the_bound_ias() {
        let mac = MacAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let server_mac = MacAddr::new([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
        let duid = Dhcpv6Packet::generate_duid_llt(mac);
        let server_duid = Dhcpv6Packet::generate_duid_llt(server_mac);
        let address = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x10);
        let prefix =
            Ipv6Network::new(Ipv6Addr::new(0x2001, 0xdb8, 5, 0, 0, 0, 0, 0), 56).unwrap();

        let frame = release_frame(
            mac,
            &duid,
            &server_duid,
            0xabcd_1234,
            Some(address),
            Some(prefix),
        );
        let eth = EthernetFrame::from_bytes(&frame).unwrap();
        assert_eq!(eth.destination, DHCPV6_MULTICAST_MAC);
        let ip = Ipv6Packet::from_bytes(&eth.payload).unwrap();
        let udp = UdpDatagram::from_bytes(&ip.payload).unwrap();
        let packet = Dhcpv6Packet::parse(&udp.payload).unwrap();

        assert_eq!(packet.msg_type, Dhcpv6MessageType::Release);
        assert_eq!(packet.client_duid(), Some(duid.as_slice()));
        assert_eq!(packet.server_duid(), Some(server_duid.as_slice()));
        assert_eq!(packet.ia_na_address().map(|bound| bound.address), Some(address));
        let released = packet.ia_pd_prefix().unwrap();
        assert_eq!(released.prefix, prefix.ip());
        assert_eq!(released.prefix_length, 56);
    }
}
