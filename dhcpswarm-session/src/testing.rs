//! In-process fake DHCP servers for state machine tests
//!
//! Each mock implements [`FrameSink`]: it parses the full ethernet frame a
//! session sends, crafts the reply a well-behaved (or deliberately hostile)
//! server would produce, and pushes it straight back through the delivery
//! table. Tests therefore exercise frame assembly, classification keys, and
//! the machines end to end without touching a real network.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dhcpswarm_core::{Error, MacAddr, Result, RetryPolicy, SimConfig};
use dhcpswarm_packet::{EtherType, EthernetFrame, Ipv4Packet, Ipv6Packet, UdpDatagram};
use dhcpswarm_protocols::dhcpv4::packet::BOOTREPLY;
use dhcpswarm_protocols::dhcpv4::{DhcpMessageType, DhcpOption, DhcpPacket};
use dhcpswarm_protocols::dhcpv6::{
    eui64_link_local, Dhcpv6MessageType, Dhcpv6Option, Dhcpv6OptionType, Dhcpv6Packet,
};
use parking_lot::Mutex;

use crate::release::LeaseRegistry;
use crate::session::{SessionContext, Shutdown};
use crate::stats::SwarmStats;
use crate::transport::{DeliveredFrame, DeliveryTable, FrameSink, TxKey};

/// A config with sub-second timing so paused-clock tests finish instantly
pub(crate) fn fast_config() -> SimConfig {
    SimConfig::new("test0")
        .with_hold(Duration::ZERO)
        .with_retry(RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(8),
            3,
            3,
        ))
        .with_server_wait(None)
}

/// Assemble a [`SessionContext`] around a sink, returning the trigger side
/// of its shutdown broadcast
pub(crate) fn context(
    config: SimConfig,
    sink: Arc<dyn FrameSink>,
    table: Arc<DeliveryTable>,
) -> (SessionContext, Shutdown) {
    let shutdown = Shutdown::new();
    let ctx = SessionContext {
        config: Arc::new(config),
        sink,
        table,
        registry: Arc::new(LeaseRegistry::new()),
        stats: Arc::new(SwarmStats::new()),
        shutdown: shutdown.signal(),
    };
    (ctx, shutdown)
}

/// A sink whose sends always fail
pub(crate) struct FailingSink;

impl FrameSink for FailingSink {
    fn send_frame(&self, _frame: &[u8]) -> Result<()> {
        Err(Error::transport("injected send failure"))
    }
}

pub(crate) fn parse_v4_frame(frame: &[u8]) -> Option<DhcpPacket> {
    let eth = EthernetFrame::from_bytes(frame)?;
    if eth.ethertype != EtherType::IPv4 {
        return None;
    }
    let ip = Ipv4Packet::from_bytes(&eth.payload)?;
    let udp = UdpDatagram::from_bytes(&ip.payload)?;
    DhcpPacket::parse(&udp.payload).ok()
}

pub(crate) fn parse_v6_frame(frame: &[u8]) -> Option<Dhcpv6Packet> {
    let eth = EthernetFrame::from_bytes(frame)?;
    if eth.ethertype != EtherType::IPv6 {
        return None;
    }
    let ip = Ipv6Packet::from_bytes(&eth.payload)?;
    let udp = UdpDatagram::from_bytes(&ip.payload)?;
    Dhcpv6Packet::parse(&udp.payload).ok()
}

/// Scriptable DHCPv4 server answering through the delivery table
pub(crate) struct MockV4Server {
    table: Arc<DeliveryTable>,
    pub server_id: Ipv4Addr,
    pub server_mac: MacAddr,
    next_host: AtomicU32,
    naks_remaining: AtomicU32,
    silent: AtomicBool,
    /// xid of every DISCOVER seen, in order
    pub discover_xids: Mutex<Vec<u32>>,
    /// (chaddr, committed address) per ACK sent
    pub acks: Mutex<Vec<(MacAddr, Ipv4Addr)>>,
    /// (chaddr, released address) per RELEASE seen
    pub releases: Mutex<Vec<(MacAddr, Ipv4Addr)>>,
    leases: Mutex<HashMap<MacAddr, Ipv4Addr>>,
}

impl MockV4Server {
    pub fn new(table: Arc<DeliveryTable>) -> Arc<Self> {
        Arc::new(Self {
            table,
            server_id: Ipv4Addr::new(192, 168, 1, 1),
            server_mac: MacAddr::new([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]),
            next_host: AtomicU32::new(0),
            naks_remaining: AtomicU32::new(0),
            silent: AtomicBool::new(false),
            discover_xids: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            releases: Mutex::new(Vec::new()),
            leases: Mutex::new(HashMap::new()),
        })
    }

    /// NAK the next `count` REQUESTs before going back to normal
    pub fn refuse_next_requests(&self, count: u32) {
        self.naks_remaining.store(count, Ordering::Relaxed);
    }

    /// Stop answering entirely; sends still succeed
    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::Relaxed);
    }

    /// Stable per-MAC allocation out of 10.0.0.0/16
    fn address_for(&self, mac: MacAddr) -> Ipv4Addr {
        let mut leases = self.leases.lock();
        if let Some(address) = leases.get(&mac) {
            return *address;
        }
        let n = self.next_host.fetch_add(1, Ordering::Relaxed);
        let address = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 10)) + n);
        leases.insert(mac, address);
        address
    }

    fn reply_skeleton(
        &self,
        request: &DhcpPacket,
        msg_type: DhcpMessageType,
        yiaddr: Ipv4Addr,
    ) -> DhcpPacket {
        let mut reply = DhcpPacket::new();
        reply.op = BOOTREPLY;
        reply.xid = request.xid;
        reply.flags = request.flags;
        reply.yiaddr = yiaddr;
        reply.chaddr = request.chaddr;
        reply.options.push(DhcpOption::MessageType(msg_type));
        reply.options.push(DhcpOption::ServerId(self.server_id));
        reply
    }

    fn answer(&self, reply: DhcpPacket) {
        let delivered = DeliveredFrame {
            payload: reply.build(),
            source_mac: self.server_mac,
            source_ip: IpAddr::V4(self.server_id),
        };
        self.table
            .dispatch(TxKey::V4(reply.xid), Some(reply.chaddr), delivered);
    }
}

impl FrameSink for MockV4Server {
    fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let request =
            parse_v4_frame(frame).ok_or_else(|| Error::malformed("not a DHCPv4 frame"))?;
        if self.silent.load(Ordering::Relaxed) {
            return Ok(());
        }
        match request.message_type() {
            Some(DhcpMessageType::Discover) => {
                self.discover_xids.lock().push(request.xid);
                let address = self.address_for(request.chaddr);
                let mut offer = self.reply_skeleton(&request, DhcpMessageType::Offer, address);
                offer.options.push(DhcpOption::LeaseTime(3600));
                self.answer(offer);
            }
            Some(DhcpMessageType::Request) => {
                if self.naks_remaining.load(Ordering::Relaxed) > 0 {
                    self.naks_remaining.fetch_sub(1, Ordering::Relaxed);
                    let mut nak =
                        self.reply_skeleton(&request, DhcpMessageType::Nak, Ipv4Addr::UNSPECIFIED);
                    nak.options
                        .push(DhcpOption::Message("requested address refused".to_string()));
                    self.answer(nak);
                } else {
                    let address = request
                        .requested_ip()
                        .unwrap_or_else(|| self.address_for(request.chaddr));
                    let mut ack = self.reply_skeleton(&request, DhcpMessageType::Ack, address);
                    ack.options.push(DhcpOption::LeaseTime(3600));
                    self.acks.lock().push((request.chaddr, address));
                    self.answer(ack);
                }
            }
            Some(DhcpMessageType::Release) => {
                self.releases.lock().push((request.chaddr, request.ciaddr));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Scriptable DHCPv6 server granting an IA_NA address and an IA_PD prefix
pub(crate) struct MockV6Server {
    table: Arc<DeliveryTable>,
    pub server_duid: Vec<u8>,
    pub server_mac: MacAddr,
    next_host: AtomicU32,
    rejects_remaining: AtomicU32,
    silent: AtomicBool,
    /// (client duid, released address, released prefix) per RELEASE seen
    pub releases: Mutex<Vec<(Vec<u8>, Option<Ipv6Addr>, Option<Ipv6Addr>)>>,
    /// client duid per REPLY that committed bindings
    pub commits: Mutex<Vec<Vec<u8>>>,
    leases: Mutex<HashMap<Vec<u8>, (Ipv6Addr, Ipv6Addr)>>,
}

/// Prefix length the mock delegates
pub(crate) const MOCK_PREFIX_LEN: u8 = 64;

impl MockV6Server {
    pub fn new(table: Arc<DeliveryTable>) -> Arc<Self> {
        let server_mac = MacAddr::new([0x02, 0xdd, 0xee, 0xff, 0x00, 0x11]);
        Arc::new(Self {
            table,
            server_duid: Dhcpv6Packet::generate_duid_llt(server_mac),
            server_mac,
            next_host: AtomicU32::new(1),
            rejects_remaining: AtomicU32::new(0),
            silent: AtomicBool::new(false),
            releases: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            leases: Mutex::new(HashMap::new()),
        })
    }

    /// Answer the next `count` REQUESTs with a NoAddrsAvail status
    pub fn refuse_next_requests(&self, count: u32) {
        self.rejects_remaining.store(count, Ordering::Relaxed);
    }

    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::Relaxed);
    }

    fn bindings_for(&self, duid: &[u8]) -> (Ipv6Addr, Ipv6Addr) {
        let mut leases = self.leases.lock();
        if let Some(bindings) = leases.get(duid) {
            return *bindings;
        }
        let n = self.next_host.fetch_add(1, Ordering::Relaxed) as u16;
        let address = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x100 + n);
        let prefix = Ipv6Addr::new(0x2001, 0xdb8, 1, n, 0, 0, 0, 0);
        leases.insert(duid.to_vec(), (address, prefix));
        (address, prefix)
    }

    /// Grant whatever IAs the request carried, echoing their IAIDs
    fn grant(
        &self,
        msg_type: Dhcpv6MessageType,
        request: &Dhcpv6Packet,
        client_duid: &[u8],
    ) -> Dhcpv6Packet {
        let (address, prefix) = self.bindings_for(client_duid);
        let mut reply = Dhcpv6Packet::new(msg_type, request.transaction_id)
            .add_option(Dhcpv6Option::client_id(client_duid))
            .add_option(Dhcpv6Option::server_id(&self.server_duid));
        if let Some(ia_na) = request.option(Dhcpv6OptionType::IaNa) {
            reply = reply.add_option(Dhcpv6Option::ia_na(
                iaid_of(ia_na),
                1800,
                2880,
                &[Dhcpv6Option::ia_addr(address, 3600, 7200)],
            ));
        }
        if let Some(ia_pd) = request.option(Dhcpv6OptionType::IaPd) {
            reply = reply.add_option(Dhcpv6Option::ia_pd(
                iaid_of(ia_pd),
                1800,
                2880,
                &[Dhcpv6Option::ia_prefix(prefix, MOCK_PREFIX_LEN, 3600, 7200)],
            ));
        }
        reply
    }

    fn answer(&self, reply: Dhcpv6Packet) {
        let delivered = DeliveredFrame {
            payload: reply.to_bytes(),
            source_mac: self.server_mac,
            source_ip: IpAddr::V6(eui64_link_local(self.server_mac)),
        };
        self.table
            .dispatch(TxKey::V6(reply.transaction_id), None, delivered);
    }
}

impl FrameSink for MockV6Server {
    fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let message =
            parse_v6_frame(frame).ok_or_else(|| Error::malformed("not a DHCPv6 frame"))?;
        if self.silent.load(Ordering::Relaxed) {
            return Ok(());
        }
        let Some(client_duid) = message.client_duid().map(|duid| duid.to_vec()) else {
            return Ok(());
        };
        match message.msg_type {
            Dhcpv6MessageType::Solicit => {
                let advertise = self.grant(Dhcpv6MessageType::Advertise, &message, &client_duid);
                self.answer(advertise);
            }
            Dhcpv6MessageType::Request => {
                if self.rejects_remaining.load(Ordering::Relaxed) > 0 {
                    self.rejects_remaining.fetch_sub(1, Ordering::Relaxed);
                    // Status 2: NoAddrsAvail
                    let reply = Dhcpv6Packet::new(Dhcpv6MessageType::Reply, message.transaction_id)
                        .add_option(Dhcpv6Option::client_id(&client_duid))
                        .add_option(Dhcpv6Option::server_id(&self.server_duid))
                        .add_option(Dhcpv6Option::status_code(2, "pool exhausted"));
                    self.answer(reply);
                } else {
                    let reply = self.grant(Dhcpv6MessageType::Reply, &message, &client_duid);
                    self.commits.lock().push(client_duid);
                    self.answer(reply);
                }
            }
            Dhcpv6MessageType::Release => {
                let address = message.ia_na_address().map(|granted| granted.address);
                let prefix = message.ia_pd_prefix().map(|granted| granted.prefix);
                self.releases.lock().push((client_duid, address, prefix));
            }
            _ => {}
        }
        Ok(())
    }
}

fn iaid_of(option: &Dhcpv6Option) -> u32 {
    option
        .data
        .get(0..4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .unwrap_or(0)
}
