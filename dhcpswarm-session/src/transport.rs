//! Raw frame transport and reply demultiplexing
//!
//! All clients share one raw channel per interface. Outgoing frames go
//! through a [`FrameSink`]; incoming frames are classified by a dedicated
//! reader thread and routed to the owning session through a
//! [`DeliveryTable`] keyed by transaction id. Sessions never touch the
//! channel directly, which keeps the state machines testable against an
//! in-process fake server.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dhcpswarm_core::{Error, Interface, MacAddr, Result};
use dhcpswarm_packet::{EtherType, EthernetFrame, IpProtocol, Ipv4Packet, Ipv6Packet, UdpDatagram};
use dhcpswarm_protocols::dhcpv4::packet::{BOOTREPLY, DHCP_CLIENT_PORT, DHCP_OPTIONS_OFFSET};
use dhcpswarm_protocols::dhcpv6::DHCPV6_CLIENT_PORT;
use parking_lot::Mutex;
use pnet_datalink::{Channel, Config, DataLinkReceiver, DataLinkSender};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Replies buffered per session before the oldest are dropped
pub const DELIVERY_QUEUE_DEPTH: usize = 8;

/// How long one blocking read may sit before rechecking the stop flag
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Transaction key a reply is routed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKey {
    /// DHCPv4 xid
    V4(u32),
    /// DHCPv6 transaction-id
    V6([u8; 3]),
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKey::V4(xid) => write!(f, "xid {xid:#010x}"),
            TxKey::V6(txid) => write!(f, "txid {:02x}{:02x}{:02x}", txid[0], txid[1], txid[2]),
        }
    }
}

/// A server reply, stripped to its DHCP payload plus sender coordinates
#[derive(Debug, Clone)]
pub struct DeliveredFrame {
    /// UDP payload: the DHCP message itself
    pub payload: Vec<u8>,
    /// Ethernet source of the reply
    pub source_mac: MacAddr,
    /// IP source of the reply
    pub source_ip: IpAddr,
}

/// Anything a session can push a raw ethernet frame into
///
/// Production uses [`DatalinkSink`]; tests substitute an in-process server
/// that parses the frame and answers through the delivery table.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<()>;
}

struct TableEntry {
    /// Client MAC the registrant owns; v4 replies must also carry it
    chaddr: MacAddr,
    tx: mpsc::Sender<DeliveredFrame>,
}

/// Routes classified replies to the session that owns the transaction
#[derive(Default)]
pub struct DeliveryTable {
    entries: DashMap<TxKey, TableEntry>,
}

impl DeliveryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` and get the receiving end for its replies
    ///
    /// Returns `None` when the key is already taken; the caller rolls a new
    /// transaction id and tries again. The queue deregisters itself on drop.
    pub fn register(self: &Arc<Self>, key: TxKey, chaddr: MacAddr) -> Option<DeliveryQueue> {
        match self.entries.entry(key) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_DEPTH);
                slot.insert(TableEntry { chaddr, tx });
                Some(DeliveryQueue {
                    key,
                    rx,
                    table: Arc::clone(self),
                })
            }
        }
    }

    /// Route one classified reply; false when no live session claims it
    ///
    /// A full queue still counts as routed: the reply is dropped rather
    /// than blocking the reader thread.
    pub fn dispatch(&self, key: TxKey, chaddr: Option<MacAddr>, frame: DeliveredFrame) -> bool {
        let Some(entry) = self.entries.get(&key) else {
            return false;
        };
        if let Some(chaddr) = chaddr {
            if entry.chaddr != chaddr {
                return false;
            }
        }
        match entry.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%key, "delivery queue full, reply dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn remove(&self, key: TxKey) {
        self.entries.remove(&key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receiving end of one registered transaction
///
/// Dropping it frees the key for reuse.
pub struct DeliveryQueue {
    key: TxKey,
    rx: mpsc::Receiver<DeliveredFrame>,
    table: Arc<DeliveryTable>,
}

impl DeliveryQueue {
    pub fn key(&self) -> TxKey {
        self.key
    }

    pub async fn recv(&mut self) -> Option<DeliveredFrame> {
        self.rx.recv().await
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        self.table.remove(self.key);
    }
}

/// Production [`FrameSink`] writing to the interface's raw channel
///
/// pnet senders want `&mut self`, so concurrent sessions serialize sends
/// through a mutex. A DHCP frame is small and the write does not block on
/// the peer, so the critical section stays short.
pub struct DatalinkSink {
    tx: Mutex<Box<dyn DataLinkSender>>,
}

impl FrameSink for DatalinkSink {
    fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let mut tx = self.tx.lock();
        match tx.send_to(frame, None) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(Error::Io(e)),
            None => Err(Error::transport("datalink sender refused the frame")),
        }
    }
}

/// The shared raw channel: a send half and a classifying reader thread
pub struct RawTransport {
    sink: Arc<DatalinkSink>,
    reader: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl RawTransport {
    /// Open the interface's raw ethernet channel and start the reader
    pub fn open(interface: &Interface, table: Arc<DeliveryTable>) -> Result<Self> {
        let pnet_interface = pnet_datalink::interfaces()
            .into_iter()
            .find(|candidate| candidate.name == interface.name)
            .ok_or_else(|| Error::InterfaceNotFound(interface.name.clone()))?;

        let config = Config {
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };
        let (tx, rx) = match pnet_datalink::channel(&pnet_interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(Error::transport("unsupported datalink channel type")),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(Error::InsufficientPrivileges(format!(
                    "opening a raw channel on {} requires CAP_NET_RAW or root",
                    interface.name
                )))
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let running = Arc::new(AtomicBool::new(true));
        let reader_running = Arc::clone(&running);
        let reader = thread::Builder::new()
            .name("dhcpswarm-rx".to_string())
            .spawn(move || reader_loop(rx, table, reader_running))
            .map_err(Error::Io)?;

        debug!(interface = %interface.name, "raw channel open");
        Ok(Self {
            sink: Arc::new(DatalinkSink { tx: Mutex::new(tx) }),
            reader: Some(reader),
            running,
        })
    }

    pub fn sink(&self) -> Arc<dyn FrameSink> {
        Arc::clone(&self.sink) as Arc<dyn FrameSink>
    }

    /// Stop the reader thread and wait for it
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                error!("reader thread panicked");
            }
        }
    }
}

impl Drop for RawTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reader_loop(
    mut rx: Box<dyn DataLinkReceiver>,
    table: Arc<DeliveryTable>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match rx.next() {
            Ok(frame) => {
                if let Some((key, chaddr, delivered)) = classify_frame(frame) {
                    if !table.dispatch(key, chaddr, delivered) {
                        trace!(%key, "reply matched no registered transaction");
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                error!("datalink read failed: {}", e);
                break;
            }
        }
    }
    debug!("reader thread finished");
}

/// Decide whether a captured frame is a DHCP reply worth routing
///
/// Cheap positional checks only; full packet validation happens in the
/// session that receives the payload.
fn classify_frame(frame: &[u8]) -> Option<(TxKey, Option<MacAddr>, DeliveredFrame)> {
    if frame.len() < EthernetFrame::HEADER_SIZE {
        return None;
    }
    let source_mac = MacAddr::from_slice(&frame[6..12])?;
    let ethertype = EtherType::from_u16(u16::from_be_bytes([frame[12], frame[13]]));
    let ip = &frame[EthernetFrame::HEADER_SIZE..];
    match ethertype {
        EtherType::IPv4 => classify_v4(ip, source_mac),
        EtherType::IPv6 => classify_v6(ip, source_mac),
        _ => None,
    }
}

fn classify_v4(ip: &[u8], source_mac: MacAddr) -> Option<(TxKey, Option<MacAddr>, DeliveredFrame)> {
    if ip.len() < Ipv4Packet::MIN_HEADER_SIZE || ip[0] >> 4 != 4 {
        return None;
    }
    let header_len = ((ip[0] & 0x0F) as usize) * 4;
    if header_len < Ipv4Packet::MIN_HEADER_SIZE
        || ip.len() < header_len + UdpDatagram::HEADER_SIZE
        || ip[9] != IpProtocol::Udp.to_u8()
    {
        return None;
    }
    let udp = &ip[header_len..];
    if u16::from_be_bytes([udp[2], udp[3]]) != DHCP_CLIENT_PORT {
        return None;
    }
    let payload = udp_payload(udp);
    // Fixed header plus magic cookie, and only server-to-client messages
    if payload.len() < DHCP_OPTIONS_OFFSET || payload[0] != BOOTREPLY {
        return None;
    }
    let xid = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let chaddr = MacAddr::from_slice(&payload[28..34])?;
    let source_ip = IpAddr::V4(Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]));
    Some((
        TxKey::V4(xid),
        Some(chaddr),
        DeliveredFrame {
            payload: payload.to_vec(),
            source_mac,
            source_ip,
        },
    ))
}

fn classify_v6(ip: &[u8], source_mac: MacAddr) -> Option<(TxKey, Option<MacAddr>, DeliveredFrame)> {
    if ip.len() < Ipv6Packet::HEADER_SIZE + UdpDatagram::HEADER_SIZE || ip[0] >> 4 != 6 {
        return None;
    }
    // Extension headers are not walked; DHCPv6 replies arrive as plain UDP
    if ip[6] != IpProtocol::Udp.to_u8() {
        return None;
    }
    let udp = &ip[Ipv6Packet::HEADER_SIZE..];
    if u16::from_be_bytes([udp[2], udp[3]]) != DHCPV6_CLIENT_PORT {
        return None;
    }
    let payload = udp_payload(udp);
    if payload.len() < 4 {
        return None;
    }
    let txid = [payload[1], payload[2], payload[3]];
    let mut src = [0u8; 16];
    src.copy_from_slice(&ip[8..24]);
    let source_ip = IpAddr::V6(Ipv6Addr::from(src));
    Some((
        TxKey::V6(txid),
        None,
        DeliveredFrame {
            payload: payload.to_vec(),
            source_mac,
            source_ip,
        },
    ))
}

/// Slice a UDP segment down to its payload, trusting the length field when
/// it is sane so ethernet padding does not leak into the DHCP message
fn udp_payload(udp: &[u8]) -> &[u8] {
    let claimed = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    let end = if (UdpDatagram::HEADER_SIZE..=udp.len()).contains(&claimed) {
        claimed
    } else {
        udp.len()
    };
    &udp[UdpDatagram::HEADER_SIZE..end]
}
