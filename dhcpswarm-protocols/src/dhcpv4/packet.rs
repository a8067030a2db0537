//! DHCPv4 packet parsing and building
//!
//! This module implements DHCPv4 message construction and parsing
//! according to RFC 2131 and RFC 2132: the 236-byte fixed header, the
//! magic cookie and the TLV option area holding the actual message
//! semantics.

use dhcpswarm_core::{Error, MacAddr, Result};
use std::fmt;
use std::net::Ipv4Addr;

/// DHCP magic cookie value (0x63825363)
pub const DHCP_MAGIC_COOKIE: u32 = 0x63825363;

/// DHCP server port
pub const DHCP_SERVER_PORT: u16 = 67;

/// DHCP client port
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Broadcast flag value
pub const DHCP_BROADCAST_FLAG: u16 = 0x8000;

/// BOOTREQUEST opcode
pub const BOOTREQUEST: u8 = 1;

/// BOOTREPLY opcode
pub const BOOTREPLY: u8 = 2;

/// Ethernet hardware type
pub const HTYPE_ETHERNET: u8 = 1;

/// Ethernet hardware address length
pub const HLEN_ETHERNET: u8 = 6;

/// Offset of the options area (fixed header + magic cookie)
pub const DHCP_OPTIONS_OFFSET: usize = 240;

/// DHCP Message Types (RFC 2132)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DhcpMessageType::Discover),
            2 => Some(DhcpMessageType::Offer),
            3 => Some(DhcpMessageType::Request),
            4 => Some(DhcpMessageType::Decline),
            5 => Some(DhcpMessageType::Ack),
            6 => Some(DhcpMessageType::Nak),
            7 => Some(DhcpMessageType::Release),
            8 => Some(DhcpMessageType::Inform),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DhcpMessageType::Discover => "DISCOVER",
            DhcpMessageType::Offer => "OFFER",
            DhcpMessageType::Request => "REQUEST",
            DhcpMessageType::Decline => "DECLINE",
            DhcpMessageType::Ack => "ACK",
            DhcpMessageType::Nak => "NAK",
            DhcpMessageType::Release => "RELEASE",
            DhcpMessageType::Inform => "INFORM",
        }
    }
}

impl fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// DHCP Option
///
/// Only the options the simulator sends or inspects get typed variants;
/// anything else is preserved as `Unknown` so a parse-build cycle does
/// not lose data.
#[derive(Debug, Clone, PartialEq)]
pub enum DhcpOption {
    SubnetMask(Ipv4Addr),
    Router(Vec<Ipv4Addr>),
    DnsServer(Vec<Ipv4Addr>),
    DomainName(String),
    RequestedIpAddress(Ipv4Addr),
    LeaseTime(u32),
    MessageType(DhcpMessageType),
    ServerId(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    Message(String),
    RenewalTime(u32),
    RebindingTime(u32),
    ClientIdentifier(Vec<u8>),
    Unknown(u8, Vec<u8>),
}

fn parse_addr_list(data: &[u8]) -> Option<Vec<Ipv4Addr>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return None;
    }
    Some(
        data.chunks(4)
            .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
            .collect(),
    )
}

fn parse_u32(data: &[u8]) -> Option<u32> {
    if data.len() != 4 {
        return None;
    }
    Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

impl DhcpOption {
    /// Parse a DHCP option from its code and value bytes
    ///
    /// A value that does not match the expected shape for its code is
    /// kept as `Unknown` rather than rejected; servers in the wild are
    /// not always tidy.
    pub fn parse(code: u8, data: &[u8]) -> Self {
        let unknown = || DhcpOption::Unknown(code, data.to_vec());

        match code {
            1 => parse_u32(data)
                .map(|mask| DhcpOption::SubnetMask(Ipv4Addr::from(mask)))
                .unwrap_or_else(unknown),
            3 => parse_addr_list(data)
                .map(DhcpOption::Router)
                .unwrap_or_else(unknown),
            6 => parse_addr_list(data)
                .map(DhcpOption::DnsServer)
                .unwrap_or_else(unknown),
            15 => DhcpOption::DomainName(String::from_utf8_lossy(data).to_string()),
            50 => parse_u32(data)
                .map(|addr| DhcpOption::RequestedIpAddress(Ipv4Addr::from(addr)))
                .unwrap_or_else(unknown),
            51 => parse_u32(data)
                .map(DhcpOption::LeaseTime)
                .unwrap_or_else(unknown),
            53 => {
                if data.len() == 1 {
                    DhcpMessageType::from_u8(data[0])
                        .map(DhcpOption::MessageType)
                        .unwrap_or_else(unknown)
                } else {
                    unknown()
                }
            }
            54 => parse_u32(data)
                .map(|addr| DhcpOption::ServerId(Ipv4Addr::from(addr)))
                .unwrap_or_else(unknown),
            55 => DhcpOption::ParameterRequestList(data.to_vec()),
            56 => DhcpOption::Message(String::from_utf8_lossy(data).to_string()),
            58 => parse_u32(data)
                .map(DhcpOption::RenewalTime)
                .unwrap_or_else(unknown),
            59 => parse_u32(data)
                .map(DhcpOption::RebindingTime)
                .unwrap_or_else(unknown),
            61 => DhcpOption::ClientIdentifier(data.to_vec()),
            _ => unknown(),
        }
    }

    /// Build a DHCP option into bytes (code, length, value)
    pub fn build(&self) -> Vec<u8> {
        match self {
            DhcpOption::SubnetMask(addr) => {
                let mut bytes = vec![1, 4];
                bytes.extend_from_slice(&addr.octets());
                bytes
            }
            DhcpOption::Router(addrs) => {
                let mut bytes = vec![3, (addrs.len() * 4) as u8];
                for addr in addrs {
                    bytes.extend_from_slice(&addr.octets());
                }
                bytes
            }
            DhcpOption::DnsServer(addrs) => {
                let mut bytes = vec![6, (addrs.len() * 4) as u8];
                for addr in addrs {
                    bytes.extend_from_slice(&addr.octets());
                }
                bytes
            }
            DhcpOption::DomainName(name) => {
                let mut bytes = vec![15, name.len() as u8];
                bytes.extend_from_slice(name.as_bytes());
                bytes
            }
            DhcpOption::RequestedIpAddress(addr) => {
                let mut bytes = vec![50, 4];
                bytes.extend_from_slice(&addr.octets());
                bytes
            }
            DhcpOption::LeaseTime(time) => {
                let mut bytes = vec![51, 4];
                bytes.extend_from_slice(&time.to_be_bytes());
                bytes
            }
            DhcpOption::MessageType(msg_type) => vec![53, 1, *msg_type as u8],
            DhcpOption::ServerId(addr) => {
                let mut bytes = vec![54, 4];
                bytes.extend_from_slice(&addr.octets());
                bytes
            }
            DhcpOption::ParameterRequestList(params) => {
                let mut bytes = vec![55, params.len() as u8];
                bytes.extend_from_slice(params);
                bytes
            }
            DhcpOption::Message(msg) => {
                let mut bytes = vec![56, msg.len() as u8];
                bytes.extend_from_slice(msg.as_bytes());
                bytes
            }
            DhcpOption::RenewalTime(time) => {
                let mut bytes = vec![58, 4];
                bytes.extend_from_slice(&time.to_be_bytes());
                bytes
            }
            DhcpOption::RebindingTime(time) => {
                let mut bytes = vec![59, 4];
                bytes.extend_from_slice(&time.to_be_bytes());
                bytes
            }
            DhcpOption::ClientIdentifier(id) => {
                let mut bytes = vec![61, id.len() as u8];
                bytes.extend_from_slice(id);
                bytes
            }
            DhcpOption::Unknown(code, data) => {
                let mut bytes = vec![*code, data.len() as u8];
                bytes.extend_from_slice(data);
                bytes
            }
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DhcpOption::SubnetMask(_) => 1,
            DhcpOption::Router(_) => 3,
            DhcpOption::DnsServer(_) => 6,
            DhcpOption::DomainName(_) => 15,
            DhcpOption::RequestedIpAddress(_) => 50,
            DhcpOption::LeaseTime(_) => 51,
            DhcpOption::MessageType(_) => 53,
            DhcpOption::ServerId(_) => 54,
            DhcpOption::ParameterRequestList(_) => 55,
            DhcpOption::Message(_) => 56,
            DhcpOption::RenewalTime(_) => 58,
            DhcpOption::RebindingTime(_) => 59,
            DhcpOption::ClientIdentifier(_) => 61,
            DhcpOption::Unknown(code, _) => *code,
        }
    }
}

/// Client identifier option value: hardware type followed by the MAC
fn client_identifier(mac: MacAddr) -> Vec<u8> {
    let mut id = Vec::with_capacity(7);
    id.push(HTYPE_ETHERNET);
    id.extend_from_slice(mac.as_bytes());
    id
}

/// The parameter request list sent with DISCOVER and REQUEST:
/// subnet mask, router, DNS server, domain name
const PARAMETER_REQUEST: [u8; 4] = [1, 3, 6, 15];

/// DHCP Packet structure (RFC 2131)
#[derive(Debug, Clone, PartialEq)]
pub struct DhcpPacket {
    /// Message op code (1 = BOOTREQUEST, 2 = BOOTREPLY)
    pub op: u8,
    /// Hardware address type (1 = Ethernet)
    pub htype: u8,
    /// Hardware address length (6 for Ethernet)
    pub hlen: u8,
    /// Hops
    pub hops: u8,
    /// Transaction ID
    pub xid: u32,
    /// Seconds elapsed since client began address acquisition
    pub secs: u16,
    /// Flags (broadcast bit)
    pub flags: u16,
    /// Client IP address (if known)
    pub ciaddr: Ipv4Addr,
    /// Your (client) IP address
    pub yiaddr: Ipv4Addr,
    /// Server IP address
    pub siaddr: Ipv4Addr,
    /// Gateway IP address
    pub giaddr: Ipv4Addr,
    /// Client hardware address (first 6 of the 16-byte wire field)
    pub chaddr: MacAddr,
    /// Server host name (64 bytes)
    pub sname: [u8; 64],
    /// Boot file name (128 bytes)
    pub file: [u8; 128],
    /// DHCP options, without Pad and End
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    /// Create a new DHCP packet with default values
    pub fn new() -> Self {
        Self {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: MacAddr::zero(),
            sname: [0; 64],
            file: [0; 128],
            options: Vec::new(),
        }
    }

    /// Create a DHCP DISCOVER packet
    pub fn new_discover(xid: u32, chaddr: MacAddr) -> Self {
        let mut packet = Self::new();
        packet.xid = xid;
        packet.flags = DHCP_BROADCAST_FLAG;
        packet.chaddr = chaddr;
        packet.options = vec![
            DhcpOption::MessageType(DhcpMessageType::Discover),
            DhcpOption::ClientIdentifier(client_identifier(chaddr)),
            DhcpOption::ParameterRequestList(PARAMETER_REQUEST.to_vec()),
        ];
        packet
    }

    /// Create a DHCP REQUEST packet for the SELECTING state
    pub fn new_request(
        xid: u32,
        chaddr: MacAddr,
        requested_ip: Ipv4Addr,
        server_id: Ipv4Addr,
    ) -> Self {
        let mut packet = Self::new();
        packet.xid = xid;
        packet.flags = DHCP_BROADCAST_FLAG;
        packet.chaddr = chaddr;
        packet.options = vec![
            DhcpOption::MessageType(DhcpMessageType::Request),
            DhcpOption::ClientIdentifier(client_identifier(chaddr)),
            DhcpOption::RequestedIpAddress(requested_ip),
            DhcpOption::ServerId(server_id),
            DhcpOption::ParameterRequestList(PARAMETER_REQUEST.to_vec()),
        ];
        packet
    }

    /// Create a DHCP RELEASE packet
    ///
    /// RELEASE is sent from a bound client, so `ciaddr` carries the
    /// leased address and the broadcast flag stays clear.
    pub fn new_release(
        xid: u32,
        chaddr: MacAddr,
        client_ip: Ipv4Addr,
        server_id: Ipv4Addr,
    ) -> Self {
        let mut packet = Self::new();
        packet.xid = xid;
        packet.ciaddr = client_ip;
        packet.chaddr = chaddr;
        packet.options = vec![
            DhcpOption::MessageType(DhcpMessageType::Release),
            DhcpOption::ClientIdentifier(client_identifier(chaddr)),
            DhcpOption::ServerId(server_id),
        ];
        packet
    }

    /// Parse a DHCP packet from bytes
    ///
    /// Rejects anything without the full fixed header, the magic cookie
    /// or well-formed option framing. Option values that fail typed
    /// decoding survive as `Unknown`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < DHCP_OPTIONS_OFFSET {
            return Err(Error::malformed(format!(
                "DHCP packet too short: {} bytes (minimum {})",
                data.len(),
                DHCP_OPTIONS_OFFSET
            )));
        }

        let cookie = u32::from_be_bytes([data[236], data[237], data[238], data[239]]);
        if cookie != DHCP_MAGIC_COOKIE {
            return Err(Error::malformed(format!(
                "bad DHCP magic cookie: {cookie:#010x}"
            )));
        }

        let mut chaddr = [0u8; 6];
        chaddr.copy_from_slice(&data[28..34]);

        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);

        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        let mut options = Vec::new();
        let mut offset = DHCP_OPTIONS_OFFSET;

        while offset < data.len() {
            let code = data[offset];
            offset += 1;

            if code == 0 {
                // Pad
                continue;
            }
            if code == 255 {
                // End
                break;
            }

            if offset >= data.len() {
                return Err(Error::malformed(format!(
                    "DHCP option {code} truncated before length byte"
                )));
            }

            let length = data[offset] as usize;
            offset += 1;

            if offset + length > data.len() {
                return Err(Error::malformed(format!(
                    "DHCP option {code} length {length} exceeds packet size"
                )));
            }

            options.push(DhcpOption::parse(code, &data[offset..offset + length]));
            offset += length;
        }

        Ok(Self {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr: MacAddr::new(chaddr),
            sname,
            file,
            options,
        })
    }

    /// Build a DHCP packet into bytes
    pub fn build(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(576); // Minimum DHCP packet size

        // Fixed header (236 bytes)
        bytes.push(self.op);
        bytes.push(self.htype);
        bytes.push(self.hlen);
        bytes.push(self.hops);

        bytes.extend_from_slice(&self.xid.to_be_bytes());
        bytes.extend_from_slice(&self.secs.to_be_bytes());
        bytes.extend_from_slice(&self.flags.to_be_bytes());

        bytes.extend_from_slice(&self.ciaddr.octets());
        bytes.extend_from_slice(&self.yiaddr.octets());
        bytes.extend_from_slice(&self.siaddr.octets());
        bytes.extend_from_slice(&self.giaddr.octets());

        // chaddr is 16 bytes on the wire, MAC plus zero padding
        bytes.extend_from_slice(self.chaddr.as_bytes());
        bytes.extend_from_slice(&[0u8; 10]);

        bytes.extend_from_slice(&self.sname);
        bytes.extend_from_slice(&self.file);

        bytes.extend_from_slice(&DHCP_MAGIC_COOKIE.to_be_bytes());

        for option in &self.options {
            bytes.extend_from_slice(&option.build());
        }
        bytes.push(255); // End option

        bytes
    }

    /// Get the message type from options
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::MessageType(msg_type) = opt {
                Some(*msg_type)
            } else {
                None
            }
        })
    }

    /// Get server ID from options
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::ServerId(addr) = opt {
                Some(*addr)
            } else {
                None
            }
        })
    }

    /// Get requested IP from options
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::RequestedIpAddress(addr) = opt {
                Some(*addr)
            } else {
                None
            }
        })
    }

    /// Get lease time from options
    pub fn lease_time(&self) -> Option<u32> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::LeaseTime(time) = opt {
                Some(*time)
            } else {
                None
            }
        })
    }

    /// Get the free-form server message, carried on NAKs by some servers
    pub fn message(&self) -> Option<&str> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::Message(msg) = opt {
                Some(msg.as_str())
            } else {
                None
            }
        })
    }

    /// Get client MAC address
    pub fn client_mac(&self) -> MacAddr {
        self.chaddr
    }
}

impl Default for DhcpPacket {
    fn default() -> Self {
        Self::new()
    }
}
