//! DHCPv6 packet parsing and building (RFC 8415)
//!
//! DHCPv6 messages are a single type byte and a 24-bit transaction id
//! followed by TLV options; all real content, including the leased
//! address and the delegated prefix, lives in (possibly nested)
//! options.

use dhcpswarm_core::{Error, MacAddr, Result};
use std::net::Ipv6Addr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DHCPV6_CLIENT_PORT: u16 = 546;
pub const DHCPV6_SERVER_PORT: u16 = 547;

/// All_DHCP_Relay_Agents_and_Servers multicast address (ff02::1:2)
pub const DHCPV6_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0x0001, 0x0002);

/// Ethernet destination for the DHCPv6 multicast group
pub const DHCPV6_MULTICAST_MAC: MacAddr = MacAddr::new([0x33, 0x33, 0x00, 0x01, 0x00, 0x02]);

/// Seconds between the Unix epoch and the DUID time epoch (2000-01-01)
const DUID_TIME_EPOCH: u64 = 946_684_800;

/// DHCPv6 Message Types (RFC 8415)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Dhcpv6MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
    RelayForw = 12,
    RelayRepl = 13,
}

impl Dhcpv6MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Solicit),
            2 => Some(Self::Advertise),
            3 => Some(Self::Request),
            4 => Some(Self::Confirm),
            5 => Some(Self::Renew),
            6 => Some(Self::Rebind),
            7 => Some(Self::Reply),
            8 => Some(Self::Release),
            9 => Some(Self::Decline),
            10 => Some(Self::Reconfigure),
            11 => Some(Self::InformationRequest),
            12 => Some(Self::RelayForw),
            13 => Some(Self::RelayRepl),
            _ => None,
        }
    }
}

/// DHCPv6 Option Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Dhcpv6OptionType {
    ClientId = 1,
    ServerId = 2,
    IaNa = 3,   // Identity Association for Non-temporary Addresses
    IaAddr = 5, // IA Address
    Oro = 6,    // Option Request Option
    Preference = 7,
    ElapsedTime = 8,
    StatusCode = 13,
    RapidCommit = 14,
    DnsServers = 23,
    DomainList = 24,
    IaPd = 25, // Identity Association for Prefix Delegation
    IaPrefix = 26,
}

impl Dhcpv6OptionType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ClientId),
            2 => Some(Self::ServerId),
            3 => Some(Self::IaNa),
            5 => Some(Self::IaAddr),
            6 => Some(Self::Oro),
            7 => Some(Self::Preference),
            8 => Some(Self::ElapsedTime),
            13 => Some(Self::StatusCode),
            14 => Some(Self::RapidCommit),
            23 => Some(Self::DnsServers),
            24 => Some(Self::DomainList),
            25 => Some(Self::IaPd),
            26 => Some(Self::IaPrefix),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Human-readable name for an RFC 8415 status code
pub fn status_code_name(code: u16) -> &'static str {
    match code {
        0 => "Success",
        1 => "UnspecFail",
        2 => "NoAddrsAvail",
        3 => "NoBinding",
        4 => "NotOnLink",
        5 => "UseMulticast",
        6 => "NoPrefixAvail",
        _ => "Unknown",
    }
}

/// DHCPv6 Option
///
/// The code is kept raw so options this crate does not model still
/// round-trip through parsing; [`Dhcpv6Option::option_type`] classifies
/// the known ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dhcpv6Option {
    pub code: u16,
    pub data: Vec<u8>,
}

impl Dhcpv6Option {
    pub fn new(option_type: Dhcpv6OptionType, data: Vec<u8>) -> Self {
        Self {
            code: option_type.as_u16(),
            data,
        }
    }

    /// Client Identifier (DUID)
    pub fn client_id(duid: &[u8]) -> Self {
        Self::new(Dhcpv6OptionType::ClientId, duid.to_vec())
    }

    /// Server Identifier (DUID)
    pub fn server_id(duid: &[u8]) -> Self {
        Self::new(Dhcpv6OptionType::ServerId, duid.to_vec())
    }

    /// Elapsed Time (in 1/100ths of a second)
    pub fn elapsed_time(time_cs: u16) -> Self {
        Self::new(Dhcpv6OptionType::ElapsedTime, time_cs.to_be_bytes().to_vec())
    }

    /// Option Request Option (ORO)
    pub fn oro(requested: &[Dhcpv6OptionType]) -> Self {
        let mut data = Vec::with_capacity(requested.len() * 2);
        for opt_type in requested {
            data.extend_from_slice(&opt_type.as_u16().to_be_bytes());
        }
        Self::new(Dhcpv6OptionType::Oro, data)
    }

    /// IA_NA (Identity Association for Non-temporary Addresses)
    pub fn ia_na(iaid: u32, t1: u32, t2: u32, sub_options: &[Dhcpv6Option]) -> Self {
        Self::new(Dhcpv6OptionType::IaNa, ia_body(iaid, t1, t2, sub_options))
    }

    /// IA_PD (Identity Association for Prefix Delegation)
    pub fn ia_pd(iaid: u32, t1: u32, t2: u32, sub_options: &[Dhcpv6Option]) -> Self {
        Self::new(Dhcpv6OptionType::IaPd, ia_body(iaid, t1, t2, sub_options))
    }

    /// IA Address (nested inside IA_NA)
    pub fn ia_addr(addr: Ipv6Addr, preferred_lifetime: u32, valid_lifetime: u32) -> Self {
        let mut data = Vec::with_capacity(24);
        data.extend_from_slice(&addr.octets());
        data.extend_from_slice(&preferred_lifetime.to_be_bytes());
        data.extend_from_slice(&valid_lifetime.to_be_bytes());
        Self::new(Dhcpv6OptionType::IaAddr, data)
    }

    /// IA Prefix (nested inside IA_PD)
    pub fn ia_prefix(
        prefix: Ipv6Addr,
        prefix_length: u8,
        preferred_lifetime: u32,
        valid_lifetime: u32,
    ) -> Self {
        let mut data = Vec::with_capacity(25);
        data.extend_from_slice(&preferred_lifetime.to_be_bytes());
        data.extend_from_slice(&valid_lifetime.to_be_bytes());
        data.push(prefix_length);
        data.extend_from_slice(&prefix.octets());
        Self::new(Dhcpv6OptionType::IaPrefix, data)
    }

    /// Status Code with message text
    pub fn status_code(code: u16, message: &str) -> Self {
        let mut data = Vec::with_capacity(2 + message.len());
        data.extend_from_slice(&code.to_be_bytes());
        data.extend_from_slice(message.as_bytes());
        Self::new(Dhcpv6OptionType::StatusCode, data)
    }

    /// Classify the option code, if this crate knows it
    pub fn option_type(&self) -> Option<Dhcpv6OptionType> {
        Dhcpv6OptionType::from_u16(self.code)
    }

    /// Encode option to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.data.len());
        bytes.extend_from_slice(&self.code.to_be_bytes());
        bytes.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Parse one option from the front of `data`, returning it and the
    /// number of bytes consumed
    pub fn from_bytes(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < 4 {
            return None;
        }

        let code = u16::from_be_bytes([data[0], data[1]]);
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;

        if data.len() < 4 + length {
            return None;
        }

        Some((
            Self {
                code,
                data: data[4..4 + length].to_vec(),
            },
            4 + length,
        ))
    }
}

/// IA option body: IAID, T1, T2, then nested options
fn ia_body(iaid: u32, t1: u32, t2: u32, sub_options: &[Dhcpv6Option]) -> Vec<u8> {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&iaid.to_be_bytes());
    data.extend_from_slice(&t1.to_be_bytes());
    data.extend_from_slice(&t2.to_be_bytes());
    for opt in sub_options {
        data.extend_from_slice(&opt.to_bytes());
    }
    data
}

/// Walk a byte range as TLV options, stopping at the first malformed one
fn scan_options(mut data: &[u8]) -> Vec<Dhcpv6Option> {
    let mut options = Vec::new();
    while let Some((option, consumed)) = Dhcpv6Option::from_bytes(data) {
        options.push(option);
        data = &data[consumed..];
    }
    options
}

/// An address granted inside an IA_NA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IaAddress {
    pub address: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

/// A prefix granted inside an IA_PD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegatedPrefix {
    pub prefix: Ipv6Addr,
    pub prefix_length: u8,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

/// DHCPv6 Packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dhcpv6Packet {
    /// Message type
    pub msg_type: Dhcpv6MessageType,
    /// Transaction ID (24 bits)
    pub transaction_id: [u8; 3],
    /// Options
    pub options: Vec<Dhcpv6Option>,
}

impl Dhcpv6Packet {
    pub fn new(msg_type: Dhcpv6MessageType, transaction_id: [u8; 3]) -> Self {
        Self {
            msg_type,
            transaction_id,
            options: vec![],
        }
    }

    pub fn add_option(mut self, option: Dhcpv6Option) -> Self {
        self.options.push(option);
        self
    }

    /// Create a SOLICIT message skeleton; the caller appends IA options
    pub fn solicit(transaction_id: [u8; 3], client_duid: &[u8], elapsed_cs: u16) -> Self {
        Self::new(Dhcpv6MessageType::Solicit, transaction_id)
            .add_option(Dhcpv6Option::client_id(client_duid))
            .add_option(Dhcpv6Option::elapsed_time(elapsed_cs))
            .add_option(Dhcpv6Option::oro(&[
                Dhcpv6OptionType::DnsServers,
                Dhcpv6OptionType::DomainList,
            ]))
    }

    /// Create a REQUEST message skeleton addressed at one server
    pub fn request(
        transaction_id: [u8; 3],
        client_duid: &[u8],
        server_duid: &[u8],
        elapsed_cs: u16,
    ) -> Self {
        Self::new(Dhcpv6MessageType::Request, transaction_id)
            .add_option(Dhcpv6Option::client_id(client_duid))
            .add_option(Dhcpv6Option::server_id(server_duid))
            .add_option(Dhcpv6Option::elapsed_time(elapsed_cs))
    }

    /// Create a RELEASE message skeleton; the caller appends the bound IAs
    pub fn release(transaction_id: [u8; 3], client_duid: &[u8], server_duid: &[u8]) -> Self {
        Self::new(Dhcpv6MessageType::Release, transaction_id)
            .add_option(Dhcpv6Option::client_id(client_duid))
            .add_option(Dhcpv6Option::server_id(server_duid))
            .add_option(Dhcpv6Option::elapsed_time(0))
    }

    /// Encode packet to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        // Message type (1 byte) + Transaction ID (3 bytes)
        bytes.push(self.msg_type as u8);
        bytes.extend_from_slice(&self.transaction_id);

        for option in &self.options {
            bytes.extend_from_slice(&option.to_bytes());
        }

        bytes
    }

    /// Parse a packet from bytes
    ///
    /// Top-level option framing is strict: a truncated option rejects
    /// the whole packet rather than yielding a partial view of it.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::malformed(format!(
                "DHCPv6 packet too short: {} bytes",
                data.len()
            )));
        }

        let msg_type = Dhcpv6MessageType::from_u8(data[0])
            .ok_or_else(|| Error::malformed(format!("unknown DHCPv6 message type {}", data[0])))?;
        let transaction_id = [data[1], data[2], data[3]];

        let mut options = vec![];
        let mut offset = 4;

        while offset < data.len() {
            let (option, consumed) = Dhcpv6Option::from_bytes(&data[offset..])
                .ok_or_else(|| Error::malformed("truncated DHCPv6 option"))?;
            options.push(option);
            offset += consumed;
        }

        Ok(Self {
            msg_type,
            transaction_id,
            options,
        })
    }

    /// Find the first option with the given type
    pub fn option(&self, option_type: Dhcpv6OptionType) -> Option<&Dhcpv6Option> {
        self.options
            .iter()
            .find(|opt| opt.code == option_type.as_u16())
    }

    /// Client DUID, if present
    pub fn client_duid(&self) -> Option<&[u8]> {
        self.option(Dhcpv6OptionType::ClientId)
            .map(|opt| opt.data.as_slice())
    }

    /// Server DUID, if present
    pub fn server_duid(&self) -> Option<&[u8]> {
        self.option(Dhcpv6OptionType::ServerId)
            .map(|opt| opt.data.as_slice())
    }

    /// First status code in the message, searching the top level and
    /// then inside IA_NA and IA_PD options
    pub fn status_code(&self) -> Option<(u16, String)> {
        if let Some(status) = self.option(Dhcpv6OptionType::StatusCode).and_then(decode_status) {
            return Some(status);
        }

        for ia_type in [Dhcpv6OptionType::IaNa, Dhcpv6OptionType::IaPd] {
            let nested = self
                .option(ia_type)
                .filter(|opt| opt.data.len() >= 12)
                .map(|opt| scan_options(&opt.data[12..]))
                .unwrap_or_default();

            for sub in &nested {
                if sub.code == Dhcpv6OptionType::StatusCode.as_u16() {
                    if let Some(status) = decode_status(sub) {
                        return Some(status);
                    }
                }
            }
        }

        None
    }

    /// The address granted in the first IA_NA, if any
    pub fn ia_na_address(&self) -> Option<IaAddress> {
        let ia = self.option(Dhcpv6OptionType::IaNa)?;
        if ia.data.len() < 12 {
            return None;
        }

        scan_options(&ia.data[12..]).into_iter().find_map(|sub| {
            if sub.code != Dhcpv6OptionType::IaAddr.as_u16() || sub.data.len() < 24 {
                return None;
            }

            let mut addr = [0u8; 16];
            addr.copy_from_slice(&sub.data[..16]);
            Some(IaAddress {
                address: Ipv6Addr::from(addr),
                preferred_lifetime: u32::from_be_bytes([
                    sub.data[16],
                    sub.data[17],
                    sub.data[18],
                    sub.data[19],
                ]),
                valid_lifetime: u32::from_be_bytes([
                    sub.data[20],
                    sub.data[21],
                    sub.data[22],
                    sub.data[23],
                ]),
            })
        })
    }

    /// The prefix granted in the first IA_PD, if any
    pub fn ia_pd_prefix(&self) -> Option<DelegatedPrefix> {
        let ia = self.option(Dhcpv6OptionType::IaPd)?;
        if ia.data.len() < 12 {
            return None;
        }

        scan_options(&ia.data[12..]).into_iter().find_map(|sub| {
            if sub.code != Dhcpv6OptionType::IaPrefix.as_u16() || sub.data.len() < 25 {
                return None;
            }

            let mut prefix = [0u8; 16];
            prefix.copy_from_slice(&sub.data[9..25]);
            Some(DelegatedPrefix {
                prefix: Ipv6Addr::from(prefix),
                prefix_length: sub.data[8],
                preferred_lifetime: u32::from_be_bytes([
                    sub.data[0],
                    sub.data[1],
                    sub.data[2],
                    sub.data[3],
                ]),
                valid_lifetime: u32::from_be_bytes([
                    sub.data[4],
                    sub.data[5],
                    sub.data[6],
                    sub.data[7],
                ]),
            })
        })
    }

    /// Generate a random transaction ID
    pub fn random_transaction_id() -> [u8; 3] {
        [rand::random(), rand::random(), rand::random()]
    }

    /// Generate a DUID-LLT (link-layer address plus time) for a MAC
    pub fn generate_duid_llt(mac: MacAddr) -> Vec<u8> {
        let mut duid = Vec::with_capacity(14);
        duid.extend_from_slice(&1u16.to_be_bytes()); // DUID type: LLT
        duid.extend_from_slice(&1u16.to_be_bytes()); // Hardware type: Ethernet

        // Seconds since midnight (UTC), January 1, 2000
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        duid.extend_from_slice(&((now.saturating_sub(DUID_TIME_EPOCH)) as u32).to_be_bytes());

        duid.extend_from_slice(mac.as_bytes());
        duid
    }
}

fn decode_status(option: &Dhcpv6Option) -> Option<(u16, String)> {
    if option.data.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([option.data[0], option.data[1]]);
    let message = String::from_utf8_lossy(&option.data[2..]).to_string();
    Some((code, message))
}

/// Derive the EUI-64 link-local address for a MAC (RFC 4291)
///
/// The interface identifier is the MAC with the universal/local bit
/// flipped and 0xfffe spliced into the middle.
pub fn eui64_link_local(mac: MacAddr) -> Ipv6Addr {
    let m = mac.octets();
    let mut octets = [0u8; 16];
    octets[0] = 0xfe;
    octets[1] = 0x80;
    octets[8] = m[0] ^ 0x02;
    octets[9] = m[1];
    octets[10] = m[2];
    octets[11] = 0xff;
    octets[12] = 0xfe;
    octets[13] = m[3];
    octets[14] = m[4];
    octets[15] = m[5];
    Ipv6Addr::from(octets)
}
