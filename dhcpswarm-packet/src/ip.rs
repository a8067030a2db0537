//! IPv4 and IPv6 header construction and parsing
//!
//! DHCP frames are built from scratch, so both IP versions are assembled
//! here: IPv4 with its RFC 1071 header checksum, IPv6 with the fixed
//! 40-byte header (no extension-header support; DHCP never needs one).

use crate::checksum::internet_checksum;
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    /// UDP (17)
    Udp,
    /// Custom protocol number
    Custom(u8),
}

impl IpProtocol {
    pub fn to_u8(self) -> u8 {
        match self {
            IpProtocol::Udp => 17,
            IpProtocol::Custom(val) => val,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            17 => IpProtocol::Udp,
            val => IpProtocol::Custom(val),
        }
    }
}

/// IPv4 packet
#[derive(Debug, Clone)]
pub struct Ipv4Packet {
    /// Internet Header Length in 32-bit words (5 without options)
    pub ihl: u8,
    /// Type of Service / DSCP
    pub tos: u8,
    /// Total length (header + data) in bytes
    pub total_length: u16,
    /// Identification
    pub identification: u16,
    /// Flags (3-bit value; bit 1 is Don't Fragment)
    pub flags: u8,
    /// Fragment offset (in 8-byte blocks)
    pub fragment_offset: u16,
    /// Time to Live
    pub ttl: u8,
    /// Protocol
    pub protocol: IpProtocol,
    /// Header checksum
    pub checksum: u16,
    /// Source IP address
    pub source: Ipv4Addr,
    /// Destination IP address
    pub destination: Ipv4Addr,
    /// Payload data
    pub payload: Vec<u8>,
}

impl Ipv4Packet {
    /// Header size without options
    pub const MIN_HEADER_SIZE: usize = 20;

    /// Don't Fragment flag bit
    pub const FLAG_DONT_FRAGMENT: u8 = 0b010;

    /// Create a new IPv4 packet with default header values
    pub fn new(
        source: Ipv4Addr,
        destination: Ipv4Addr,
        protocol: IpProtocol,
        payload: Vec<u8>,
    ) -> Self {
        let total_length = (Self::MIN_HEADER_SIZE + payload.len()) as u16;

        Ipv4Packet {
            ihl: 5,
            tos: 0,
            total_length,
            identification: 0,
            flags: Self::FLAG_DONT_FRAGMENT,
            fragment_offset: 0,
            ttl: 64,
            protocol,
            checksum: 0,
            source,
            destination,
            payload,
        }
    }

    /// Set the Time to Live
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the identification field
    pub fn with_identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    /// Calculate and update the header checksum
    pub fn calculate_checksum(&mut self) {
        self.checksum = 0;
        let header = self.build_header();
        self.checksum = internet_checksum(&header);
    }

    /// Build header bytes with the current checksum field
    fn build_header(&self) -> Vec<u8> {
        let mut buffer = BytesMut::with_capacity(Self::MIN_HEADER_SIZE);

        buffer.put_u8((4 << 4) | (self.ihl & 0x0F));
        buffer.put_u8(self.tos);
        buffer.put_u16(self.total_length);
        buffer.put_u16(self.identification);
        buffer.put_u16(((self.flags as u16) << 13) | (self.fragment_offset & 0x1FFF));
        buffer.put_u8(self.ttl);
        buffer.put_u8(self.protocol.to_u8());
        buffer.put_u16(self.checksum);
        buffer.put_slice(&self.source.octets());
        buffer.put_slice(&self.destination.octets());

        buffer.to_vec()
    }

    /// Convert the packet to bytes, computing the header checksum
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut packet = self.clone();
        packet.calculate_checksum();

        let mut buffer = BytesMut::with_capacity(packet.total_length as usize);
        buffer.put_slice(&packet.build_header());
        buffer.put_slice(&packet.payload);
        buffer.to_vec()
    }

    /// Parse an IPv4 packet from bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_HEADER_SIZE {
            return None;
        }

        let version = data[0] >> 4;
        if version != 4 {
            return None;
        }

        let ihl = data[0] & 0x0F;
        let header_len = (ihl as usize) * 4;
        if header_len < Self::MIN_HEADER_SIZE || data.len() < header_len {
            return None;
        }

        let flags_and_offset = u16::from_be_bytes([data[6], data[7]]);

        Some(Ipv4Packet {
            ihl,
            tos: data[1],
            total_length: u16::from_be_bytes([data[2], data[3]]),
            identification: u16::from_be_bytes([data[4], data[5]]),
            flags: (flags_and_offset >> 13) as u8,
            fragment_offset: flags_and_offset & 0x1FFF,
            ttl: data[8],
            protocol: IpProtocol::from_u8(data[9]),
            checksum: u16::from_be_bytes([data[10], data[11]]),
            source: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            destination: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            payload: data[header_len..].to_vec(),
        })
    }
}

/// IPv6 packet (fixed header only)
#[derive(Debug, Clone)]
pub struct Ipv6Packet {
    /// Traffic class
    pub traffic_class: u8,
    /// Flow label (20 bits)
    pub flow_label: u32,
    /// Payload length in bytes
    pub payload_length: u16,
    /// Next header
    pub next_header: IpProtocol,
    /// Hop limit
    pub hop_limit: u8,
    /// Source address
    pub source: Ipv6Addr,
    /// Destination address
    pub destination: Ipv6Addr,
    /// Payload data
    pub payload: Vec<u8>,
}

impl Ipv6Packet {
    /// The fixed IPv6 header size
    pub const HEADER_SIZE: usize = 40;

    /// Create a new IPv6 packet with default header values
    pub fn new(
        source: Ipv6Addr,
        destination: Ipv6Addr,
        next_header: IpProtocol,
        payload: Vec<u8>,
    ) -> Self {
        Ipv6Packet {
            traffic_class: 0,
            flow_label: 0,
            payload_length: payload.len() as u16,
            next_header,
            hop_limit: 64,
            source,
            destination,
            payload,
        }
    }

    /// Set the hop limit (link-local multicast traffic uses 1)
    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    /// Convert the packet to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());

        // Version (4 bits) + traffic class (8 bits) + flow label (20 bits)
        buffer.put_u8(0x60 | (self.traffic_class >> 4));
        buffer.put_u8(((self.traffic_class & 0x0F) << 4) | ((self.flow_label >> 16) as u8 & 0x0F));
        buffer.put_u16((self.flow_label & 0xFFFF) as u16);
        buffer.put_u16(self.payload_length);
        buffer.put_u8(self.next_header.to_u8());
        buffer.put_u8(self.hop_limit);
        buffer.put_slice(&self.source.octets());
        buffer.put_slice(&self.destination.octets());
        buffer.put_slice(&self.payload);

        buffer.to_vec()
    }

    /// Parse an IPv6 packet from bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::HEADER_SIZE {
            return None;
        }

        if data[0] >> 4 != 6 {
            return None;
        }

        let traffic_class = ((data[0] & 0x0F) << 4) | (data[1] >> 4);
        let flow_label =
            (((data[1] & 0x0F) as u32) << 16) | ((data[2] as u32) << 8) | data[3] as u32;

        let mut src = [0u8; 16];
        src.copy_from_slice(&data[8..24]);
        let mut dst = [0u8; 16];
        dst.copy_from_slice(&data[24..40]);

        Some(Ipv6Packet {
            traffic_class,
            flow_label,
            payload_length: u16::from_be_bytes([data[4], data[5]]),
            next_header: IpProtocol::from_u8(data[6]),
            hop_limit: data[7],
            source: Ipv6Addr::from(src),
            destination: Ipv6Addr::from(dst),
            payload: data[Self::HEADER_SIZE..].to_vec(),
        })
    }
}
