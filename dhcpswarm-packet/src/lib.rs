//! Packet construction and parsing library for dhcpswarm
//!
//! This crate builds the raw frames the simulator puts on the wire:
//! Ethernet II at layer 2, IPv4 or IPv6 at layer 3 and UDP at layer 4,
//! with the DHCP message bytes riding as the UDP payload. Everything is
//! assembled from scratch because simulated clients have no IP address
//! yet and cannot use the kernel's UDP stack.
//!
//! The library is organized into several modules:
//!
//! - [`ethernet`] - Ethernet II frame construction and parsing
//! - [`ip`] - IPv4 and IPv6 packet construction
//! - [`udp`] - UDP datagram construction with v4 and v6 checksums
//! - [`checksum`] - Internet checksum calculation utilities
//!
//! # Quick Start
//!
//! Stacking the layers of a client-to-server IPv4 broadcast:
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use dhcpswarm_core::MacAddr;
//! use dhcpswarm_packet::{EtherType, EthernetFrame, IpProtocol, Ipv4Packet, UdpDatagram};
//!
//! let client_mac = MacAddr::new([0x02, 0x00, 0x5e, 0x00, 0x53, 0x01]);
//! let payload = vec![0x01, 0x02, 0x03, 0x04]; // DHCP message bytes
//!
//! let udp = UdpDatagram::new(68, 67, payload);
//! let ip = Ipv4Packet::new(
//!     Ipv4Addr::UNSPECIFIED,
//!     Ipv4Addr::BROADCAST,
//!     IpProtocol::Udp,
//!     udp.to_bytes(),
//! );
//! let frame = EthernetFrame::new(
//!     MacAddr::broadcast(),
//!     client_mac,
//!     EtherType::IPv4,
//!     ip.to_bytes(),
//! );
//!
//! let bytes = frame.to_bytes();
//! assert_eq!(&bytes[12..14], &[0x08, 0x00]);
//! ```

pub mod checksum;
pub mod ethernet;
pub mod ip;
pub mod udp;

// Re-export commonly used types for convenience
pub use checksum::{internet_checksum, transport_checksum, transport_checksum_v6};
pub use ethernet::{EtherType, EthernetFrame};
pub use ip::{IpProtocol, Ipv4Packet, Ipv6Packet};
pub use udp::UdpDatagram;
