//! DHCP protocol implementations for dhcpswarm
//!
//! This crate contains the wire-format side of both DHCP variants the
//! simulator speaks. Each module covers:
//! - Message parsing and construction
//! - The option/TLV vocabulary the lease cycle needs
//! - Accessors for the fields the client state machines act on
//!
//! ## DHCPv4 (RFC 2131 / RFC 2132)
//! The DISCOVER / OFFER / REQUEST / ACK cycle plus NAK and RELEASE.
//! See [`dhcpv4`] module for details.
//!
//! ## DHCPv6 (RFC 8415)
//! The SOLICIT / ADVERTISE / REQUEST / REPLY cycle with IA_NA and
//! IA_PD, plus RELEASE. See [`dhcpv6`] module for details.
//!
//! State machines, timers and transport live elsewhere; nothing in this
//! crate does I/O.

pub mod dhcpv4;
pub mod dhcpv6;

// Re-export the message types for convenience
pub use dhcpv4::{DhcpMessageType, DhcpOption, DhcpPacket};
pub use dhcpv6::{Dhcpv6MessageType, Dhcpv6Option, Dhcpv6OptionType, Dhcpv6Packet};
