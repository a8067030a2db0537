//! DHCPv4 (Dynamic Host Configuration Protocol) message support
//!
//! This module covers the wire format side of the v4 lease cycle:
//! - Packet parsing and building
//! - Message types (DISCOVER, OFFER, REQUEST, ACK, NAK, RELEASE)
//! - Options handling

pub mod packet;

pub use packet::{DhcpMessageType, DhcpOption, DhcpPacket};
