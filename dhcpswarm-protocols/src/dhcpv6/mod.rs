//! DHCPv6 (Dynamic Host Configuration Protocol for IPv6) - RFC 8415
//!
//! Message encoding and decoding for the SOLICIT / ADVERTISE / REQUEST
//! / REPLY exchange, including IA_NA address and IA_PD prefix options
//! and DUID generation.

pub mod packet;

pub use packet::{
    eui64_link_local, status_code_name, DelegatedPrefix, Dhcpv6MessageType, Dhcpv6Option,
    Dhcpv6OptionType, Dhcpv6Packet, IaAddress, DHCPV6_CLIENT_PORT, DHCPV6_MULTICAST,
    DHCPV6_MULTICAST_MAC, DHCPV6_SERVER_PORT,
};
