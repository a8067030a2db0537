//! Checksum calculations for hand-built frames
//!
//! The raw channel operates below UDP, so every checksum the kernel would
//! normally fill in has to be computed here: the IPv4 header checksum and
//! the UDP checksums over the v4 and v6 pseudo-headers (RFC 1071 / RFC 768
//! / RFC 2460 §8.1).

use std::net::{Ipv4Addr, Ipv6Addr};

/// Calculates the Internet Checksum as defined in RFC 1071.
///
/// Treats the data as a sequence of big-endian 16-bit words, sums them with
/// end-around carry, and returns the one's complement of the result. An odd
/// trailing byte is padded with a zero on the right.
///
/// # Examples
///
/// ```
/// use dhcpswarm_packet::checksum::internet_checksum;
///
/// let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
/// assert_eq!(internet_checksum(&data), 0x220d);
/// ```
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        let word = u16::from_be_bytes([chunk[0], chunk[1]]);
        sum += word as u32;
    }

    if let Some(&byte) = chunks.remainder().first() {
        sum += (byte as u32) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Calculates a UDP checksum over the IPv4 pseudo-header.
///
/// The pseudo-header is source address, destination address, a zero byte,
/// the protocol number, and the segment length; it is prepended to the
/// UDP header and payload before summing.
pub fn transport_checksum(src: &Ipv4Addr, dst: &Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let mut buffer = Vec::with_capacity(12 + segment.len());

    buffer.extend_from_slice(&src.octets());
    buffer.extend_from_slice(&dst.octets());
    buffer.push(0);
    buffer.push(protocol);
    buffer.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    buffer.extend_from_slice(segment);

    internet_checksum(&buffer)
}

/// Calculates a UDP checksum over the IPv6 pseudo-header.
///
/// IPv6 has no header checksum of its own and makes the UDP checksum
/// mandatory. The pseudo-header is the 16-byte source and destination
/// addresses, the 32-bit segment length, three zero bytes, and the
/// next-header value.
pub fn transport_checksum_v6(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    next_header: u8,
    segment: &[u8],
) -> u16 {
    let mut buffer = Vec::with_capacity(40 + segment.len());

    buffer.extend_from_slice(&src.octets());
    buffer.extend_from_slice(&dst.octets());
    buffer.extend_from_slice(&(segment.len() as u32).to_be_bytes());
    buffer.extend_from_slice(&[0, 0, 0]);
    buffer.push(next_header);
    buffer.extend_from_slice(segment);

    internet_checksum(&buffer)
}

/// Validates a buffer whose checksum field is already filled in.
///
/// Summing a correct packet including its checksum yields zero (0xFFFF is
/// the equivalent one's-complement form).
pub fn validate_checksum(data: &[u8]) -> bool {
    let result = internet_checksum(data);
    result == 0 || result == 0xFFFF
}
