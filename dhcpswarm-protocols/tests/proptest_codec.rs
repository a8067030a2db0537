use proptest::prelude::*;

use dhcpswarm_protocols::{Dhcpv6MessageType, Dhcpv6Option, Dhcpv6Packet, DhcpPacket};

const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const DHCP_FIXED_HEADER_SIZE: usize = 240;

fn valid_v4_header() -> Vec<u8> {
    let mut packet = vec![0u8; DHCP_FIXED_HEADER_SIZE];
    packet[0] = 1;
    packet[1] = 1;
    packet[2] = 6;
    packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
    packet
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn v4_parse_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let _ = DhcpPacket::parse(&data);
    }

    #[test]
    fn v4_parse_never_panics_on_valid_header_with_random_options(
        options_data in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut packet = valid_v4_header();
        packet.extend_from_slice(&options_data);
        let _ = DhcpPacket::parse(&packet);
    }

    #[test]
    fn v4_parse_never_panics_on_random_option_lengths(
        option_code in 1u8..254,
        option_length in any::<u8>(),
        option_data in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let mut packet = valid_v4_header();
        packet.push(option_code);
        packet.push(option_length);
        let actual_len = (option_length as usize).min(option_data.len());
        packet.extend_from_slice(&option_data[..actual_len]);
        packet.push(255);
        let _ = DhcpPacket::parse(&packet);
    }

    #[test]
    fn v4_roundtrip_preserves_fixed_fields(
        xid in any::<u32>(),
        secs in any::<u16>(),
        flags in any::<u16>(),
        ciaddr in any::<[u8; 4]>(),
        yiaddr in any::<[u8; 4]>(),
        siaddr in any::<[u8; 4]>(),
        giaddr in any::<[u8; 4]>(),
        chaddr in any::<[u8; 16]>(),
    ) {
        let mut packet = valid_v4_header();
        packet[4..8].copy_from_slice(&xid.to_be_bytes());
        packet[8..10].copy_from_slice(&secs.to_be_bytes());
        packet[10..12].copy_from_slice(&flags.to_be_bytes());
        packet[12..16].copy_from_slice(&ciaddr);
        packet[16..20].copy_from_slice(&yiaddr);
        packet[20..24].copy_from_slice(&siaddr);
        packet[24..28].copy_from_slice(&giaddr);
        packet[28..44].copy_from_slice(&chaddr);
        packet.push(255);

        let parsed = DhcpPacket::parse(&packet).unwrap();
        let reparsed = DhcpPacket::parse(&parsed.build()).unwrap();

        prop_assert_eq!(parsed.xid, reparsed.xid);
        prop_assert_eq!(parsed.secs, reparsed.secs);
        prop_assert_eq!(parsed.flags, reparsed.flags);
        prop_assert_eq!(parsed.ciaddr, reparsed.ciaddr);
        prop_assert_eq!(parsed.yiaddr, reparsed.yiaddr);
        prop_assert_eq!(parsed.siaddr, reparsed.siaddr);
        prop_assert_eq!(parsed.giaddr, reparsed.giaddr);
        prop_assert_eq!(parsed.chaddr, reparsed.chaddr);
        prop_assert_eq!(parsed.options, reparsed.options);
    }

    #[test]
    fn v4_short_packets_always_rejected(
        data in prop::collection::vec(any::<u8>(), 0..240)
    ) {
        prop_assert!(DhcpPacket::parse(&data).is_err());
    }

    #[test]
    fn v4_bad_magic_cookie_always_rejected(
        cookie in any::<[u8; 4]>()
    ) {
        prop_assume!(cookie != DHCP_MAGIC_COOKIE);

        let mut packet = valid_v4_header();
        packet[236..240].copy_from_slice(&cookie);
        packet.push(255);

        prop_assert!(DhcpPacket::parse(&packet).is_err());
    }

    #[test]
    fn v6_parse_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let _ = Dhcpv6Packet::parse(&data);
    }

    #[test]
    fn v6_parse_never_panics_on_random_option_bytes(
        msg_byte in 1u8..=13,
        option_bytes in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut packet = vec![msg_byte, 0xAB, 0xCD, 0xEF];
        packet.extend_from_slice(&option_bytes);
        let _ = Dhcpv6Packet::parse(&packet);
    }

    #[test]
    fn v6_roundtrip_preserves_options(
        msg_byte in 1u8..=13,
        transaction_id in any::<[u8; 3]>(),
        raw_options in prop::collection::vec(
            (any::<u16>(), prop::collection::vec(any::<u8>(), 0..64)),
            0..8
        )
    ) {
        let msg_type = Dhcpv6MessageType::from_u8(msg_byte).unwrap();
        let mut packet = Dhcpv6Packet::new(msg_type, transaction_id);
        for (code, data) in raw_options {
            packet = packet.add_option(Dhcpv6Option { code, data });
        }

        let parsed = Dhcpv6Packet::parse(&packet.to_bytes()).unwrap();
        prop_assert_eq!(parsed, packet);
    }

    #[test]
    fn v6_accessors_never_panic(
        msg_byte in 1u8..=13,
        option_bytes in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut bytes = vec![msg_byte, 0x00, 0x11, 0x22];
        bytes.extend_from_slice(&option_bytes);

        if let Ok(packet) = Dhcpv6Packet::parse(&bytes) {
            let _ = packet.client_duid();
            let _ = packet.server_duid();
            let _ = packet.status_code();
            let _ = packet.ia_na_address();
            let _ = packet.ia_pd_prefix();
        }
    }
}
