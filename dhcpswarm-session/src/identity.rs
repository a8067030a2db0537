//! Synthetic client identities
//!
//! Every simulated client gets its own locally administered MAC address so
//! the server sees a distinct host per session. DHCPv6 clients additionally
//! carry a DUID-LLT derived from that MAC, and an IAID derived from its low
//! bytes, so identity stays stable across a session's whole exchange.

use std::collections::HashSet;

use dhcpswarm_core::{MacAddr, ProtocolVariant, RunMode};
use dhcpswarm_protocols::dhcpv6::Dhcpv6Packet;
use rand::Rng;

/// The fixed identity of one simulated client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Zero-based position in the batch; drives the v4/v6 split in dual mode
    pub index: usize,
    pub variant: ProtocolVariant,
    pub mac: MacAddr,
    /// DUID-LLT, present only for DHCPv6 identities
    pub duid: Option<Vec<u8>>,
}

impl ClientIdentity {
    /// Create the identity for the session at `index` under `mode`
    pub fn generate(index: usize, mode: RunMode) -> Self {
        let variant = mode.variant_for(index);
        let mac = random_mac();
        let duid = match variant {
            ProtocolVariant::V4 => None,
            ProtocolVariant::V6 => Some(Dhcpv6Packet::generate_duid_llt(mac)),
        };
        Self {
            index,
            variant,
            mac,
            duid,
        }
    }

    /// IA identifier used for both IA_NA and IA_PD requests
    ///
    /// Derived from the low four MAC bytes, so it is stable for the life of
    /// the identity and distinct across a batch.
    pub fn iaid(&self) -> u32 {
        let m = self.mac.octets();
        u32::from_be_bytes([m[2], m[3], m[4], m[5]])
    }
}

/// Generate a random unicast, locally administered MAC address
pub fn random_mac() -> MacAddr {
    let mut rng = rand::thread_rng();
    let mut mac = [0u8; 6];
    rng.fill(&mut mac);
    // Clear the multicast bit, set the locally administered bit
    mac[0] &= 0xFE;
    mac[0] |= 0x02;
    MacAddr::new(mac)
}

/// Generate one identity per client, guaranteeing MAC uniqueness in the batch
pub fn generate_batch(total: usize, mode: RunMode) -> Vec<ClientIdentity> {
    let mut seen = HashSet::with_capacity(total);
    let mut batch = Vec::with_capacity(total);
    for index in 0..total {
        let mut identity = ClientIdentity::generate(index, mode);
        while !seen.insert(identity.mac) {
            identity = ClientIdentity::generate(index, mode);
        }
        batch.push(identity);
    }
    batch
}
