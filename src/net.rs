//! Network-address type and the group/reachability classification used by bucket
//! placement (§4.1) and local-address selection (§4.9).

use bitflags::bitflags;

bitflags! {
    /// Advertised node capabilities, mirrored as a plain `u64` on the wire.
    pub struct Services: u64 {
        const NONE = 0;
        const NETWORK = 1 << 0;
        const WITNESS = 1 << 3;
        const COMPACT_FILTERS = 1 << 6;
        const NETWORK_LIMITED = 1 << 10;
    }
}

/// The identity fields of a [`NetAddress`] (its master-index and bucket key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddrKey {
    pub ip: [u8; 16],
    pub port: u16,
}

/// A network endpoint: canonical IPv6 bytes (IPv4 addresses are v4-mapped), port,
/// service bitset and last-seen timestamp. See spec §1 and §3.
#[derive(Debug, Clone, PartialEq)]
pub struct NetAddress {
    pub ip: [u8; 16],
    pub port: u16,
    pub services: u64,
    pub time: i64,
}

const ONION_PREFIX: [u8; 6] = [0xFD, 0x87, 0xD8, 0x7E, 0xEB, 0x43];
const V4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF];
const LOOPBACK_V6: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

/// The broad network family an address belongs to, used to derive its group key
/// and its reachability toward another address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Unroutable,
    Ipv4,
    Ipv6,
    Onion,
}

impl NetAddress {
    pub fn from_ipv4(a: u8, b: u8, c: u8, d: u8, port: u16) -> Self {
        let mut ip = [0u8; 16];
        ip[10] = 0xFF;
        ip[11] = 0xFF;
        ip[12] = a;
        ip[13] = b;
        ip[14] = c;
        ip[15] = d;
        NetAddress {
            ip,
            port,
            services: 0,
            time: 0,
        }
    }

    /// The address this manager falls back on when no seed list is configured
    /// (§4.10 "Open").
    pub fn loopback() -> Self {
        Self::from_ipv4(127, 0, 0, 1, 8333)
    }

    pub fn key(&self) -> AddrKey {
        AddrKey {
            ip: self.ip,
            port: self.port,
        }
    }

    pub fn kind(&self) -> AddressKind {
        if self.ip[..6] == ONION_PREFIX[..] {
            AddressKind::Onion
        } else if self.ip[..12] == V4_MAPPED_PREFIX[..] {
            AddressKind::Ipv4
        } else {
            AddressKind::Ipv6
        }
    }

    pub fn is_routable(&self) -> bool {
        match self.kind() {
            AddressKind::Ipv4 => {
                let o = [self.ip[12], self.ip[13], self.ip[14], self.ip[15]];
                !(o[0] == 0
                    || o[0] == 127
                    || o[0] == 10
                    || (o[0] == 172 && (16..=31).contains(&o[1]))
                    || (o[0] == 192 && o[1] == 168)
                    || (o[0] == 169 && o[1] == 254))
            }
            AddressKind::Onion => true,
            AddressKind::Ipv6 => {
                !(self.ip == [0u8; 16] || self.ip == LOOPBACK_V6 || (self.ip[0] & 0xFE) == 0xFC)
            }
            AddressKind::Unroutable => false,
        }
    }

    /// The 6-byte bucket-coarsening group key (§4.1): /16 for IPv4, /32 for IPv6,
    /// the onion service prefix for Tor addresses.
    pub fn group(&self) -> [u8; 6] {
        match self.kind() {
            AddressKind::Ipv4 => [1, self.ip[12], self.ip[13], 0, 0, 0],
            AddressKind::Ipv6 => [2, self.ip[0], self.ip[1], self.ip[2], self.ip[3], 0],
            AddressKind::Onion => [
                3,
                self.ip[6],
                self.ip[7],
                self.ip[8],
                self.ip[9],
                self.ip[10],
            ],
            AddressKind::Unroutable => [0; 6],
        }
    }
}

/// How reachable `dest` is when advertised toward a peer sitting at `src` (§4.9).
/// Higher is better; same-family pairs score highest, cross-family pairs lowest
/// among routable destinations, and an unroutable destination always scores 0.
pub fn reachability(dest: &NetAddress, src: &NetAddress) -> i32 {
    use AddressKind::*;

    if !dest.is_routable() {
        return 0;
    }
    match (src.kind(), dest.kind()) {
        (_, Unroutable) => 0,
        (Ipv4, Ipv4) => 3,
        (Ipv6, Ipv6) | (Onion, Onion) => 4,
        (Onion, _) | (_, Onion) => 2,
        (Ipv4, Ipv6) | (Ipv6, Ipv4) => 1,
        _ => 1,
    }
}

/// Which chain this manager's persisted format and magic are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Main,
    Test,
    Regtest,
}

impl Network {
    pub fn magic(self) -> u32 {
        match self {
            Network::Main => 0xD9B4_BEF9,
            Network::Test => 0x0709_110B,
            Network::Regtest => 0xDAB5_BFFA,
        }
    }
}
