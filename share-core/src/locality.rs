//! Network locality derivation.
//!
//! Peers whose source addresses fall in the same /24 (IPv4) or /64 (IPv6)
//! are considered "nearby". The key is a plain string so it can be shown to
//! the peer in its welcome message.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Key grouping peers that share a network segment.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LocalityKey(String);

impl LocalityKey {
    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for LocalityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalityKey({})", self.0)
    }
}

/// Unwrap IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) to plain IPv4.
pub fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Derive the locality key for a source address.
///
/// IPv4 maps to its containing /24, IPv6 to its containing /64.
pub fn derive_locality_key(addr: IpAddr) -> LocalityKey {
    match normalize(addr) {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            LocalityKey(format!("{}/24", Ipv4Addr::new(a, b, c, 0)))
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            let prefix = Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, 0);
            LocalityKey(format!("{prefix}/64"))
        }
    }
}

/// Whether the address is in a private, loopback or link-local range.
///
/// Informational only. Matching never depends on it.
pub fn is_private_address(addr: IpAddr) -> bool {
    match normalize(addr) {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00
        }
    }
}
