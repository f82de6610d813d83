// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Address arithmetic shared by the subnet allocator and the topology
//! builder.
//!
//! All arithmetic is normalized to `u128`, which covers 32-bit IPv4 math and
//! the IPv6 quantities this crate ever produces (host counts are clamped at
//! the /64 boundary, see [`usable_hosts`]).  The family-specific rules — the
//! IPv4 network/broadcast convention, the IPv6 /64 clamp — live at the edges
//! of this module, not in the arithmetic itself.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Errors from mask/prefix conversions.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("prefix length /{prefix_len} exceeds the {version} maximum of /{max}")]
    PrefixTooLong { prefix_len: u8, version: IpVersion, max: u8 },

    #[error("{0} is not a contiguous subnet mask")]
    InvalidNetmask(IpAddr),
}

/// The IP address version.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Address width in bits.
    pub fn width(&self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::V4 => write!(f, "v4"),
            Self::V6 => write!(f, "v6"),
        }
    }
}

/// Numeric value of an address, zero-extended to 128 bits.
pub fn to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Rebuild an address in the family of `like` from its numeric value.
///
/// IPv4 values must fit 32 bits; callers only pass values derived from
/// addresses inside an IPv4 block, so the truncation is a no-op.
pub fn from_u128(value: u128, like: &IpNet) -> IpAddr {
    match like {
        IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
        IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// The network (lowest) address of the block: the prefix with host bits
/// cleared.
pub fn first_address(net: &IpNet) -> IpAddr {
    net.network()
}

/// The last address of the block: the IPv4 broadcast, or for IPv6 simply the
/// highest address (IPv6 has no broadcast, but the planner treats the block
/// end identically in both families).
pub fn last_address(net: &IpNet) -> IpAddr {
    net.broadcast()
}

/// The network address advanced by `offset`.
///
/// If the result would fall outside the block it is clamped to
/// [`last_address`].  Clamping is a defined degradation, not an error;
/// callers that need exact arithmetic compare the result against their
/// expectation (or use [`offset_of`]).
pub fn advance(net: &IpNet, offset: u128) -> IpAddr {
    let first = to_u128(net.network());
    let last = to_u128(net.broadcast());
    from_u128(first.saturating_add(offset).min(last), net)
}

/// The conventional first usable address of the block, used as the default
/// gateway unless an explicit override is configured.
pub fn gateway(net: &IpNet) -> IpAddr {
    advance(net, 1)
}

/// The offset of `addr` from the block's network address, or `None` if the
/// address is not inside the block.  Inverse of [`advance`].
pub fn offset_of(net: &IpNet, addr: IpAddr) -> Option<u128> {
    if !net.contains(&addr) {
        return None;
    }
    Some(to_u128(addr) - to_u128(net.network()))
}

/// The subnet mask for a prefix length, in address form.
pub fn subnet_mask(prefix_len: u8, version: IpVersion) -> Result<IpAddr, AddressError> {
    let too_long = AddressError::PrefixTooLong {
        prefix_len,
        version,
        max: version.width(),
    };
    match version {
        IpVersion::V4 => Ipv4Net::new(Ipv4Addr::UNSPECIFIED, prefix_len)
            .map(|net| IpAddr::V4(net.netmask()))
            .map_err(|_| too_long),
        IpVersion::V6 => Ipv6Net::new(Ipv6Addr::UNSPECIFIED, prefix_len)
            .map(|net| IpAddr::V6(net.netmask()))
            .map_err(|_| too_long),
    }
}

/// The prefix length of a subnet mask.  Non-contiguous masks are rejected.
pub fn prefix_len_of_mask(mask: IpAddr) -> Result<u8, AddressError> {
    match mask {
        IpAddr::V4(m) => Ipv4Net::with_netmask(Ipv4Addr::UNSPECIFIED, m)
            .map(|net| net.prefix_len())
            .map_err(|_| AddressError::InvalidNetmask(mask)),
        IpAddr::V6(m) => Ipv6Net::with_netmask(Ipv6Addr::UNSPECIFIED, m)
            .map(|net| net.prefix_len())
            .map_err(|_| AddressError::InvalidNetmask(mask)),
    }
}

/// The number of host addresses usable for assignment within the block.
///
/// IPv4 excludes the network and broadcast addresses (`2^(32-len) - 2`), so
/// /31 and /32 report zero.  For IPv6, prefixes wider than /64 are clamped to
/// /64 — only the final /64 "page" is considered addressable for counting
/// purposes — and the result is `2^(128-len) - 1`.
pub fn usable_hosts(net: &IpNet) -> u128 {
    match net {
        IpNet::V4(v4) => {
            let len = v4.prefix_len();
            if len >= 31 {
                0
            } else {
                (1u128 << (32 - len)) - 2
            }
        }
        IpNet::V6(v6) => {
            let len = v6.prefix_len().max(64);
            (1u128 << (128 - len)) - 1
        }
    }
}

/// Whether `child` lies entirely within `parent`: both its first and last
/// address are contained.  Always false across address families.
pub fn contains(parent: &IpNet, child: &IpNet) -> bool {
    parent.contains(&child.network()) && parent.contains(&child.broadcast())
}

#[cfg(test)]
mod test {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_and_last_address() {
        let block = net("10.0.0.17/24");
        assert_eq!(first_address(&block), "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(last_address(&block), "10.0.0.255".parse::<IpAddr>().unwrap());

        let block = net("fd00:1122:3344:0100::/56");
        assert_eq!(
            last_address(&block),
            "fd00:1122:3344:1ff:ffff:ffff:ffff:ffff".parse::<IpAddr>().unwrap(),
        );
    }

    #[test]
    fn test_advance_and_gateway() {
        let block = net("10.252.0.0/17");
        assert_eq!(advance(&block, 0), "10.252.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(advance(&block, 10), "10.252.0.10".parse::<IpAddr>().unwrap());
        assert_eq!(gateway(&block), "10.252.0.1".parse::<IpAddr>().unwrap());

        let block = net("fd00::/64");
        assert_eq!(gateway(&block), "fd00::1".parse::<IpAddr>().unwrap());
        assert_eq!(
            advance(&block, 1 << 32),
            "fd00::1:0:0".parse::<IpAddr>().unwrap(),
        );
    }

    #[test]
    fn test_advance_clamps_to_block_end() {
        let block = net("10.0.0.0/24");
        assert_eq!(advance(&block, 300), last_address(&block));
        assert_eq!(advance(&block, u128::MAX), last_address(&block));
    }

    #[test]
    fn test_advance_round_trips_with_usable_hosts() {
        // root + usable + 1 lands exactly on the broadcast address.
        for block in ["10.0.0.0/24", "192.168.4.0/22", "10.0.0.0/30"] {
            let block = net(block);
            assert_eq!(advance(&block, usable_hosts(&block) + 1), last_address(&block));
        }
    }

    #[test]
    fn test_offset_of() {
        let block = net("10.0.0.0/24");
        assert_eq!(offset_of(&block, "10.0.0.17".parse().unwrap()), Some(17));
        assert_eq!(offset_of(&block, "10.0.1.0".parse().unwrap()), None);
        assert_eq!(offset_of(&block, "fd00::1".parse().unwrap()), None);
    }

    #[test]
    fn test_usable_hosts_boundaries() {
        assert_eq!(usable_hosts(&net("10.0.0.0/24")), 254);
        assert_eq!(usable_hosts(&net("10.0.0.0/31")), 0);
        assert_eq!(usable_hosts(&net("10.0.0.0/32")), 0);

        // Prefixes wider than /64 clamp: /63 and /64 report the same count.
        assert_eq!(usable_hosts(&net("fd00::/63")), u128::from(u64::MAX));
        assert_eq!(usable_hosts(&net("fd00::/64")), u128::from(u64::MAX));
        assert_eq!(usable_hosts(&net("fd00::/126")), 3);
        assert_eq!(usable_hosts(&net("fd00::/128")), 0);
    }

    #[test]
    fn test_subnet_mask() {
        assert_eq!(
            subnet_mask(24, IpVersion::V4).unwrap(),
            "255.255.255.0".parse::<IpAddr>().unwrap(),
        );
        assert_eq!(
            subnet_mask(17, IpVersion::V4).unwrap(),
            "255.255.128.0".parse::<IpAddr>().unwrap(),
        );
        assert_eq!(
            subnet_mask(64, IpVersion::V6).unwrap(),
            "ffff:ffff:ffff:ffff::".parse::<IpAddr>().unwrap(),
        );
        assert_eq!(
            subnet_mask(33, IpVersion::V4),
            Err(AddressError::PrefixTooLong {
                prefix_len: 33,
                version: IpVersion::V4,
                max: 32
            }),
        );
    }

    #[test]
    fn test_prefix_len_of_mask() {
        assert_eq!(prefix_len_of_mask("255.255.255.0".parse().unwrap()), Ok(24));
        assert_eq!(prefix_len_of_mask("255.255.128.0".parse().unwrap()), Ok(17));
        assert_eq!(
            prefix_len_of_mask("ffff:ffff:ffff:ffff::".parse().unwrap()),
            Ok(64),
        );

        let bad: IpAddr = "255.0.255.0".parse().unwrap();
        assert_eq!(prefix_len_of_mask(bad), Err(AddressError::InvalidNetmask(bad)));
    }

    #[test]
    fn test_contains() {
        let parent = net("10.106.0.0/17");
        assert!(contains(&parent, &net("10.106.0.0/22")));
        assert!(contains(&parent, &net("10.106.124.0/22")));
        assert!(!contains(&parent, &net("10.106.0.0/16")));
        assert!(!contains(&parent, &net("10.107.0.0/22")));
        // Never across families.
        assert!(!contains(&parent, &net("fd00::/64")));
    }
}
