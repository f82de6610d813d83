// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Free-space subnet allocation within a parent block.
//!
//! The allocator is stateless: every call receives the parent network and the
//! complete list of already-carved subnets, computes the free gaps between
//! them, and returns the first aligned gap large enough for the request
//! (first-fit, not best-fit).  Callers accumulate the returned subnets and
//! pass them back on the next call.

use gridiron_common::address;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("requested prefix /{requested} is larger than network {network}")]
    PrefixTooLarge { requested: u8, network: IpNet },

    #[error("prefix length /{requested} exceeds the maximum /{max} for {network}")]
    InvalidPrefix { requested: u8, max: u8, network: IpNet },

    #[error("{subnet} and {network} are not the same address family")]
    FamilyMismatch { subnet: IpNet, network: IpNet },

    #[error("{subnet} is not contained in {network}")]
    NotContained { subnet: IpNet, network: IpNet },

    #[error(
        "no available addresses in {network} for a /{requested} subnet \
         ({allocated} subnets already allocated)"
    )]
    Exhausted { requested: u8, network: IpNet, allocated: usize },

    #[error("no subnet between /{desired} and /{floor} fits in {network}")]
    NoFit { desired: u8, floor: u8, network: IpNet },

    #[error("cannot carve {count} subnets out of {network}")]
    CountTooLarge { count: u64, network: IpNet },
}

/// Offset mask for a block of the given prefix length: block size minus one.
/// The all-ones value stands in for the full 2^128 space, which does not fit
/// a `u128`.
fn block_span(width: u8, prefix_len: u8) -> u128 {
    let bits = width - prefix_len;
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// Round `addr` up to the next multiple of the block size.  `span` is the
/// low-bit mask from [`block_span`]; block sizes are powers of two, so the
/// remainder is just the masked low bits.
fn align_up(addr: u128, span: u128) -> Option<u128> {
    if span == u128::MAX {
        return if addr == 0 { Some(0) } else { None };
    }
    let rem = addr & span;
    if rem == 0 {
        Some(addr)
    } else {
        addr.checked_add(span + 1 - rem)
    }
}

/// First aligned block base within `[gap_start, gap_end]` whose whole span
/// fits, if any.
fn fit_in_gap(gap_start: u128, gap_end: u128, span: u128) -> Option<u128> {
    let aligned = align_up(gap_start, span)?;
    let last = aligned.checked_add(span)?;
    if last <= gap_end {
        Some(aligned)
    } else {
        None
    }
}

fn net_from_u128(value: u128, prefix_len: u8, like: &IpNet) -> IpNet {
    match like {
        // Prefix lengths are validated against the family width before any
        // construction, so these cannot fail.
        IpNet::V4(_) => IpNet::V4(
            Ipv4Net::new(Ipv4Addr::from(value as u32), prefix_len).unwrap(),
        ),
        IpNet::V6(_) => {
            IpNet::V6(Ipv6Net::new(Ipv6Addr::from(value), prefix_len).unwrap())
        }
    }
}

fn same_family(a: &IpNet, b: &IpNet) -> bool {
    matches!(
        (a, b),
        (IpNet::V4(_), IpNet::V4(_)) | (IpNet::V6(_), IpNet::V6(_))
    )
}

/// Find a free block of `prefix_len` within `network`, avoiding everything in
/// `allocated`.
///
/// The allocated subnets are sorted by start address; the scan walks the gap
/// before the first subnet, the gaps between consecutive subnets, and the
/// tail gap up to the end of the network, returning the first gap that can
/// hold an aligned `/prefix_len` block.
pub fn free(
    network: IpNet,
    prefix_len: u8,
    allocated: &[IpNet],
) -> Result<IpNet, AllocError> {
    let width = network.max_prefix_len();
    if prefix_len > width {
        return Err(AllocError::InvalidPrefix { requested: prefix_len, max: width, network });
    }
    if prefix_len < network.prefix_len() {
        return Err(AllocError::PrefixTooLarge { requested: prefix_len, network });
    }

    let mut taken: Vec<(u128, u128)> = Vec::with_capacity(allocated.len());
    for subnet in allocated {
        if !same_family(&network, subnet) {
            return Err(AllocError::FamilyMismatch { subnet: *subnet, network });
        }
        if !address::contains(&network, subnet) {
            return Err(AllocError::NotContained { subnet: *subnet, network });
        }
        taken.push((
            address::to_u128(subnet.network()),
            address::to_u128(subnet.broadcast()),
        ));
    }
    taken.sort_unstable();

    let span = block_span(width, prefix_len);
    let net_start = address::to_u128(network.network());
    let net_end = address::to_u128(network.broadcast());

    let mut cursor = net_start;
    // Set when an allocated subnet runs to the absolute top of the address
    // space, in which case there is no tail gap and `end + 1` would wrap.
    let mut tail_blocked = false;
    for (start, end) in taken {
        if !tail_blocked && cursor < start {
            if let Some(base) = fit_in_gap(cursor, start - 1, span) {
                return Ok(net_from_u128(base, prefix_len, &network));
            }
        }
        if end == u128::MAX {
            tail_blocked = true;
        } else {
            cursor = cursor.max(end + 1);
        }
    }
    if !tail_blocked && cursor <= net_end {
        if let Some(base) = fit_in_gap(cursor, net_end, span) {
            return Ok(net_from_u128(base, prefix_len, &network));
        }
    }

    Err(AllocError::Exhausted {
        requested: prefix_len,
        network,
        allocated: allocated.len(),
    })
}

/// The smallest prefix length able to host at least `count` equally-sized
/// subnets of `network`: the parent length plus `ceil(log2(count))` bits.
pub fn subnet_prefix_for_count(network: &IpNet, count: u64) -> Result<u8, AllocError> {
    if count == 0 {
        return Err(AllocError::CountTooLarge { count, network: *network });
    }
    let extra_bits = u8::try_from(64 - (count - 1).leading_zeros())
        .map_err(|_| AllocError::CountTooLarge { count, network: *network })?;
    let prefix_len = network
        .prefix_len()
        .checked_add(extra_bits)
        .filter(|len| *len <= network.max_prefix_len())
        .ok_or(AllocError::CountTooLarge { count, network: *network })?;
    Ok(prefix_len)
}

/// Carve `network` into `count` equally-sized subnets, allocated from the
/// bottom up.
pub fn split(network: IpNet, count: u64) -> Result<Vec<IpNet>, AllocError> {
    let prefix_len = subnet_prefix_for_count(&network, count)?;
    let mut carved = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let subnet = free(network, prefix_len, &carved)?;
        carved.push(subnet);
    }
    Ok(carved)
}

/// Greedy largest-fit: try prefix lengths from `desired_len` (largest subnet)
/// down to `floor_len` (smallest acceptable), returning the first that fits.
///
/// Exhaustion at one size is not an error — the next smaller size is tried —
/// but validation failures (bad prefix, foreign subnet) abort immediately.
pub fn biggest_fit(
    network: IpNet,
    desired_len: u8,
    floor_len: u8,
    allocated: &[IpNet],
) -> Result<IpNet, AllocError> {
    for prefix_len in desired_len..=floor_len {
        match free(network, prefix_len, allocated) {
            Ok(subnet) => return Ok(subnet),
            Err(AllocError::Exhausted { .. } | AllocError::PrefixTooLarge { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(AllocError::NoFit { desired: desired_len, floor: floor_len, network })
}
