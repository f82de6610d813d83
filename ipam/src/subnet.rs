// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The subnet model: a carved CIDR block with its gateway, DHCP range, and
//! ordered list of named address reservations.
//!
//! Reservations are addressed through [`ReservationId`] handles rather than
//! references into the backing storage, so adding reservations never
//! invalidates a handle a caller is still holding.

use gridiron_common::address;
use gridiron_common::vlan::VlanId;
use ipnet::{IpNet, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// DHCP leases never start earlier than this many addresses into a block,
/// regardless of how few reservations it carries.
const MIN_DHCP_START_OFFSET: u128 = 10;

/// Lease-range length used when the block's real end is unreliable (the
/// supernet compatibility mode widens the mask, so the broadcast-derived end
/// would leave the original block).
const CAPPED_DHCP_RANGE_LEN: u128 = 200;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubnetError {
    #[error("{address} is not contained in subnet {cidr}")]
    AddressNotInSubnet { address: IpAddr, cidr: IpNet },

    #[error("{address} is already reserved in subnet {subnet}")]
    DuplicateAddress { address: IpAddr, subnet: String },

    #[error("no free addresses remain in {cidr}")]
    Exhausted { cidr: IpNet },

    #[error("subnet {0} has no IPv4 block")]
    NoIpv4Block(String),

    #[error("subnet {0} has no IPv6 block")]
    NoIpv6Block(String),

    #[error("{count} reservations exceed the {usable} usable addresses of {cidr}")]
    TooManyReservations { count: usize, usable: u128, cidr: IpNet },
}

/// A named address binding within a subnet.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct IpReservation {
    pub name: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl IpReservation {
    /// The reservation's address, preferring IPv4 when both are present.
    pub fn address(&self) -> Option<IpAddr> {
        self.ipv4.map(IpAddr::V4).or(self.ipv6.map(IpAddr::V6))
    }
}

/// Stable handle to a reservation within its owning [`Subnet`].
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
)]
#[serde(transparent)]
pub struct ReservationId(usize);

/// A named CIDR block owned by exactly one network.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Subnet {
    pub name: String,
    pub full_name: String,
    pub cidr: IpNet,
    /// Companion IPv6 block for dual-stack subnets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr6: Option<Ipv6Net>,
    pub gateway: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway6: Option<Ipv6Addr>,
    /// Address of the DNS/NTP/PIT server for this subnet, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_server: Option<IpAddr>,
    /// VLAN tag; [`VlanId::UNTAGGED`] for untagged subnets.
    pub vlan: VlanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_start: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_end: Option<IpAddr>,
    /// Bounds of the floating-address pool when this subnet hosts one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_start: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_end: Option<IpAddr>,
    /// Load-balancer pool served from this subnet, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_name: Option<String>,
    #[serde(default)]
    reservations: Vec<IpReservation>,
}

impl Subnet {
    /// A subnet over `cidr` with the conventional gateway (first usable
    /// address).  The block is normalized: host bits are cleared.
    pub fn new(
        name: impl Into<String>,
        full_name: impl Into<String>,
        cidr: IpNet,
        vlan: VlanId,
    ) -> Subnet {
        let cidr = cidr.trunc();
        Subnet {
            name: name.into(),
            full_name: full_name.into(),
            cidr,
            cidr6: None,
            gateway: address::gateway(&cidr),
            gateway6: None,
            dns_server: None,
            vlan,
            dhcp_start: None,
            dhcp_end: None,
            reservation_start: None,
            reservation_end: None,
            pool_name: None,
            reservations: Vec::new(),
        }
    }

    /// Attach a companion IPv6 block, deriving its gateway.
    pub fn with_ipv6(mut self, cidr6: Ipv6Net) -> Subnet {
        let cidr6 = cidr6.trunc();
        let gw = address::gateway(&IpNet::V6(cidr6));
        self.gateway6 = match gw {
            IpAddr::V6(v6) => Some(v6),
            IpAddr::V4(_) => None,
        };
        self.cidr6 = Some(cidr6);
        self
    }

    pub fn reservations(&self) -> &[IpReservation] {
        &self.reservations
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&IpReservation> {
        self.reservations.get(id.0)
    }

    pub fn reservation_mut(&mut self, id: ReservationId) -> Option<&mut IpReservation> {
        self.reservations.get_mut(id.0)
    }

    pub fn find_reservation(&self, name: &str) -> Option<&IpReservation> {
        self.reservations.iter().find(|r| r.name == name)
    }

    fn reservation_id(&self, name: &str) -> Option<ReservationId> {
        self.reservations
            .iter()
            .position(|r| r.name == name)
            .map(ReservationId)
    }

    /// Whether `addr` is inside the subnet's block of the matching family.
    pub fn contains(&self, addr: IpAddr) -> bool {
        if self.cidr.contains(&addr) {
            return true;
        }
        match (self.cidr6, addr) {
            (Some(c6), IpAddr::V6(v6)) => c6.contains(&v6),
            _ => false,
        }
    }

    fn is_reserved(&self, addr: IpAddr) -> bool {
        self.reservations.iter().any(|r| match addr {
            IpAddr::V4(v4) => r.ipv4 == Some(v4),
            IpAddr::V6(v6) => r.ipv6 == Some(v6),
        })
    }

    /// First assignable address of `block` at or after `from_offset`,
    /// skipping the network address, the configured gateway, the broadcast
    /// address (IPv4 only), and every existing reservation.
    fn scan_free(&self, block: &IpNet, from_offset: u128) -> Result<IpAddr, SubnetError> {
        let first = address::to_u128(block.network());
        let last = address::to_u128(block.broadcast());
        let is_v4 = matches!(block, IpNet::V4(_));
        let mut candidate = first.saturating_add(from_offset);
        loop {
            if candidate > last || (is_v4 && candidate >= last) {
                return Err(SubnetError::Exhausted { cidr: *block });
            }
            let addr = address::from_u128(candidate, block);
            let is_gateway = addr == self.gateway
                || matches!((addr, self.gateway6), (IpAddr::V6(v6), Some(gw)) if v6 == gw);
            if candidate != first && !is_gateway && !self.is_reserved(addr) {
                return Ok(addr);
            }
            candidate = candidate
                .checked_add(1)
                .ok_or(SubnetError::Exhausted { cidr: *block })?;
        }
    }

    /// The companion IPv6 block, or the primary block when it is itself IPv6.
    fn ipv6_block(&self) -> Option<IpNet> {
        match (self.cidr, self.cidr6) {
            (_, Some(c6)) => Some(IpNet::V6(c6)),
            (IpNet::V6(_), None) => Some(self.cidr),
            (IpNet::V4(_), None) => None,
        }
    }

    /// Reserve the next free address for `name`.
    ///
    /// The scan starts two addresses into the block — past the network
    /// address and the conventional gateway — and advances linearly past
    /// existing reservations.  Requesting a name that is already reserved
    /// returns the existing reservation's handle.
    pub fn add_reservation(
        &mut self,
        name: impl Into<String>,
        comment: impl Into<String>,
    ) -> Result<ReservationId, SubnetError> {
        let name = name.into();
        if let Some(id) = self.reservation_id(&name) {
            return Ok(id);
        }
        let (mut ipv4, mut ipv6) = (None, None);
        let primary = self.cidr;
        match self.scan_free(&primary, 2)? {
            IpAddr::V4(v4) => ipv4 = Some(v4),
            IpAddr::V6(v6) => ipv6 = Some(v6),
        }
        if ipv6.is_none() {
            if let Some(block) = self.ipv6_block() {
                if let IpAddr::V6(v6) = self.scan_free(&block, 2)? {
                    ipv6 = Some(v6);
                }
            }
        }
        self.reservations.push(IpReservation {
            name,
            comment: comment.into(),
            ipv4,
            ipv6,
            aliases: Vec::new(),
        });
        Ok(ReservationId(self.reservations.len() - 1))
    }

    /// Reserve a specific address for `name`.
    pub fn add_reservation_with_ip(
        &mut self,
        name: impl Into<String>,
        addr: IpAddr,
        comment: impl Into<String>,
    ) -> Result<ReservationId, SubnetError> {
        let name = name.into();
        if let Some(id) = self.reservation_id(&name) {
            return Ok(id);
        }
        if !self.contains(addr) {
            return Err(SubnetError::AddressNotInSubnet { address: addr, cidr: self.cidr });
        }
        if self.is_reserved(addr) {
            return Err(SubnetError::DuplicateAddress {
                address: addr,
                subnet: self.name.clone(),
            });
        }
        let (ipv4, ipv6) = match addr {
            IpAddr::V4(v4) => (Some(v4), None),
            IpAddr::V6(v6) => (None, Some(v6)),
        };
        self.reservations.push(IpReservation {
            name,
            comment: comment.into(),
            ipv4,
            ipv6,
            aliases: Vec::new(),
        });
        Ok(ReservationId(self.reservations.len() - 1))
    }

    /// Reserve the address formed by the subnet's IPv4 network prefix with
    /// the final octet overwritten.
    ///
    /// Used for migration-pinned addresses (load-balancer pools) whose last
    /// octet must survive upgrades; the result is deterministic regardless of
    /// what else is reserved.
    pub fn add_reservation_with_pin(
        &mut self,
        name: impl Into<String>,
        comment: impl Into<String>,
        last_octet: u8,
    ) -> Result<ReservationId, SubnetError> {
        let name = name.into();
        if let Some(id) = self.reservation_id(&name) {
            return Ok(id);
        }
        let IpNet::V4(v4net) = self.cidr else {
            return Err(SubnetError::NoIpv4Block(self.name.clone()));
        };
        let mut octets = v4net.network().octets();
        octets[3] = last_octet;
        let pinned = Ipv4Addr::from(octets);
        if self.is_reserved(IpAddr::V4(pinned)) {
            return Err(SubnetError::DuplicateAddress {
                address: IpAddr::V4(pinned),
                subnet: self.name.clone(),
            });
        }
        self.reservations.push(IpReservation {
            name,
            comment: comment.into(),
            ipv4: Some(pinned),
            ipv6: None,
            aliases: Vec::new(),
        });
        Ok(ReservationId(self.reservations.len() - 1))
    }

    /// First free IPv4 address: never the network address, the gateway, the
    /// broadcast address, or any reservation.
    pub fn next_free_ipv4(&self) -> Result<Ipv4Addr, SubnetError> {
        let IpNet::V4(_) = self.cidr else {
            return Err(SubnetError::NoIpv4Block(self.name.clone()));
        };
        let primary = self.cidr;
        match self.scan_free(&primary, 0)? {
            IpAddr::V4(v4) => Ok(v4),
            IpAddr::V6(_) => unreachable!("IPv4 block yielded an IPv6 address"),
        }
    }

    /// First free IPv6 address, from the companion block when present.
    pub fn next_free_ipv6(&self) -> Result<Ipv6Addr, SubnetError> {
        let block = self
            .ipv6_block()
            .ok_or_else(|| SubnetError::NoIpv6Block(self.name.clone()))?;
        match self.scan_free(&block, 0)? {
            IpAddr::V6(v6) => Ok(v6),
            IpAddr::V4(_) => unreachable!("IPv6 block yielded an IPv4 address"),
        }
    }

    /// Derive the DHCP lease range from the current reservation count.
    ///
    /// The range starts past the reservation-occupied prefix of the block
    /// (and never earlier than ten addresses in).  It normally runs to the
    /// address before the broadcast; with `capped` it runs a fixed 200
    /// addresses instead, for blocks whose mask has been widened by the
    /// supernet compatibility mode and whose broadcast is therefore
    /// unreliable.
    pub fn update_dhcp_range(&mut self, capped: bool) -> Result<(), SubnetError> {
        let usable = address::usable_hosts(&self.cidr);
        if usable == 0 {
            return Err(SubnetError::Exhausted { cidr: self.cidr });
        }
        let count = self.reservations.len();
        if count as u128 > usable {
            return Err(SubnetError::TooManyReservations {
                count,
                usable,
                cidr: self.cidr,
            });
        }

        let start_offset = MIN_DHCP_START_OFFSET.max(count as u128 + 2);
        let start = address::advance(&self.cidr, start_offset);

        let last = address::to_u128(self.cidr.broadcast());
        let end_value = if capped {
            (address::to_u128(start) + CAPPED_DHCP_RANGE_LEN).min(last - 1)
        } else {
            last - 1
        };
        self.dhcp_start = Some(start);
        self.dhcp_end = Some(address::from_u128(end_value, &self.cidr));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn subnet(cidr: &str) -> Subnet {
        Subnet::new("bootstrap_dhcp", "Bootstrap DHCP Subnet", cidr.parse().unwrap(), VlanId::UNTAGGED)
    }

    #[test]
    fn test_new_normalizes_and_derives_gateway() {
        let s = subnet("10.92.100.17/24");
        assert_eq!(s.cidr, "10.92.100.0/24".parse::<IpNet>().unwrap());
        assert_eq!(s.gateway, "10.92.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_reservations_start_past_gateway() {
        let mut s = subnet("10.252.0.0/17");
        let id = s.add_reservation("ncn-m001", "x3000c0s1b0n0").unwrap();
        assert_eq!(
            s.reservation(id).unwrap().ipv4,
            Some("10.252.0.2".parse().unwrap()),
        );
        let id = s.add_reservation("ncn-m002", "x3000c0s3b0n0").unwrap();
        assert_eq!(
            s.reservation(id).unwrap().ipv4,
            Some("10.252.0.3".parse().unwrap()),
        );
    }

    #[test]
    fn test_reservation_is_idempotent_by_name() {
        let mut s = subnet("10.252.0.0/17");
        let first = s.add_reservation("ncn-m001", "x3000c0s1b0n0").unwrap();
        let again = s.add_reservation("ncn-m001", "x3000c0s1b0n0").unwrap();
        assert_eq!(first, again);
        assert_eq!(s.reservations().len(), 1);
    }

    #[test]
    fn test_reservation_scan_skips_reserved_addresses() {
        let mut s = subnet("10.0.0.0/24");
        s.add_reservation_with_ip("pinned", "10.0.0.2".parse().unwrap(), "")
            .unwrap();
        s.add_reservation_with_ip("pinned-too", "10.0.0.3".parse().unwrap(), "")
            .unwrap();
        let id = s.add_reservation("next", "").unwrap();
        assert_eq!(s.reservation(id).unwrap().ipv4, Some("10.0.0.4".parse().unwrap()));
    }

    #[test]
    fn test_reservation_with_ip_checks_containment() {
        let mut s = subnet("10.0.0.0/24");
        assert_eq!(
            s.add_reservation_with_ip("outside", "10.0.1.1".parse().unwrap(), ""),
            Err(SubnetError::AddressNotInSubnet {
                address: "10.0.1.1".parse().unwrap(),
                cidr: "10.0.0.0/24".parse().unwrap(),
            }),
        );
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut s = subnet("10.0.0.0/24");
        s.add_reservation_with_ip("one", "10.0.0.50".parse().unwrap(), "").unwrap();
        assert_eq!(
            s.add_reservation_with_ip("two", "10.0.0.50".parse().unwrap(), ""),
            Err(SubnetError::DuplicateAddress {
                address: "10.0.0.50".parse().unwrap(),
                subnet: "bootstrap_dhcp".to_string(),
            }),
        );
    }

    #[test]
    fn test_pinned_reservation_is_deterministic() {
        let mut s = subnet("10.92.100.0/24");
        // Unrelated reservations must not shift the pinned address.
        s.add_reservation("filler-1", "").unwrap();
        s.add_reservation("filler-2", "").unwrap();
        let id = s
            .add_reservation_with_pin("istio-ingressgateway", "api-gw-service", 71)
            .unwrap();
        assert_eq!(
            s.reservation(id).unwrap().ipv4,
            Some("10.92.100.71".parse().unwrap()),
        );
    }

    #[test]
    fn test_next_free_skips_root_gateway_and_broadcast() {
        let s = subnet("10.0.0.0/30");
        // Only .1 (gateway) and .2 are hosts; the first free is .2.
        assert_eq!(s.next_free_ipv4().unwrap(), "10.0.0.2".parse::<Ipv4Addr>().unwrap());

        let mut s = subnet("10.0.0.0/30");
        s.add_reservation_with_ip("taken", "10.0.0.2".parse().unwrap(), "").unwrap();
        // Root, gateway, and broadcast are never returned even when nothing
        // else is left.
        assert_eq!(
            s.next_free_ipv4(),
            Err(SubnetError::Exhausted { cidr: "10.0.0.0/30".parse().unwrap() }),
        );
    }

    #[test]
    fn test_next_free_ipv6_uses_companion_block() {
        let s = subnet("10.0.0.0/24")
            .with_ipv6("fd66:0:0:7::/64".parse().unwrap());
        assert_eq!(
            s.next_free_ipv6().unwrap(),
            "fd66:0:0:7::2".parse::<Ipv6Addr>().unwrap(),
        );

        let v4_only = subnet("10.0.0.0/24");
        assert_eq!(
            v4_only.next_free_ipv6(),
            Err(SubnetError::NoIpv6Block("bootstrap_dhcp".to_string())),
        );
    }

    #[test]
    fn test_dual_stack_reservation_gets_both_families() {
        let mut s = subnet("10.0.0.0/24")
            .with_ipv6("fd66:0:0:7::/64".parse().unwrap());
        let id = s.add_reservation("ncn-w001", "x3000c0s4b0n0").unwrap();
        let r = s.reservation(id).unwrap();
        assert_eq!(r.ipv4, Some("10.0.0.2".parse().unwrap()));
        assert_eq!(r.ipv6, Some("fd66:0:0:7::2".parse().unwrap()));
    }

    #[test]
    fn test_dhcp_range_with_few_reservations() {
        let mut s = subnet("10.0.0.0/24");
        s.add_reservation("only-one", "").unwrap();
        s.update_dhcp_range(false).unwrap();
        // One reservation still leaves the floor of ten addresses.
        assert_eq!(s.dhcp_start, Some("10.0.0.10".parse().unwrap()));
        assert_eq!(s.dhcp_end, Some("10.0.0.254".parse().unwrap()));
    }

    #[test]
    fn test_dhcp_range_tracks_reservation_count() {
        let mut s = subnet("10.0.0.0/24");
        for i in 0..20 {
            s.add_reservation(format!("ncn-{i}"), "").unwrap();
        }
        s.update_dhcp_range(false).unwrap();
        // 20 reservations push the start to root + 22.
        assert_eq!(s.dhcp_start, Some("10.0.0.22".parse().unwrap()));
    }

    #[test]
    fn test_dhcp_range_capped_mode() {
        let mut s = subnet("10.0.0.0/16");
        s.update_dhcp_range(true).unwrap();
        assert_eq!(s.dhcp_start, Some("10.0.0.10".parse().unwrap()));
        assert_eq!(s.dhcp_end, Some("10.0.0.210".parse().unwrap()));
    }

    #[test]
    fn test_dhcp_range_overflow_detected() {
        let mut s = subnet("10.0.0.0/29");
        // A /29 has 6 usable addresses; pin 7 distinct addresses to trip the
        // guard (pins bypass the free-address scan).
        for octet in [0u8, 2, 3, 4, 5, 6, 7] {
            s.add_reservation_with_pin(format!("pin-{octet}"), "", octet).unwrap();
        }
        assert_eq!(
            s.update_dhcp_range(false),
            Err(SubnetError::TooManyReservations {
                count: 7,
                usable: 6,
                cidr: "10.0.0.0/29".parse().unwrap(),
            }),
        );
    }

    #[test]
    fn test_handles_survive_growth() {
        let mut s = subnet("10.0.0.0/24");
        let early = s.add_reservation("early", "").unwrap();
        for i in 0..100 {
            s.add_reservation(format!("filler-{i}"), "").unwrap();
        }
        s.reservation_mut(early).unwrap().aliases.push("early.local".to_string());
        assert_eq!(s.reservation(early).unwrap().name, "early");
        assert_eq!(s.reservation(early).unwrap().aliases, vec!["early.local".to_string()]);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut s = subnet("10.92.100.0/24");
        s.pool_name = Some("node-management".to_string());
        s.add_reservation_with_pin("istio-ingressgateway", "api-gw-service", 71).unwrap();
        s.update_dhcp_range(false).unwrap();

        let json = serde_json::to_string(&s).unwrap();
        let back: Subnet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cidr, s.cidr);
        assert_eq!(back.gateway, s.gateway);
        assert_eq!(back.pool_name, s.pool_name);
        assert_eq!(back.reservations(), s.reservations());
    }
}
