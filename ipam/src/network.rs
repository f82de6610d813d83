// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The named-network model: a top-level CIDR block that exclusively owns the
//! subnets carved from it.
//!
//! Every insertion path — allocator-driven or explicit-CIDR — enforces the
//! network invariant: owned subnets are contained in the network's block and
//! pairwise disjoint.  Subnets are addressed through [`SubnetId`] handles.

use crate::allocator::{self, AllocError};
use crate::subnet::Subnet;
use gridiron_common::address;
use gridiron_common::vlan::VlanId;
use ipnet::{IpNet, Ipv6Net};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error("subnet {subnet} is not contained in network {network}")]
    SubnetNotContained { subnet: IpNet, network: IpNet },

    #[error("subnet {subnet} overlaps existing subnet {existing}")]
    SubnetOverlap { subnet: IpNet, existing: IpNet },
}

/// Stable handle to a subnet within its owning [`Network`].
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
pub struct SubnetId(usize);

/// Link media of a network.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Ethernet,
    Slingshot,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Ethernet => write!(f, "ethernet"),
            Self::Slingshot => write!(f, "slingshot"),
        }
    }
}

/// A named logical network and the subnets carved from it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Network {
    /// Short key, e.g. "NMN".
    pub name: String,
    pub full_name: String,
    pub cidr: IpNet,
    /// Companion IPv6 block for dual-stack networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr6: Option<Ipv6Net>,
    pub mtu: u32,
    pub media: MediaType,
    /// Observed (lowest, highest) VLAN actually assigned to owned subnets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_range: Option<(VlanId, VlanId)>,
    /// BGP ASN this network peers from, when it participates in peering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_asn: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_asn: Option<u32>,
    /// Whether this network carries the system default route.
    #[serde(default)]
    pub default_route: bool,
    #[serde(default)]
    subnets: Vec<Subnet>,
}

impl Network {
    pub fn new(
        name: impl Into<String>,
        full_name: impl Into<String>,
        cidr: IpNet,
        mtu: u32,
        media: MediaType,
    ) -> Network {
        Network {
            name: name.into(),
            full_name: full_name.into(),
            cidr: cidr.trunc(),
            cidr6: None,
            mtu,
            media,
            vlan_range: None,
            my_asn: None,
            peer_asn: None,
            default_route: false,
            subnets: Vec::new(),
        }
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    /// Mutable view of every owned subnet.  The set itself (and each
    /// subnet's CIDR invariants) can only be changed through the carve-out
    /// entry points; this exists for post-processing passes that rewrite
    /// subnet attributes in place.
    pub fn subnets_mut(&mut self) -> &mut [Subnet] {
        &mut self.subnets
    }

    pub fn subnet(&self, id: SubnetId) -> Option<&Subnet> {
        self.subnets.get(id.0)
    }

    pub fn subnet_mut(&mut self, id: SubnetId) -> Option<&mut Subnet> {
        self.subnets.get_mut(id.0)
    }

    pub fn subnet_id(&self, name: &str) -> Option<SubnetId> {
        self.subnets.iter().position(|s| s.name == name).map(SubnetId)
    }

    pub fn subnet_by_name(&self, name: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.name == name)
    }

    pub fn subnet_mut_by_name(&mut self, name: &str) -> Option<&mut Subnet> {
        self.subnets.iter_mut().find(|s| s.name == name)
    }

    /// CIDRs of every owned subnet, in insertion order.
    pub fn allocated(&self) -> Vec<IpNet> {
        self.subnets.iter().map(|s| s.cidr).collect()
    }

    /// Carve a `/prefix_len` subnet out of the free space of this network.
    pub fn add_subnet(
        &mut self,
        prefix_len: u8,
        name: impl Into<String>,
        full_name: impl Into<String>,
        vlan: VlanId,
    ) -> Result<SubnetId, NetworkError> {
        let cidr = allocator::free(self.cidr, prefix_len, &self.allocated())?;
        Ok(self.insert(Subnet::new(name, full_name, cidr, vlan)))
    }

    /// Carve the largest subnet between `/desired_len` and `/floor_len` that
    /// still fits.
    pub fn add_biggest_subnet(
        &mut self,
        desired_len: u8,
        floor_len: u8,
        name: impl Into<String>,
        full_name: impl Into<String>,
        vlan: VlanId,
    ) -> Result<SubnetId, NetworkError> {
        let cidr =
            allocator::biggest_fit(self.cidr, desired_len, floor_len, &self.allocated())?;
        Ok(self.insert(Subnet::new(name, full_name, cidr, vlan)))
    }

    /// Adopt an explicitly-specified block as a subnet (static/dynamic pool
    /// carve-outs), validating containment and disjointness.
    pub fn add_subnet_by_cidr(
        &mut self,
        cidr: IpNet,
        name: impl Into<String>,
        full_name: impl Into<String>,
        vlan: VlanId,
    ) -> Result<SubnetId, NetworkError> {
        let cidr = cidr.trunc();
        if !address::contains(&self.cidr, &cidr) {
            return Err(NetworkError::SubnetNotContained { subnet: cidr, network: self.cidr });
        }
        let start = address::to_u128(cidr.network());
        let end = address::to_u128(cidr.broadcast());
        for existing in &self.subnets {
            let e_start = address::to_u128(existing.cidr.network());
            let e_end = address::to_u128(existing.cidr.broadcast());
            if start <= e_end && e_start <= end {
                return Err(NetworkError::SubnetOverlap {
                    subnet: cidr,
                    existing: existing.cidr,
                });
            }
        }
        Ok(self.insert(Subnet::new(name, full_name, cidr, vlan)))
    }

    fn insert(&mut self, subnet: Subnet) -> SubnetId {
        self.subnets.push(subnet);
        SubnetId(self.subnets.len() - 1)
    }

    /// Fold an assigned VLAN into the observed range.  Untagged subnets do
    /// not contribute.
    pub fn record_vlan(&mut self, vlan: VlanId) {
        if vlan.is_untagged() {
            return;
        }
        self.vlan_range = Some(match self.vlan_range {
            None => (vlan, vlan),
            Some((lo, hi)) => (lo.min(vlan), hi.max(vlan)),
        });
    }
}
