// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cabinet inventory: manufacturing-supplied facts that drive per-cabinet
//! subnet generation.  Read-only input to the builder.

use gridiron_common::vlan::VlanId;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumIter, EnumString};

/// Cabinet hardware class.  Hill cabinets are planned on the mountain
/// networks.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    Display,
    EnumIter,
    EnumString,
    Hash,
    PartialEq,
    Eq,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CabinetClass {
    River,
    Mountain,
    Hill,
}

/// Which per-cabinet override column applies to a network being subdivided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CabinetNetwork {
    Nmn,
    Hmn,
}

/// Per-cabinet facts, including optional pre-assigned subnets and VLANs
/// carried over from an existing installation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CabinetDetail {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nmn_subnet: Option<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nmn_vlan: Option<VlanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmn_subnet: Option<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmn_vlan: Option<VlanId>,
}

impl CabinetDetail {
    pub fn subnet_override(&self, network: CabinetNetwork) -> Option<IpNet> {
        match network {
            CabinetNetwork::Nmn => self.nmn_subnet,
            CabinetNetwork::Hmn => self.hmn_subnet,
        }
    }

    pub fn vlan_override(&self, network: CabinetNetwork) -> Option<VlanId> {
        match network {
            CabinetNetwork::Nmn => self.nmn_vlan,
            CabinetNetwork::Hmn => self.hmn_vlan,
        }
    }
}

fn default_cabinet_prefix() -> u8 {
    22
}

/// A group of like cabinets: a count and starting ID, plus any explicit
/// per-cabinet details.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CabinetGroupDetail {
    pub class: CabinetClass,
    pub count: u32,
    pub starting_id: u32,
    /// Prefix length of each per-cabinet block.
    #[serde(default = "default_cabinet_prefix")]
    pub subnet_prefix: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<CabinetDetail>,
}

impl CabinetGroupDetail {
    /// Every cabinet ID in this group, ascending: the generated
    /// `starting_id..starting_id + count` range plus any explicitly-listed
    /// cabinet outside it.
    pub fn cabinet_ids(&self) -> Vec<u32> {
        let mut ids: BTreeSet<u32> =
            (self.starting_id..self.starting_id + self.count).collect();
        ids.extend(self.details.iter().map(|d| d.id));
        ids.into_iter().collect()
    }

    pub fn detail(&self, id: u32) -> Option<&CabinetDetail> {
        self.details.iter().find(|d| d.id == id)
    }
}

/// Subnet name for a cabinet, e.g. `cabinet_3000`.
pub fn cabinet_name(id: u32) -> String {
    format!("cabinet_{id}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cabinet_ids_from_count() {
        let group = CabinetGroupDetail {
            class: CabinetClass::River,
            count: 4,
            starting_id: 3000,
            subnet_prefix: 22,
            details: Vec::new(),
        };
        assert_eq!(group.cabinet_ids(), vec![3000, 3001, 3002, 3003]);
    }

    #[test]
    fn test_explicit_details_extend_the_range() {
        let group = CabinetGroupDetail {
            class: CabinetClass::Mountain,
            count: 2,
            starting_id: 1000,
            subnet_prefix: 22,
            details: vec![
                CabinetDetail { id: 1004, ..Default::default() },
                // Already inside the generated range; must not duplicate.
                CabinetDetail { id: 1001, ..Default::default() },
            ],
        };
        assert_eq!(group.cabinet_ids(), vec![1000, 1001, 1004]);
    }

    #[test]
    fn test_overrides_select_by_network() {
        let detail = CabinetDetail {
            id: 3000,
            nmn_subnet: Some("10.106.0.0/22".parse().unwrap()),
            nmn_vlan: Some(VlanId::new(1777).unwrap()),
            hmn_subnet: None,
            hmn_vlan: None,
        };
        assert_eq!(
            detail.subnet_override(CabinetNetwork::Nmn),
            Some("10.106.0.0/22".parse().unwrap()),
        );
        assert_eq!(detail.subnet_override(CabinetNetwork::Hmn), None);
        assert_eq!(
            detail.vlan_override(CabinetNetwork::Nmn),
            Some(VlanId::new(1777).unwrap()),
        );
    }

    #[test]
    fn test_cabinet_name() {
        assert_eq!(cabinet_name(3000), "cabinet_3000");
    }

    #[test]
    fn test_group_serde_defaults() {
        let json = r#"{"class": "river", "count": 2, "starting_id": 3000}"#;
        let group: CabinetGroupDetail = serde_json::from_str(json).unwrap();
        assert_eq!(group.subnet_prefix, 22);
        assert!(group.details.is_empty());
    }
}
