// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Management-switch inventory.
//!
//! Switches are address-bearing only through the reservations the planner
//! creates for them; the inventory itself is a read-only input identifying
//! each switch by xname and role.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use strum::{Display, EnumIter, EnumString};

/// Where a switch sits in the management network.
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
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SwitchRole {
    Spine,
    Leaf,
    LeafBmc,
    Cdu,
    Aggregation,
    Edge,
}

impl SwitchRole {
    /// Roles that receive sequential reservations in the network-hardware
    /// subnet, in the order the reservations are created.
    pub const HARDWARE_ORDER: [SwitchRole; 4] =
        [SwitchRole::Spine, SwitchRole::Leaf, SwitchRole::LeafBmc, SwitchRole::Cdu];

    fn reservation_stem(&self) -> &'static str {
        match self {
            SwitchRole::Spine => "sw-spine",
            SwitchRole::Leaf => "sw-leaf",
            SwitchRole::LeafBmc => "sw-leaf-bmc",
            SwitchRole::Cdu => "sw-cdu",
            SwitchRole::Aggregation => "sw-agg",
            SwitchRole::Edge => "sw-edge",
        }
    }
}

/// Reservation name for the `seq`th switch of a role (1-based).
pub fn reservation_name(role: SwitchRole, seq: usize) -> String {
    format!("{}-{:03}", role.reservation_stem(), seq)
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    Display,
    EnumString,
    PartialEq,
    Eq,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SwitchBrand {
    Aruba,
    Dell,
    Mellanox,
    Arista,
}

/// A physical management switch, identified by xname.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManagementSwitch {
    pub xname: String,
    pub brand: SwitchBrand,
    #[serde(default)]
    pub model: String,
    pub role: SwitchRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_interface: Option<IpAddr>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reservation_names_are_zero_padded() {
        assert_eq!(reservation_name(SwitchRole::Spine, 1), "sw-spine-001");
        assert_eq!(reservation_name(SwitchRole::LeafBmc, 12), "sw-leaf-bmc-012");
        assert_eq!(reservation_name(SwitchRole::Cdu, 3), "sw-cdu-003");
        assert_eq!(reservation_name(SwitchRole::Edge, 100), "sw-edge-100");
    }

    #[test]
    fn test_role_string_round_trip() {
        assert_eq!(SwitchRole::LeafBmc.to_string(), "leaf-bmc");
        assert_eq!("leaf-bmc".parse::<SwitchRole>().unwrap(), SwitchRole::LeafBmc);
        assert_eq!("spine".parse::<SwitchRole>().unwrap(), SwitchRole::Spine);
        assert!("core".parse::<SwitchRole>().is_err());
    }

    #[test]
    fn test_switch_serde() {
        let json = r#"{
            "xname": "x3000c0w14",
            "brand": "aruba",
            "model": "8325",
            "role": "spine"
        }"#;
        let switch: ManagementSwitch = serde_json::from_str(json).unwrap();
        assert_eq!(switch.role, SwitchRole::Spine);
        assert_eq!(switch.brand, SwitchBrand::Aruba);
        assert_eq!(switch.management_interface, None);
    }
}
