// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network blueprints and configuration overrides.
//!
//! Each logical network starts from a built-in blueprint — default CIDR,
//! VLAN, and the feature switches that drive the builder.  An [`Overrides`]
//! map of string-valued settings (the shape the embedding CLI hands us)
//! replaces any default; missing keys fall back to the blueprint.

use crate::builder::PlannerError;
use crate::cabinets::{CabinetClass, CabinetNetwork};
use gridiron_common::vlan::VlanId;
use gridiron_ipam::network::MediaType;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Default MTU for management networks.
pub const DEFAULT_MTU: u32 = 9000;

/// How the planner handles deployments migrating from flat-network switch
/// configurations.
///
/// `SupernetHack` makes selected subnets adopt their parent network's
/// gateway and prefix length, deliberately creating overlapping broadcast
/// domains for the duration of a migration window.  It is never the
/// default.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityMode {
    #[default]
    Standard,
    SupernetHack,
}

impl CompatibilityMode {
    pub fn is_supernet_hack(&self) -> bool {
        matches!(self, CompatibilityMode::SupernetHack)
    }
}

/// Per-cabinet subdivision settings for a network blueprint.
#[derive(Clone, Copy, Debug)]
pub struct CabinetSubdivision {
    /// Which per-cabinet override column applies.
    pub network: CabinetNetwork,
    /// Which cabinet class this network serves.
    pub class: CabinetClass,
    /// First VLAN of the sequential per-cabinet assignment.
    pub base_vlan: u16,
}

/// Template for one logical network.
#[derive(Clone, Debug)]
pub struct NetworkBlueprint {
    pub name: &'static str,
    pub full_name: &'static str,
    pub cidr: &'static str,
    /// Companion IPv6 block for dual-stack networks.
    pub cidr6: Option<&'static str>,
    pub vlan: u16,
    pub mtu: u32,
    pub media: MediaType,
    /// Carries the system default route.
    pub default_route: bool,
    /// Local ASN when this network participates in BGP peering.
    pub my_asn: Option<u32>,
    /// Carve a `network_hardware` subnet with per-switch reservations.
    pub hardware_subnet: bool,
    /// Carve a `bootstrap_dhcp` subnet (largest fit) with service VIPs.
    pub bootstrap_dhcp: bool,
    /// Carve the fixed /23 `uai_macvlan` subnet with its service table.
    pub uai_macvlan: bool,
    /// Subdivide into per-cabinet subnets.
    pub cabinets: Option<CabinetSubdivision>,
    /// Serve this load-balancer pool from the network's whole block.
    pub lb_pool: Option<&'static str>,
}

impl NetworkBlueprint {
    fn new(
        name: &'static str,
        full_name: &'static str,
        cidr: &'static str,
        vlan: u16,
    ) -> NetworkBlueprint {
        NetworkBlueprint {
            name,
            full_name,
            cidr,
            cidr6: None,
            vlan,
            mtu: DEFAULT_MTU,
            media: MediaType::Ethernet,
            default_route: false,
            my_asn: None,
            hardware_subnet: false,
            bootstrap_dhcp: false,
            uai_macvlan: false,
            cabinets: None,
            lb_pool: None,
        }
    }
}

/// The built-in network table.
///
/// Every CIDR and VLAN here is a documented default, replaceable through
/// [`Overrides`].
pub fn default_blueprints() -> Vec<NetworkBlueprint> {
    vec![
        NetworkBlueprint {
            hardware_subnet: true,
            bootstrap_dhcp: true,
            ..NetworkBlueprint::new("MTL", "Provisioning Network", "10.1.0.0/16", 0)
        },
        NetworkBlueprint {
            hardware_subnet: true,
            bootstrap_dhcp: true,
            uai_macvlan: true,
            ..NetworkBlueprint::new("NMN", "Node Management Network", "10.252.0.0/17", 2)
        },
        NetworkBlueprint {
            hardware_subnet: true,
            bootstrap_dhcp: true,
            ..NetworkBlueprint::new("HMN", "Hardware Management Network", "10.254.0.0/17", 4)
        },
        NetworkBlueprint {
            bootstrap_dhcp: true,
            default_route: true,
            my_asn: Some(65530),
            ..NetworkBlueprint::new("CAN", "Customer Access Network", "10.102.11.0/24", 7)
        },
        NetworkBlueprint {
            bootstrap_dhcp: true,
            my_asn: Some(65532),
            ..NetworkBlueprint::new("CMN", "Customer Management Network", "10.103.11.0/24", 6)
        },
        NetworkBlueprint {
            bootstrap_dhcp: true,
            my_asn: Some(65531),
            cidr6: Some("fd66:0:0:7::/64"),
            ..NetworkBlueprint::new("CHN", "Customer High-Speed Network", "10.108.7.0/24", 5)
        },
        NetworkBlueprint {
            media: MediaType::Slingshot,
            ..NetworkBlueprint::new("HSN", "High-Speed Network", "10.253.0.0/16", 0)
        },
        NetworkBlueprint {
            cabinets: Some(CabinetSubdivision {
                network: CabinetNetwork::Nmn,
                class: CabinetClass::River,
                base_vlan: 1770,
            }),
            ..NetworkBlueprint::new(
                "NMN_RVR",
                "River Node Management Network",
                "10.106.0.0/17",
                1770,
            )
        },
        NetworkBlueprint {
            cabinets: Some(CabinetSubdivision {
                network: CabinetNetwork::Nmn,
                class: CabinetClass::Mountain,
                base_vlan: 3000,
            }),
            ..NetworkBlueprint::new(
                "NMN_MTN",
                "Mountain Node Management Network",
                "10.100.0.0/17",
                3000,
            )
        },
        NetworkBlueprint {
            cabinets: Some(CabinetSubdivision {
                network: CabinetNetwork::Hmn,
                class: CabinetClass::River,
                base_vlan: 1513,
            }),
            ..NetworkBlueprint::new(
                "HMN_RVR",
                "River Hardware Management Network",
                "10.107.0.0/17",
                1513,
            )
        },
        NetworkBlueprint {
            cabinets: Some(CabinetSubdivision {
                network: CabinetNetwork::Hmn,
                class: CabinetClass::Mountain,
                base_vlan: 3500,
            }),
            ..NetworkBlueprint::new(
                "HMN_MTN",
                "Mountain Hardware Management Network",
                "10.104.0.0/17",
                3500,
            )
        },
        NetworkBlueprint {
            lb_pool: Some("node-management"),
            ..NetworkBlueprint::new(
                "NMNLB",
                "Node Management Network Load Balancers",
                "10.92.100.0/24",
                0,
            )
        },
        NetworkBlueprint {
            lb_pool: Some("hardware-management"),
            ..NetworkBlueprint::new(
                "HMNLB",
                "Hardware Management Network Load Balancers",
                "10.94.100.0/24",
                0,
            )
        },
    ]
}

/// String-keyed configuration overrides, as supplied by the embedding CLI.
///
/// Keys follow the `<network>-<setting>` convention (lowercased network
/// name), e.g. `can-cidr`, `nmn-bootstrap-vlan`, `bgp-cmn-asn`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Overrides {
    values: BTreeMap<String, String>,
}

impl Overrides {
    pub fn new() -> Overrides {
        Overrides::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    fn parse_value<T>(&self, key: String) -> Result<Option<T>, PlannerError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.values.get(&key) else {
            return Ok(None);
        };
        raw.parse::<T>().map(Some).map_err(|e| PlannerError::BadOverride {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
    }

    /// `<network>-cidr`
    pub fn cidr(&self, network: &str) -> Result<Option<IpNet>, PlannerError> {
        self.parse_value(format!("{}-cidr", network.to_lowercase()))
    }

    /// `<network>-gateway`
    pub fn gateway(&self, network: &str) -> Result<Option<IpAddr>, PlannerError> {
        self.parse_value(format!("{}-gateway", network.to_lowercase()))
    }

    /// `<network>-static-pool`
    pub fn static_pool(&self, network: &str) -> Result<Option<IpNet>, PlannerError> {
        self.parse_value(format!("{}-static-pool", network.to_lowercase()))
    }

    /// `<network>-dynamic-pool`
    pub fn dynamic_pool(&self, network: &str) -> Result<Option<IpNet>, PlannerError> {
        self.parse_value(format!("{}-dynamic-pool", network.to_lowercase()))
    }

    /// `<network>-bootstrap-vlan`
    pub fn bootstrap_vlan(&self, network: &str) -> Result<Option<VlanId>, PlannerError> {
        self.parse_value(format!("{}-bootstrap-vlan", network.to_lowercase()))
    }

    /// `bgp-<network>-asn`
    pub fn bgp_asn(&self, network: &str) -> Result<Option<u32>, PlannerError> {
        self.parse_value(format!("bgp-{}-asn", network.to_lowercase()))
    }
}
