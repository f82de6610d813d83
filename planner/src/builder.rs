// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topology generation: turn blueprints, overrides, and hardware inventory
//! into fully-populated networks.

use crate::cabinets::{cabinet_name, CabinetClass, CabinetGroupDetail};
use crate::config::{
    default_blueprints, CabinetSubdivision, CompatibilityMode, NetworkBlueprint,
    Overrides,
};
use crate::switches::{reservation_name, ManagementSwitch, SwitchRole};
use gridiron_common::address;
use gridiron_common::vlan::{VlanError, VlanId, VlanRegistry};
use gridiron_ipam::allocator::AllocError;
use gridiron_ipam::network::{Network, NetworkError};
use gridiron_ipam::subnet::SubnetError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use slog::{debug, info, o, warn, Logger};
use std::collections::BTreeMap;
use std::net::IpAddr;
use thiserror::Error;

/// Prefix length of the `network_hardware` subnet.
const HARDWARE_SUBNET_PREFIX: u8 = 24;

/// Preferred prefix length of the `bootstrap_dhcp` subnet.
const BOOTSTRAP_DESIRED_PREFIX: u8 = 24;

/// Smallest `bootstrap_dhcp` subnet worth creating before giving up.
const SMALLEST_BOOTSTRAP_PREFIX: u8 = 29;

/// The `uai_macvlan` subnet is always a /23.
const UAI_MACVLAN_PREFIX: u8 = 23;

/// ASN of the site-side peer for networks that speak BGP.
const DEFAULT_PEER_ASN: u32 = 65533;

/// Well-known UAI service endpoints reserved in the `uai_macvlan` subnet,
/// with their DNS aliases.
const UAI_SERVICES: [(&str, &[&str]); 5] = [
    ("uai_macvlan_bridge", &[]),
    ("slurmctld_service", &["slurmctld-service", "slurmctld-service.local"]),
    ("slurmdbd_service", &["slurmdbd-service", "slurmdbd-service.local"]),
    ("pbs_service", &["pbs-service", "pbs-service.local"]),
    ("pbs_comm_service", &["pbs-comm-service", "pbs-comm-service.local"]),
];

/// Load-balancer reservations whose final octet must survive migration from
/// earlier installations.  Only applied under
/// [`CompatibilityMode::SupernetHack`].
const NMNLB_PINNED: [(&str, u8, &[&str]); 4] = [
    (
        "istio-ingressgateway",
        71,
        &["api-gw-service", "api-gw-service-nmn.local", "packages", "registry"],
    ),
    ("istio-ingressgateway-local", 81, &["api-gw-service.local"]),
    ("rsyslog-aggregator", 72, &["rsyslog-agg-service"]),
    ("cray-tftp", 60, &["tftp-service"]),
];

const HMNLB_PINNED: [(&str, u8, &[&str]); 3] = [
    ("istio-ingressgateway-hmn", 71, &["api-gw-service-hmn.local"]),
    ("rsyslog-aggregator-hmn", 72, &["rsyslog-agg-service-hmn.local"]),
    ("cray-tftp-hmn", 60, &["tftp-service-hmn.local"]),
];

fn pinned_reservations(
    network: &str,
) -> &'static [(&'static str, u8, &'static [&'static str])] {
    match network {
        "NMNLB" => &NMNLB_PINNED,
        "HMNLB" => &HMNLB_PINNED,
        _ => &[],
    }
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("bad override {key}={value:?}: {reason}")]
    BadOverride { key: String, value: String, reason: String },

    #[error("blueprint {name} carries an invalid {what}: {value:?}")]
    BadBlueprint { name: &'static str, what: &'static str, value: String },

    #[error(transparent)]
    Vlan(#[from] VlanError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Subnet(#[from] SubnetError),

    #[error(transparent)]
    Alloc(#[from] AllocError),
}

/// A completed planning run.
#[derive(Debug)]
pub struct Topology {
    /// Every built network, keyed by its short name.
    pub networks: BTreeMap<String, Network>,
    /// VLAN usage observed across the run.
    pub vlans: VlanRegistry,
}

/// Builds every configured network from blueprints, overrides, and hardware
/// inventory.  One builder performs one run; the VLAN registry it owns lives
/// and dies with it.
pub struct TopologyBuilder<'a> {
    log: Logger,
    blueprints: Vec<NetworkBlueprint>,
    overrides: Overrides,
    mode: CompatibilityMode,
    cabinets: &'a [CabinetGroupDetail],
    switches: &'a [ManagementSwitch],
    vlans: VlanRegistry,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(
        log: &Logger,
        overrides: Overrides,
        cabinets: &'a [CabinetGroupDetail],
        switches: &'a [ManagementSwitch],
    ) -> TopologyBuilder<'a> {
        TopologyBuilder {
            log: log.new(o!("component" => "topology-builder")),
            blueprints: default_blueprints(),
            overrides,
            mode: CompatibilityMode::Standard,
            cabinets,
            switches,
            vlans: VlanRegistry::new(),
        }
    }

    pub fn with_mode(mut self, mode: CompatibilityMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the built-in network table.
    pub fn with_blueprints(mut self, blueprints: Vec<NetworkBlueprint>) -> Self {
        self.blueprints = blueprints;
        self
    }

    pub fn build(mut self) -> Result<Topology, PlannerError> {
        let blueprints = std::mem::take(&mut self.blueprints);
        let mut networks = BTreeMap::new();
        for blueprint in &blueprints {
            let network = self.build_network(blueprint)?;
            info!(
                self.log, "built network";
                "network" => %network.name,
                "cidr" => %network.cidr,
                "subnets" => network.subnets().len()
            );
            networks.insert(network.name.clone(), network);
        }
        Ok(Topology { networks, vlans: self.vlans })
    }

    fn build_network(
        &mut self,
        blueprint: &NetworkBlueprint,
    ) -> Result<Network, PlannerError> {
        let cidr = match self.overrides.cidr(blueprint.name)? {
            Some(cidr) => cidr,
            None => blueprint.cidr.parse().map_err(|_| PlannerError::BadBlueprint {
                name: blueprint.name,
                what: "CIDR",
                value: blueprint.cidr.to_string(),
            })?,
        };
        let mut network = Network::new(
            blueprint.name,
            blueprint.full_name,
            cidr,
            blueprint.mtu,
            blueprint.media,
        );
        network.default_route = blueprint.default_route;
        if let Some(cidr6) = blueprint.cidr6 {
            let cidr6: Ipv6Net =
                cidr6.parse().map_err(|_| PlannerError::BadBlueprint {
                    name: blueprint.name,
                    what: "IPv6 CIDR",
                    value: cidr6.to_string(),
                })?;
            network.cidr6 = Some(cidr6);
        }
        if blueprint.my_asn.is_some() {
            network.my_asn = match self.overrides.bgp_asn(blueprint.name)? {
                Some(asn) => Some(asn),
                None => blueprint.my_asn,
            };
            network.peer_asn = Some(DEFAULT_PEER_ASN);
        }

        let base_vlan = match self.overrides.bootstrap_vlan(blueprint.name)? {
            Some(vlan) => vlan,
            None => VlanId::new(blueprint.vlan).map_err(|_| {
                PlannerError::BadBlueprint {
                    name: blueprint.name,
                    what: "VLAN",
                    value: blueprint.vlan.to_string(),
                }
            })?,
        };
        // Cabinet-subdivided networks consume a VLAN per generated subnet
        // starting at the base, so the base itself is claimed there instead.
        if blueprint.cabinets.is_none() {
            self.vlans.allocate(base_vlan)?;
        }

        let gateway_override = self.overrides.gateway(blueprint.name)?;

        if let Some(pool) = self.overrides.static_pool(blueprint.name)? {
            self.add_pool_subnet(&mut network, pool, "static", base_vlan)?;
        }
        if let Some(pool) = self.overrides.dynamic_pool(blueprint.name)? {
            self.add_pool_subnet(&mut network, pool, "dynamic", base_vlan)?;
        }
        if blueprint.hardware_subnet {
            self.add_hardware_subnet(&mut network, base_vlan, gateway_override)?;
        }
        if blueprint.bootstrap_dhcp {
            self.add_bootstrap_dhcp(&mut network, base_vlan, gateway_override)?;
        }
        if let Some(subdivision) = &blueprint.cabinets {
            self.add_cabinet_subnets(&mut network, subdivision)?;
        }
        if blueprint.uai_macvlan {
            self.add_uai_macvlan(&mut network, base_vlan)?;
        }
        if let Some(pool_name) = blueprint.lb_pool {
            self.add_lb_pool(&mut network, pool_name)?;
        }
        if self.mode.is_supernet_hack() {
            self.apply_supernet_hack(&mut network)?;
        }
        Ok(network)
    }

    /// Adopt an explicitly-configured static/dynamic pool carve-out.
    fn add_pool_subnet(
        &mut self,
        network: &mut Network,
        cidr: IpNet,
        kind: &str,
        vlan: VlanId,
    ) -> Result<(), PlannerError> {
        let stem = network.name.to_lowercase();
        let id = network.add_subnet_by_cidr(
            cidr,
            format!("{stem}_metallb_{kind}_pool"),
            format!("{} MetalLB {kind} pool", network.name),
            vlan,
        )?;
        network.record_vlan(vlan);
        let subnet = network.subnet_mut(id).expect("subnet id from insertion");
        subnet.pool_name = Some(format!("{stem}-{kind}"));
        set_pool_bounds(subnet);
        Ok(())
    }

    /// Carve the `network_hardware` subnet and reserve an address per
    /// management switch, role by role in fixed order.
    fn add_hardware_subnet(
        &mut self,
        network: &mut Network,
        vlan: VlanId,
        gateway_override: Option<IpAddr>,
    ) -> Result<(), PlannerError> {
        let id = network.add_subnet(
            HARDWARE_SUBNET_PREFIX,
            "network_hardware",
            "Network Infrastructure",
            vlan,
        )?;
        network.record_vlan(vlan);
        let name = network.name.clone();
        let subnet = network.subnet_mut(id).expect("subnet id from insertion");
        if let Some(gateway) = gateway_override {
            subnet.gateway = gateway;
        }
        for role in SwitchRole::HARDWARE_ORDER {
            let mut seq = 0;
            for switch in self.switches.iter().filter(|s| s.role == role) {
                seq += 1;
                subnet.add_reservation(
                    reservation_name(role, seq),
                    switch.xname.clone(),
                )?;
            }
        }
        let reserved = subnet.reservations().len();
        debug!(
            self.log, "reserved switch addresses";
            "network" => %name,
            "count" => reserved
        );
        Ok(())
    }

    /// Carve the `bootstrap_dhcp` subnet — the largest block that fits — and
    /// populate its well-known reservations.
    fn add_bootstrap_dhcp(
        &mut self,
        network: &mut Network,
        vlan: VlanId,
        gateway_override: Option<IpAddr>,
    ) -> Result<(), PlannerError> {
        let id = network.add_biggest_subnet(
            BOOTSTRAP_DESIRED_PREFIX,
            SMALLEST_BOOTSTRAP_PREFIX,
            "bootstrap_dhcp",
            "Bootstrap DHCP Subnet",
            vlan,
        )?;
        network.record_vlan(vlan);
        let name = network.name.clone();
        let cidr6 = network.cidr6;
        let subnet = network.subnet_mut(id).expect("subnet id from insertion");
        if let Some(gateway) = gateway_override {
            subnet.gateway = gateway;
        }
        if let Some(cidr6) = cidr6 {
            subnet.cidr6 = Some(cidr6);
            if let IpAddr::V6(gateway6) = address::gateway(&IpNet::V6(cidr6)) {
                subnet.gateway6 = Some(gateway6);
            }
        }

        subnet.add_reservation("kubeapi-vip", "k8s-virtual-ip")?;
        if name == "NMN" {
            subnet.add_reservation("rgw-vip", "rgw-virtual-ip")?;
        }
        let mut seq = 0;
        for switch in
            self.switches.iter().filter(|s| s.role == SwitchRole::Edge)
        {
            seq += 1;
            subnet
                .add_reservation(reservation_name(SwitchRole::Edge, seq), switch.xname.clone())?;
        }
        subnet.update_dhcp_range(false)?;
        let cidr = subnet.cidr;
        info!(
            self.log, "bootstrap DHCP subnet ready";
            "network" => %name,
            "cidr" => %cidr
        );
        Ok(())
    }

    /// Generate one subnet per cabinet of the blueprint's class, assigning
    /// sequential VLANs from the base unless the cabinet carries pre-assigned
    /// overrides.
    fn add_cabinet_subnets(
        &mut self,
        network: &mut Network,
        subdivision: &CabinetSubdivision,
    ) -> Result<(), PlannerError> {
        let mut next_vlan = subdivision.base_vlan;
        for group in self
            .cabinets
            .iter()
            .filter(|g| class_matches(g.class, subdivision.class))
        {
            for cabinet in group.cabinet_ids() {
                let detail = group.detail(cabinet);
                let vlan = match detail.and_then(|d| d.vlan_override(subdivision.network)) {
                    Some(vlan) => vlan,
                    None => {
                        let vlan = VlanId::new(next_vlan)?;
                        next_vlan += 1;
                        vlan
                    }
                };
                self.vlans.allocate(vlan)?;

                let name = cabinet_name(cabinet);
                let id = match detail.and_then(|d| d.subnet_override(subdivision.network)) {
                    Some(cidr) => network.add_subnet_by_cidr(
                        cidr,
                        name.as_str(),
                        format!("Cabinet {cabinet}"),
                        vlan,
                    )?,
                    None => network.add_subnet(
                        group.subnet_prefix,
                        name.as_str(),
                        format!("Cabinet {cabinet}"),
                        vlan,
                    )?,
                };
                network.record_vlan(vlan);
                let subnet = network.subnet_mut(id).expect("subnet id from insertion");
                subnet.update_dhcp_range(false)?;
                let cidr = subnet.cidr;
                debug!(
                    self.log, "cabinet subnet";
                    "cabinet" => %name,
                    "cidr" => %cidr,
                    "vlan" => %vlan
                );
            }
        }
        Ok(())
    }

    /// Carve the fixed /23 `uai_macvlan` subnet and reserve the well-known
    /// UAI service endpoints with their DNS aliases.
    fn add_uai_macvlan(
        &mut self,
        network: &mut Network,
        vlan: VlanId,
    ) -> Result<(), PlannerError> {
        let id = network.add_subnet(
            UAI_MACVLAN_PREFIX,
            "uai_macvlan",
            "UAI MacVLAN Subnet",
            vlan,
        )?;
        network.record_vlan(vlan);
        let subnet = network.subnet_mut(id).expect("subnet id from insertion");
        for (service, aliases) in UAI_SERVICES {
            let reservation = subnet.add_reservation(service, "uai-service-endpoint")?;
            let reservation = subnet
                .reservation_mut(reservation)
                .expect("reservation id from insertion");
            reservation.aliases = aliases.iter().map(|a| a.to_string()).collect();
        }
        // Everything past the fixed services floats: containers draw from
        // the remainder of the block.
        let pool_start = subnet.next_free_ipv4()?;
        subnet.reservation_start = Some(IpAddr::V4(pool_start));
        subnet.reservation_end = Some(address_before_broadcast(&subnet.cidr));
        subnet.update_dhcp_range(false)?;
        Ok(())
    }

    /// Dedicate the network's whole block to a load-balancer address pool.
    fn add_lb_pool(
        &mut self,
        network: &mut Network,
        pool_name: &str,
    ) -> Result<(), PlannerError> {
        let stem =
            network.name.to_lowercase().trim_end_matches("lb").to_string();
        let cidr = network.cidr;
        let full_name = format!("{} Address Pool", network.full_name);
        let id = network.add_subnet_by_cidr(
            cidr,
            format!("{stem}_metallb_address_pool"),
            full_name,
            VlanId::UNTAGGED,
        )?;
        let name = network.name.clone();
        let apply_pins = self.mode.is_supernet_hack();
        let subnet = network.subnet_mut(id).expect("subnet id from insertion");
        subnet.pool_name = Some(pool_name.to_string());
        set_pool_bounds(subnet);
        if apply_pins {
            for (service, octet, aliases) in pinned_reservations(&name) {
                let reservation =
                    subnet.add_reservation_with_pin(*service, "pinned-migration-address", *octet)?;
                let reservation = subnet
                    .reservation_mut(reservation)
                    .expect("reservation id from insertion");
                reservation.aliases = aliases.iter().map(|a| a.to_string()).collect();
            }
            let pinned = subnet.reservations().len();
            info!(
                self.log, "pinned load balancer reservations";
                "network" => %name,
                "pool" => %pool_name,
                "count" => pinned
            );
        }
        Ok(())
    }

    /// Make migration-affected subnets adopt the parent network's gateway
    /// and prefix length, deliberately widening their broadcast domains.
    ///
    /// DHCP ranges are recomputed first, in capped mode, while the subnet's
    /// own block still defines its bounds — once the mask is widened the
    /// broadcast-derived end would escape the block.
    fn apply_supernet_hack(
        &mut self,
        network: &mut Network,
    ) -> Result<(), PlannerError> {
        let parent_cidr = network.cidr;
        let parent_len = parent_cidr.prefix_len();
        let parent_gateway = address::gateway(&parent_cidr);
        let log = self.log.clone();
        for subnet in network.subnets_mut() {
            let affected = subnet.name == "bootstrap_dhcp"
                || subnet.name == "network_hardware"
                || subnet.pool_name.is_some();
            if !affected {
                continue;
            }
            if subnet.dhcp_start.is_some() {
                subnet.update_dhcp_range(true)?;
            }
            subnet.cidr = widen_prefix(&subnet.cidr, parent_len);
            subnet.gateway = parent_gateway;
            warn!(
                log, "applied supernet hack";
                "subnet" => %subnet.name,
                "cidr" => %subnet.cidr
            );
        }
        Ok(())
    }
}

fn class_matches(group: CabinetClass, target: CabinetClass) -> bool {
    // Hill cabinets are planned on the mountain networks.
    group == target
        || (target == CabinetClass::Mountain && group == CabinetClass::Hill)
}

/// The subnet's base address with the parent's (shorter) prefix length.  The
/// base is deliberately left un-normalized so serialized output still names
/// the subnet's own block.
fn widen_prefix(cidr: &IpNet, parent_len: u8) -> IpNet {
    match cidr {
        IpNet::V4(v4) => IpNet::V4(
            Ipv4Net::new(v4.network(), parent_len)
                .expect("parent prefix is shorter than the subnet's"),
        ),
        IpNet::V6(v6) => IpNet::V6(
            Ipv6Net::new(v6.network(), parent_len)
                .expect("parent prefix is shorter than the subnet's"),
        ),
    }
}

fn address_before_broadcast(cidr: &IpNet) -> IpAddr {
    address::from_u128(address::to_u128(cidr.broadcast()) - 1, cidr)
}

/// Bounds of a floating-address pool: everything between the gateway and the
/// block end.
fn set_pool_bounds(subnet: &mut gridiron_ipam::Subnet) {
    subnet.reservation_start = Some(address::advance(&subnet.cidr, 1));
    subnet.reservation_end = Some(address_before_broadcast(&subnet.cidr));
}
