// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Gridiron planner
//!
//! Composes the management networks of a cluster from built-in per-network
//! blueprints, a configuration override map, cabinet inventory, and
//! management-switch inventory.  The output is a map of fully populated
//! [`gridiron_ipam::Network`] values — subnets carved, addresses reserved,
//! VLANs assigned — ready to serialize for downstream DHCP/DNS generators.
//!
//! The planner is a pure computation over its inputs: no I/O, no process
//! exits.  Every failure propagates to the caller as a [`PlannerError`]; the
//! embedding CLI decides what is fatal.

pub mod builder;
pub mod cabinets;
pub mod config;
pub mod switches;

pub use builder::{PlannerError, Topology, TopologyBuilder};
pub use cabinets::{CabinetClass, CabinetDetail, CabinetGroupDetail, CabinetNetwork};
pub use config::{CabinetSubdivision, CompatibilityMode, NetworkBlueprint, Overrides};
pub use switches::{ManagementSwitch, SwitchBrand, SwitchRole};
