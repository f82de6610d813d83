// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Gridiron common facilities
//!
//! Gridiron plans the management networks of an HPC cluster: given top-level
//! CIDR blocks, cabinet inventory, and management-switch inventory, it carves
//! non-overlapping subnets, reserves per-device addresses, and assigns VLANs.
//! This crate implements the facilities shared by the allocator
//! (`gridiron-ipam`) and the topology builder (`gridiron-planner`): address
//! arithmetic over IPv4 and IPv6 prefixes, and VLAN identifier bookkeeping.
//!
//! Everything here is a pure, synchronous computation.  Nothing in this crate
//! performs I/O, logs, or exits; failures are returned as typed errors.

pub mod address;
pub mod vlan;
