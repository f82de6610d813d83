// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Gridiron IPAM
//!
//! The allocation core of gridiron: free-space subnet carving within a parent
//! block ([`allocator`]), per-subnet address reservation bookkeeping
//! ([`subnet`]), and the named-network model that owns the carved subnets
//! ([`network`]).
//!
//! Everything operates on an in-memory snapshot supplied by the caller and is
//! deterministic: the same inputs always produce the same carve-outs and
//! reservations.

pub mod allocator;
pub mod network;
pub mod subnet;

pub use allocator::AllocError;
pub use network::{MediaType, Network, NetworkError, SubnetId};
pub use subnet::{IpReservation, ReservationId, Subnet, SubnetError};
