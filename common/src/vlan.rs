// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VLAN identifiers and per-run allocation bookkeeping.
//!
//! A [`VlanRegistry`] tracks which of the 4096 802.1Q VLAN IDs a planning run
//! has handed out.  It is an owned value with the lifetime of one run — never
//! persisted, rebuilt fresh from the supplied configuration each time — so
//! independent runs (and tests) cannot interfere with each other.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The maximum valid VLAN ID.
pub const VLAN_MAX: u16 = 4095;

const VLAN_COUNT: usize = VLAN_MAX as usize + 1;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VlanError {
    #[error("VLAN {0} is out of range (valid range 0-{VLAN_MAX})")]
    OutOfRange(u16),

    #[error("VLAN {0} is already in use")]
    AlreadyUsed(u16),

    #[error("bad VLAN range: start {start} is greater than end {end}")]
    BadRange { start: u16, end: u16 },

    #[error("VLANs already in use: {0:?}")]
    RangeConflicts(Vec<u16>),

    #[error("{0:?} is not a valid VLAN ID")]
    Unparseable(String),
}

/// A validated 802.1Q VLAN ID.  Zero means untagged.
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
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// The untagged pseudo-VLAN.
    pub const UNTAGGED: VlanId = VlanId(0);

    pub fn new(id: u16) -> Result<VlanId, VlanError> {
        if id > VLAN_MAX {
            Err(VlanError::OutOfRange(id))
        } else {
            Ok(VlanId(id))
        }
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// True for VLAN 0, which is not a hardware VLAN.
    pub fn is_untagged(&self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u16> for VlanId {
    type Error = VlanError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(id: VlanId) -> u16 {
        id.0
    }
}

impl std::fmt::Display for VlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for VlanId {
    type Err = VlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .parse::<u16>()
            .map_err(|_| VlanError::Unparseable(s.to_string()))?;
        VlanId::new(id)
    }
}

/// Allocation state for every VLAN ID, scoped to a single planning run.
///
/// VLAN 0 (untagged) is always valid to allocate: any number of untagged
/// subnets may coexist, so allocating it is a no-op and it never reports as
/// in use.  Freeing is idempotent for every ID.
#[derive(Clone)]
pub struct VlanRegistry {
    used: Box<[bool; VLAN_COUNT]>,
}

impl Default for VlanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VlanRegistry {
    pub fn new() -> VlanRegistry {
        VlanRegistry { used: Box::new([false; VLAN_COUNT]) }
    }

    /// Mark `id` as in use.  Fails if it already is.
    pub fn allocate(&mut self, id: VlanId) -> Result<(), VlanError> {
        if id.is_untagged() {
            return Ok(());
        }
        let slot = &mut self.used[id.as_u16() as usize];
        if *slot {
            return Err(VlanError::AlreadyUsed(id.as_u16()));
        }
        *slot = true;
        Ok(())
    }

    /// Release `id`.  Releasing a free ID is a no-op.
    pub fn free(&mut self, id: VlanId) {
        if !id.is_untagged() {
            self.used[id.as_u16() as usize] = false;
        }
    }

    pub fn is_allocated(&self, id: VlanId) -> bool {
        self.used[id.as_u16() as usize]
    }

    /// Mark every ID in `start..=end` as in use, all-or-nothing.
    ///
    /// If any ID in the range is already in use, nothing is allocated and the
    /// error lists every conflicting ID in ascending order.
    pub fn allocate_range(&mut self, start: VlanId, end: VlanId) -> Result<(), VlanError> {
        if start > end {
            return Err(VlanError::BadRange {
                start: start.as_u16(),
                end: end.as_u16(),
            });
        }
        let conflicts: Vec<u16> = (start.as_u16()..=end.as_u16())
            .filter(|&id| id != 0 && self.used[id as usize])
            .collect();
        if !conflicts.is_empty() {
            return Err(VlanError::RangeConflicts(conflicts));
        }
        for id in start.as_u16()..=end.as_u16() {
            if id != 0 {
                self.used[id as usize] = true;
            }
        }
        Ok(())
    }

    /// Release every ID in `start..=end`, idempotently.
    pub fn free_range(&mut self, start: VlanId, end: VlanId) -> Result<(), VlanError> {
        if start > end {
            return Err(VlanError::BadRange {
                start: start.as_u16(),
                end: end.as_u16(),
            });
        }
        for id in start.as_u16()..=end.as_u16() {
            if id != 0 {
                self.used[id as usize] = false;
            }
        }
        Ok(())
    }

    /// Every currently-allocated ID, ascending.
    pub fn allocated(&self) -> Vec<VlanId> {
        self.used
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(id, _)| VlanId(id as u16))
            .collect()
    }
}

impl std::fmt::Debug for VlanRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("VlanRegistry").field("allocated", &self.allocated()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    #[test]
    fn test_vlan_id_range() {
        assert!(VlanId::new(0).is_ok());
        assert!(VlanId::new(VLAN_MAX).is_ok());
        assert_eq!(VlanId::new(4096), Err(VlanError::OutOfRange(4096)));
    }

    #[test]
    fn test_allocate_twice_fails() {
        let mut registry = VlanRegistry::new();
        registry.allocate(vlan(1770)).unwrap();
        assert_eq!(
            registry.allocate(vlan(1770)),
            Err(VlanError::AlreadyUsed(1770)),
        );
        assert!(registry.is_allocated(vlan(1770)));
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut registry = VlanRegistry::new();
        registry.allocate(vlan(7)).unwrap();
        registry.free(vlan(7));
        assert!(!registry.is_allocated(vlan(7)));
        // Second free is a no-op, not an error.
        registry.free(vlan(7));
        assert!(!registry.is_allocated(vlan(7)));
    }

    #[test]
    fn test_untagged_always_allocatable() {
        let mut registry = VlanRegistry::new();
        registry.allocate(VlanId::UNTAGGED).unwrap();
        registry.allocate(VlanId::UNTAGGED).unwrap();
        assert!(!registry.is_allocated(VlanId::UNTAGGED));
    }

    #[test]
    fn test_range_allocation() {
        let mut registry = VlanRegistry::new();
        registry.allocate_range(vlan(3000), vlan(3003)).unwrap();
        for id in 3000..=3003 {
            assert!(registry.is_allocated(vlan(id)));
        }
        assert!(!registry.is_allocated(vlan(3004)));
    }

    #[test]
    fn test_range_is_all_or_nothing() {
        let mut registry = VlanRegistry::new();
        registry.allocate(vlan(2001)).unwrap();
        registry.allocate(vlan(2003)).unwrap();

        assert_eq!(
            registry.allocate_range(vlan(2000), vlan(2004)),
            Err(VlanError::RangeConflicts(vec![2001, 2003])),
        );

        // The non-conflicting IDs in the range were left untouched.
        for id in [2000, 2002, 2004] {
            assert!(!registry.is_allocated(vlan(id)));
        }
    }

    #[test]
    fn test_range_ordering_validated() {
        let mut registry = VlanRegistry::new();
        assert_eq!(
            registry.allocate_range(vlan(10), vlan(5)),
            Err(VlanError::BadRange { start: 10, end: 5 }),
        );
        assert_eq!(
            registry.free_range(vlan(10), vlan(5)),
            Err(VlanError::BadRange { start: 10, end: 5 }),
        );
    }

    #[test]
    fn test_free_range_idempotent() {
        let mut registry = VlanRegistry::new();
        registry.allocate_range(vlan(100), vlan(110)).unwrap();
        registry.free_range(vlan(100), vlan(110)).unwrap();
        registry.free_range(vlan(100), vlan(110)).unwrap();
        assert_eq!(registry.allocated(), Vec::<VlanId>::new());
    }

    #[test]
    fn test_vlan_id_serde() {
        let id: VlanId = serde_json::from_str("1770").unwrap();
        assert_eq!(id, vlan(1770));
        assert_eq!(serde_json::to_string(&id).unwrap(), "1770");
        assert!(serde_json::from_str::<VlanId>("5000").is_err());
    }
}
