//! Common Types for the gNB MAC
//!
//! Defines the radio identifiers shared by the MAC uplink core and its collaborators

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of UEs handled by one DU
pub const MAX_NOF_DU_UES: u16 = 1024;

/// Maximum number of cells handled by one DU
pub const MAX_NOF_DU_CELLS: u8 = 16;

/// Highest logical channel group ID (LCG 0-7)
pub const MAX_LCG_ID: u8 = 7;

/// Number of logical channel groups
pub const MAX_NOF_LCGS: usize = MAX_LCG_ID as usize + 1;

/// Lowest C-RNTI value (TS 38.321 Table 7.1-1)
pub const MIN_CRNTI: u16 = 0x0001;

/// Highest C-RNTI value (TS 38.321 Table 7.1-1)
pub const MAX_CRNTI: u16 = 0xFFEF;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether the value lies in the C-RNTI range
    pub fn is_crnti(&self) -> bool {
        (MIN_CRNTI..=MAX_CRNTI).contains(&self.0)
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Dense DU-internal UE handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DuUeIndex(pub u16);

impl DuUeIndex {
    /// Sentinel meaning "no UE"
    pub const INVALID: Self = Self(MAX_NOF_DU_UES);

    pub fn is_valid(&self) -> bool {
        self.0 < MAX_NOF_DU_UES
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DuUeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

/// DU-internal cell handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DuCellIndex(pub u8);

impl fmt::Display for DuCellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical channel identity (LCID 0-32)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lcid(pub u8);

impl Lcid {
    /// SRB0, the channel carrying CCCH
    pub const SRB0: Self = Self(0);
    /// SRB1
    pub const SRB1: Self = Self(1);
    /// Highest logical channel identity
    pub const MAX: Self = Self(32);

    pub fn is_valid(&self) -> bool {
        self.0 <= Self::MAX.0
    }
}

impl fmt::Display for Lcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical channel group identity (LCG 0-7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LcgId(pub u8);

impl LcgId {
    pub fn is_valid(&self) -> bool {
        self.0 <= MAX_LCG_ID
    }
}

/// Slot (SFN + slot index) in which a PDU was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotPoint {
    /// System frame number (0-1023)
    pub sfn: u16,
    /// Slot index within the frame
    pub slot: u8,
}

impl SlotPoint {
    pub fn new(sfn: u16, slot: u8) -> Self {
        Self { sfn, slot }
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn, self.slot)
    }
}
