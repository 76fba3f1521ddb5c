//! Uplink UE repository
//!
//! Holds the UE contexts seen by the uplink path, indexed by UE index, and the
//! RNTI to UE index table used to resolve incoming PDUs.

use crate::mac::rnti_table::RntiUeIndexTable;
use common::types::{DuCellIndex, DuUeIndex, Lcid, Rnti, MAX_NOF_DU_UES};
use interfaces::{MacLogicalChannelConfig, MacSduRxNotifier};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

const NOF_UL_LCIDS: usize = Lcid::MAX.0 as usize + 1;

type BearerTable = [Option<Arc<dyn MacSduRxNotifier>>; NOF_UL_LCIDS];

/// Uplink context of one UE
pub struct MacUlUeContext {
    ue_index: DuUeIndex,
    crnti: Rnti,
    cell_index: DuCellIndex,
    ul_bearers: RwLock<BearerTable>,
}

impl MacUlUeContext {
    fn new(ue_index: DuUeIndex, crnti: Rnti, cell_index: DuCellIndex) -> Self {
        Self {
            ue_index,
            crnti,
            cell_index,
            ul_bearers: RwLock::new(std::array::from_fn(|_| None)),
        }
    }

    pub fn ue_index(&self) -> DuUeIndex {
        self.ue_index
    }

    pub fn crnti(&self) -> Rnti {
        self.crnti
    }

    pub fn cell_index(&self) -> DuCellIndex {
        self.cell_index
    }

    /// Sink registered for `lcid`
    pub fn bearer(&self, lcid: Lcid) -> Option<Arc<dyn MacSduRxNotifier>> {
        self.ul_bearers.read().get(lcid.0 as usize)?.clone()
    }

    pub fn has_bearer(&self, lcid: Lcid) -> bool {
        self.bearer(lcid).is_some()
    }

    /// Add or replace logical channels. Invalid LCIDs are skipped.
    pub fn addmod_bearers(&self, bearers: &[MacLogicalChannelConfig]) {
        let mut table = self.ul_bearers.write();
        for bearer in bearers {
            if !bearer.lcid.is_valid() {
                warn!("ue={}: ignoring bearer with invalid LCID {}", self.ue_index, bearer.lcid.0);
                continue;
            }
            table[bearer.lcid.0 as usize] = Some(bearer.ul_bearer.clone());
        }
    }

    pub fn remove_bearers(&self, lcids: &[Lcid]) {
        let mut table = self.ul_bearers.write();
        for lcid in lcids {
            if let Some(slot) = table.get_mut(lcid.0 as usize) {
                *slot = None;
            }
        }
    }

    pub fn nof_bearers(&self) -> usize {
        self.ul_bearers.read().iter().filter(|b| b.is_some()).count()
    }
}

/// UE contexts of the uplink path
pub struct MacUlUeManager {
    rnti_table: RntiUeIndexTable,
    ues: RwLock<Vec<Option<Arc<MacUlUeContext>>>>,
}

impl Default for MacUlUeManager {
    fn default() -> Self {
        Self::new(RntiUeIndexTable::default())
    }
}

impl MacUlUeManager {
    pub fn new(rnti_table: RntiUeIndexTable) -> Self {
        Self {
            rnti_table,
            ues: RwLock::new(vec![None; MAX_NOF_DU_UES as usize]),
        }
    }

    pub fn rnti_table(&self) -> &RntiUeIndexTable {
        &self.rnti_table
    }

    /// Create the context and map its C-RNTI. Fails if the UE index is taken
    /// or the RNTI already belongs to another UE.
    pub fn add_ue(
        &self,
        ue_index: DuUeIndex,
        crnti: Rnti,
        cell_index: DuCellIndex,
        bearers: &[MacLogicalChannelConfig],
    ) -> Option<Arc<MacUlUeContext>> {
        if !ue_index.is_valid() {
            warn!("Failed to create UE. Cause: invalid UE index {}", ue_index);
            return None;
        }

        let mut ues = self.ues.write();
        if ues[ue_index.as_usize()].is_some() {
            warn!("Failed to create ue={}. Cause: UE index already in use", ue_index);
            return None;
        }
        if !self.rnti_table.insert(crnti, ue_index) {
            warn!("Failed to create ue={}. Cause: rnti={} already in use", ue_index, crnti);
            return None;
        }

        let ue = Arc::new(MacUlUeContext::new(ue_index, crnti, cell_index));
        ue.addmod_bearers(bearers);
        ues[ue_index.as_usize()] = Some(ue.clone());

        debug!("ue={} rnti={}: UL context created with {} bearers", ue_index, crnti, ue.nof_bearers());
        Some(ue)
    }

    /// Drop the context and unmap its C-RNTI
    pub fn remove_ue(&self, ue_index: DuUeIndex) -> Option<Arc<MacUlUeContext>> {
        if !ue_index.is_valid() {
            return None;
        }
        let ue = self.ues.write()[ue_index.as_usize()].take()?;
        self.rnti_table.remove(ue.crnti());
        debug!("ue={} rnti={}: UL context removed", ue_index, ue.crnti());
        Some(ue)
    }

    pub fn find_ue(&self, ue_index: DuUeIndex) -> Option<Arc<MacUlUeContext>> {
        if !ue_index.is_valid() {
            return None;
        }
        self.ues.read()[ue_index.as_usize()].clone()
    }

    /// UE index of `rnti`, or [`DuUeIndex::INVALID`]. Accepts any RNTI,
    /// including values taken from the air interface.
    pub fn ue_index_of(&self, rnti: Rnti) -> DuUeIndex {
        if !self.rnti_table.covers(rnti) {
            return DuUeIndex::INVALID;
        }
        self.rnti_table.lookup(rnti)
    }

    pub fn find_by_rnti(&self, rnti: Rnti) -> Option<Arc<MacUlUeContext>> {
        self.find_ue(self.ue_index_of(rnti))
    }

    pub fn nof_ues(&self) -> usize {
        self.rnti_table.len()
    }
}
