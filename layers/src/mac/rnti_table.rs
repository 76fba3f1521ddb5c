//! RNTI to UE index table
//!
//! Fixed range array of atomics, one cell per RNTI. Lookups, insertions and
//! removals on different RNTIs can run concurrently from any thread without
//! locking. Writers of the same RNTI must be serialized by the caller.

use common::types::{DuUeIndex, Rnti, MAX_CRNTI, MIN_CRNTI};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

pub struct RntiUeIndexTable {
    min_rnti: u16,
    max_rnti: u16,
    cells: Box<[AtomicU16]>,
    nof_ues: AtomicUsize,
}

impl Default for RntiUeIndexTable {
    fn default() -> Self {
        Self::new(MIN_CRNTI, MAX_CRNTI)
    }
}

impl RntiUeIndexTable {
    /// Table covering RNTIs `min_rnti..=max_rnti`
    pub fn new(min_rnti: u16, max_rnti: u16) -> Self {
        assert!(min_rnti <= max_rnti, "invalid RNTI range");
        let cells = (min_rnti..=max_rnti)
            .map(|_| AtomicU16::new(DuUeIndex::INVALID.0))
            .collect();
        Self {
            min_rnti,
            max_rnti,
            cells,
            nof_ues: AtomicUsize::new(0),
        }
    }

    /// Whether `rnti` falls in the range of the table
    pub fn covers(&self, rnti: Rnti) -> bool {
        (self.min_rnti..=self.max_rnti).contains(&rnti.0)
    }

    fn cell(&self, rnti: Rnti) -> Option<&AtomicU16> {
        debug_assert!(
            (self.min_rnti..=self.max_rnti).contains(&rnti.0),
            "RNTI {} out of range",
            rnti
        );
        rnti.0
            .checked_sub(self.min_rnti)
            .and_then(|idx| self.cells.get(idx as usize))
    }

    /// Map `rnti` to `ue_index`. Returns false, leaving the table untouched,
    /// if the RNTI is already mapped.
    pub fn insert(&self, rnti: Rnti, ue_index: DuUeIndex) -> bool {
        debug_assert!(ue_index.is_valid(), "invalid UE index inserted for RNTI {}", rnti);
        if !ue_index.is_valid() {
            return false;
        }
        let Some(cell) = self.cell(rnti) else {
            return false;
        };

        let inserted = cell
            .compare_exchange(
                DuUeIndex::INVALID.0,
                ue_index.0,
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok();
        if inserted {
            self.nof_ues.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Clear the mapping of `rnti`. Removing an unmapped RNTI is a no-op.
    pub fn remove(&self, rnti: Rnti) {
        let Some(cell) = self.cell(rnti) else {
            return;
        };
        let prev = cell.swap(DuUeIndex::INVALID.0, Ordering::Relaxed);
        if prev != DuUeIndex::INVALID.0 {
            self.nof_ues.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// UE index mapped to `rnti`, or [`DuUeIndex::INVALID`]
    pub fn lookup(&self, rnti: Rnti) -> DuUeIndex {
        self.cell(rnti)
            .map(|cell| DuUeIndex(cell.load(Ordering::Relaxed)))
            .unwrap_or(DuUeIndex::INVALID)
    }

    pub fn contains(&self, rnti: Rnti) -> bool {
        self.lookup(rnti).is_valid()
    }

    /// Number of mapped RNTIs
    pub fn len(&self) -> usize {
        self.nof_ues.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
