//! Medium Access Control (MAC) Layer Implementation
//!
//! Uplink core of the 5G NR MAC according to 3GPP TS 38.321: UL-SCH PDU
//! demultiplexing, UL MAC CE decoding, per-UE dispatch with contention
//! resolution, and the per-cell DL HARQ buffer pool.

pub mod bsr;
pub mod dl_buffer_pool;
pub mod pdu_rx_handler;
pub mod rnti_table;
pub mod ue_manager;
pub mod ul_ce;
pub mod ul_processor;
pub mod ul_sch_pdu;

use crate::LayerError;
use common::types::{DuCellIndex, MAX_NOF_DU_CELLS};
use std::collections::HashSet;

pub use dl_buffer_pool::{DescriptorId, DlBufferHandle, DlBufferPool, DlBufferPoolConfig, DlBufferPoolError};
pub use pdu_rx_handler::{PduRxHandler, PduRxStatsSnapshot};
pub use rnti_table::RntiUeIndexTable;
pub use ue_manager::{MacUlUeContext, MacUlUeManager};
pub use ul_processor::{MacUlDependencies, MacUlProcessor};
pub use ul_sch_pdu::{LcidUlSch, PduDecodeError, UlSchPdu, UlSchSubpdu, MAX_UL_SCH_SUBPDUS};

/// Maximum number of DL HARQ processes per UE
pub const MAX_NOF_HARQS: usize = 16;

/// Per cell MAC configuration
#[derive(Debug, Clone)]
pub struct MacCellConfig {
    /// Cell index
    pub cell_index: DuCellIndex,
    /// DL HARQ buffer pool dimensioning
    pub dl_buffer_pool: DlBufferPoolConfig,
}

impl MacCellConfig {
    pub fn new(cell_index: DuCellIndex, nof_rbs: usize, nof_ports: usize, nof_descriptors: usize) -> Self {
        Self {
            cell_index,
            dl_buffer_pool: DlBufferPoolConfig::for_cell(nof_rbs, nof_ports, nof_descriptors),
        }
    }
}

/// MAC layer configuration
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Served cells
    pub cells: Vec<MacCellConfig>,
    /// DL HARQ buffers reserved for every UE
    pub nof_harqs_per_ue: usize,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            cells: vec![MacCellConfig::new(DuCellIndex(0), 52, 1, 1024)],
            nof_harqs_per_ue: MAX_NOF_HARQS,
        }
    }
}

impl MacConfig {
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.cells.is_empty() {
            return Err(LayerError::InvalidConfiguration("no cells configured".into()));
        }
        if self.nof_harqs_per_ue == 0 || self.nof_harqs_per_ue > MAX_NOF_HARQS {
            return Err(LayerError::InvalidConfiguration(format!(
                "nof_harqs_per_ue={} must be within 1..={}",
                self.nof_harqs_per_ue, MAX_NOF_HARQS
            )));
        }

        let mut seen = HashSet::new();
        for cell in &self.cells {
            if cell.cell_index.0 >= MAX_NOF_DU_CELLS {
                return Err(LayerError::InvalidConfiguration(format!(
                    "cell index {} exceeds {}",
                    cell.cell_index.0, MAX_NOF_DU_CELLS
                )));
            }
            if !seen.insert(cell.cell_index) {
                return Err(LayerError::InvalidConfiguration(format!(
                    "cell index {} configured twice",
                    cell.cell_index.0
                )));
            }
            cell.dl_buffer_pool.validate()?;
        }
        Ok(())
    }
}
