//! MAC uplink processor
//!
//! Entry point of the uplink path. Received PDUs are handed to the execution
//! context of the UE they belong to, UE lifecycle requests update the UE
//! repository and the DL HARQ buffer pools.

use crate::mac::dl_buffer_pool::DlBufferPool;
use crate::mac::pdu_rx_handler::{PduRxHandler, PduRxStatsSnapshot};
use crate::mac::ue_manager::MacUlUeManager;
use crate::mac::MacConfig;
use crate::LayerError;
use common::executor::{TaskExecutor, UeExecutorMapper};
use common::types::{DuCellIndex, DuUeIndex, Lcid, Rnti};
use interfaces::{
    MacLogicalChannelConfig, MacRxDataIndication, MacUeControlNotifier, MacUeCreateRequest,
    SchedulerUlFeedbackHandler,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators of the uplink processor
#[derive(Clone)]
pub struct MacUlDependencies {
    /// Execution context of every UE
    pub ue_exec_mapper: Arc<dyn UeExecutorMapper>,
    /// Low priority context for DL buffer replenishment
    pub bg_executor: Arc<dyn TaskExecutor>,
    /// Scheduler feedback sink
    pub sched: Arc<dyn SchedulerUlFeedbackHandler>,
    /// UE lifecycle owner
    pub ue_ctrl_notifier: Arc<dyn MacUeControlNotifier>,
}

/// MAC uplink processor
pub struct MacUlProcessor {
    config: MacConfig,
    ue_manager: Arc<MacUlUeManager>,
    pdu_handler: Arc<PduRxHandler>,
    ue_exec_mapper: Arc<dyn UeExecutorMapper>,
    dl_buffer_pools: HashMap<DuCellIndex, DlBufferPool>,
}

impl MacUlProcessor {
    pub fn new(config: MacConfig, deps: MacUlDependencies) -> Result<Self, LayerError> {
        config.validate()?;

        let ue_manager = Arc::new(MacUlUeManager::default());
        let pdu_handler = Arc::new(PduRxHandler::new(
            ue_manager.clone(),
            deps.ue_exec_mapper.clone(),
            deps.sched,
            deps.ue_ctrl_notifier,
        ));

        let mut dl_buffer_pools = HashMap::new();
        for cell in &config.cells {
            let pool = DlBufferPool::new(cell.dl_buffer_pool.clone(), deps.bg_executor.clone())?;
            dl_buffer_pools.insert(cell.cell_index, pool);
        }

        info!(
            "MAC UL processor created: {} cells, {} DL HARQ buffers per UE",
            config.cells.len(),
            config.nof_harqs_per_ue
        );

        Ok(Self {
            config,
            ue_manager,
            pdu_handler,
            ue_exec_mapper: deps.ue_exec_mapper,
            dl_buffer_pools,
        })
    }

    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    pub fn ue_manager(&self) -> &MacUlUeManager {
        &self.ue_manager
    }

    pub fn dl_buffer_pool(&self, cell_index: DuCellIndex) -> Result<&DlBufferPool, LayerError> {
        self.dl_buffer_pools
            .get(&cell_index)
            .ok_or(LayerError::UnknownCell(cell_index.0))
    }

    pub fn stats(&self) -> PduRxStatsSnapshot {
        self.pdu_handler.stats().snapshot()
    }

    /// Hand every PDU of the indication to the execution context of its UE
    pub fn handle_rx_data_indication(&self, ind: MacRxDataIndication) {
        let MacRxDataIndication {
            sl_rx,
            cell_index,
            pdus,
        } = ind;

        for pdu in pdus {
            let ue_index = self.ue_manager.ue_index_of(pdu.rnti);
            let rnti = pdu.rnti;
            let handler = self.pdu_handler.clone();
            let executor = self.ue_exec_mapper.executor(ue_index);

            let task = Box::new(move || {
                handler.handle_rx_pdu(sl_rx, cell_index, ue_index, pdu);
            });
            if !executor.execute(task) {
                warn!(
                    "{} rnti={}: Discarding PDU. Cause: task queue of {} is full",
                    sl_rx,
                    rnti,
                    executor.name()
                );
                self.pdu_handler.stats().record_pdu_discarded();
            }
        }
    }

    /// Create the uplink context of a UE and reserve its DL HARQ buffers.
    ///
    /// Running out of DL buffers does not fail the creation, the UE gets what
    /// is left. A CCCH message received before creation is forwarded to SRB0.
    pub fn add_ue(&self, req: MacUeCreateRequest) -> bool {
        let Some(pool) = self.dl_buffer_pools.get(&req.cell_index) else {
            warn!("Failed to create ue={}. Cause: unknown cell {}", req.ue_index, req.cell_index.0);
            return false;
        };
        if self
            .ue_manager
            .add_ue(req.ue_index, req.crnti, req.cell_index, &req.bearers)
            .is_none()
        {
            return false;
        }

        let nof_harqs = self.config.nof_harqs_per_ue;
        let granted = pool.allocate_for_ue(req.ue_index, nof_harqs);
        if granted < nof_harqs {
            warn!(
                "ue={}: only {} of {} DL HARQ buffers available",
                req.ue_index, granted, nof_harqs
            );
        }

        self.flush_pending_ccch(req.ue_index, req.crnti);
        info!("ue={} rnti={}: created in cell {}", req.ue_index, req.crnti, req.cell_index.0);
        true
    }

    /// Drop the uplink context of a UE and release its DL HARQ buffers
    pub fn remove_ue(&self, ue_index: DuUeIndex) -> bool {
        let Some(ue) = self.ue_manager.remove_ue(ue_index) else {
            warn!("Failed to remove ue={}. Cause: UE not found", ue_index);
            return false;
        };

        if self.pdu_handler.discard_pending_ccch(ue.crnti()) {
            debug!("ue={}: discarded pending CCCH message", ue_index);
        }
        if let Some(pool) = self.dl_buffer_pools.get(&ue.cell_index()) {
            pool.deallocate_for_ue(ue_index);
        }

        info!("ue={} rnti={}: removed", ue_index, ue.crnti());
        true
    }

    /// Add or reconfigure logical channels of a UE
    pub fn addmod_bearers(&self, ue_index: DuUeIndex, bearers: &[MacLogicalChannelConfig]) -> bool {
        let Some(ue) = self.ue_manager.find_ue(ue_index) else {
            warn!("Failed to configure bearers of ue={}. Cause: UE not found", ue_index);
            return false;
        };
        ue.addmod_bearers(bearers);

        if bearers.iter().any(|bearer| bearer.lcid == Lcid::SRB0) {
            self.flush_pending_ccch(ue_index, ue.crnti());
        }
        true
    }

    pub fn remove_bearers(&self, ue_index: DuUeIndex, lcids: &[Lcid]) -> bool {
        let Some(ue) = self.ue_manager.find_ue(ue_index) else {
            warn!("Failed to remove bearers of ue={}. Cause: UE not found", ue_index);
            return false;
        };
        ue.remove_bearers(lcids);
        true
    }

    /// Deliver a retained CCCH message from the UE's execution context, so it
    /// stays ordered with the UE's PDUs
    fn flush_pending_ccch(&self, ue_index: DuUeIndex, crnti: Rnti) {
        if !self.pdu_handler.has_pending_ccch(crnti) {
            return;
        }
        let handler = self.pdu_handler.clone();
        let executor = self.ue_exec_mapper.executor(ue_index);
        if !executor.execute(Box::new(move || {
            handler.flush_pending_ccch(ue_index);
        })) {
            warn!(
                "ue={}: Failed to forward pending CCCH message. Cause: task queue of {} is full",
                ue_index,
                executor.name()
            );
        }
    }
}
