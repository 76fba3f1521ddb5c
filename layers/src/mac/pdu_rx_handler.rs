//! UL MAC PDU reception
//!
//! Decodes the PDUs of one UE and dispatches their subPDUs: SDUs to the
//! logical channel sinks, BSR/PHR to the scheduler, CCCH of unknown
//! identities to the UE lifecycle owner. A C-RNTI CE moves the processing to
//! the execution context of the UE it names (contention resolution).

use crate::mac::bsr::{buff_size_field_to_bytes, decode_lbsr, decode_sbsr};
use crate::mac::ue_manager::{MacUlUeContext, MacUlUeManager};
use crate::mac::ul_ce::{decode_crnti_ce, decode_se_phr};
use crate::mac::ul_sch_pdu::{LcidUlSch, UlSchPdu, UlSchSubpdu};
use bytes::Bytes;
use common::executor::UeExecutorMapper;
use common::types::{DuCellIndex, DuUeIndex, LcgId, Lcid, Rnti, SlotPoint, MAX_NOF_DU_UES, MAX_NOF_LCGS};
use common::utils::bytes_to_hex_truncated;
use interfaces::{
    BsrFormat, LcgBsrReport, MacRxPdu, MacRxSdu, MacUeControlNotifier, SchedulerUlFeedbackHandler,
    UlBsrIndication, UlCcchIndication, UlPhrIndication, UlSrIndication,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Bytes of a PDU printed in debug logs
const MAX_HEX_DUMP_LEN: usize = 16;

/// Decoded PDU in flight between execution contexts
#[derive(Debug, Clone)]
pub struct DecodedMacRxPdu {
    pub slot_rx: SlotPoint,
    pub cell_index: DuCellIndex,
    /// Identity the subPDUs are dispatched under
    pub rnti: Rnti,
    pub ue_index: DuUeIndex,
    pub harq_id: u8,
    pub payload: Bytes,
    pub decoded: UlSchPdu,
}

impl DecodedMacRxPdu {
    fn subpdu_payload(&self, subpdu: &UlSchSubpdu) -> &[u8] {
        subpdu.payload(&self.payload)
    }

    /// Zero-copy handle to a subPDU payload
    fn subpdu_bytes(&self, subpdu: &UlSchSubpdu) -> Bytes {
        self.payload.slice(subpdu.payload_range())
    }
}

/// CCCH message kept until the UE context of its identity is created
#[derive(Debug, Clone)]
struct PendingCcch {
    payload: Bytes,
    slot_rx: SlotPoint,
}

/// Uplink reception counters
#[derive(Debug, Default)]
pub struct PduRxStats {
    pdus_received: AtomicU64,
    pdus_discarded: AtomicU64,
    sdus_forwarded: AtomicU64,
    sdus_discarded: AtomicU64,
    bsrs_reported: AtomicU64,
    phrs_reported: AtomicU64,
    srs_triggered: AtomicU64,
    crnti_ces_received: AtomicU64,
    ccch_msgs_received: AtomicU64,
}

/// Point-in-time copy of [`PduRxStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PduRxStatsSnapshot {
    pub pdus_received: u64,
    pub pdus_discarded: u64,
    pub sdus_forwarded: u64,
    pub sdus_discarded: u64,
    pub bsrs_reported: u64,
    pub phrs_reported: u64,
    pub srs_triggered: u64,
    pub crnti_ces_received: u64,
    pub ccch_msgs_received: u64,
}

impl PduRxStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pdu_discarded(&self) {
        Self::inc(&self.pdus_discarded);
    }

    pub fn snapshot(&self) -> PduRxStatsSnapshot {
        PduRxStatsSnapshot {
            pdus_received: self.pdus_received.load(Ordering::Relaxed),
            pdus_discarded: self.pdus_discarded.load(Ordering::Relaxed),
            sdus_forwarded: self.sdus_forwarded.load(Ordering::Relaxed),
            sdus_discarded: self.sdus_discarded.load(Ordering::Relaxed),
            bsrs_reported: self.bsrs_reported.load(Ordering::Relaxed),
            phrs_reported: self.phrs_reported.load(Ordering::Relaxed),
            srs_triggered: self.srs_triggered.load(Ordering::Relaxed),
            crnti_ces_received: self.crnti_ces_received.load(Ordering::Relaxed),
            ccch_msgs_received: self.ccch_msgs_received.load(Ordering::Relaxed),
        }
    }
}

/// Handles the UL MAC PDUs of all UEs. Called from the UE execution contexts.
pub struct PduRxHandler {
    ue_manager: Arc<MacUlUeManager>,
    ue_exec_mapper: Arc<dyn UeExecutorMapper>,
    sched: Arc<dyn SchedulerUlFeedbackHandler>,
    ue_ctrl_notifier: Arc<dyn MacUeControlNotifier>,
    pending_ccch: Mutex<HashMap<Rnti, PendingCcch>>,
    stats: PduRxStats,
}

impl PduRxHandler {
    pub fn new(
        ue_manager: Arc<MacUlUeManager>,
        ue_exec_mapper: Arc<dyn UeExecutorMapper>,
        sched: Arc<dyn SchedulerUlFeedbackHandler>,
        ue_ctrl_notifier: Arc<dyn MacUeControlNotifier>,
    ) -> Self {
        Self {
            ue_manager,
            ue_exec_mapper,
            sched,
            ue_ctrl_notifier,
            pending_ccch: Mutex::new(HashMap::new()),
            stats: PduRxStats::default(),
        }
    }

    pub fn stats(&self) -> &PduRxStats {
        &self.stats
    }

    /// Decode and dispatch one PDU. Returns false if the PDU was discarded.
    ///
    /// Must run on the execution context of `routed_ue`, the UE index `pdu.rnti`
    /// resolved to when the PDU was submitted. If the identity was bound to
    /// another UE since then, the PDU is moved to that UE's context instead.
    pub fn handle_rx_pdu(
        self: &Arc<Self>,
        slot_rx: SlotPoint,
        cell_index: DuCellIndex,
        routed_ue: DuUeIndex,
        pdu: MacRxPdu,
    ) -> bool {
        let ue_index = self.ue_manager.ue_index_of(pdu.rnti);
        if ue_index != routed_ue {
            return self.reroute_rx_pdu(slot_rx, cell_index, ue_index, pdu);
        }
        PduRxStats::inc(&self.stats.pdus_received);

        let decoded = match UlSchPdu::decode(&pdu.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    "{} rnti={} h_id={}: Discarding PDU. Cause: {}. pdu=[{}]",
                    slot_rx,
                    pdu.rnti,
                    pdu.harq_id,
                    e,
                    bytes_to_hex_truncated(&pdu.payload, MAX_HEX_DUMP_LEN)
                );
                PduRxStats::inc(&self.stats.pdus_discarded);
                return false;
            }
        };
        debug!("{} rnti={} h_id={}: rx PDU: {}", slot_rx, pdu.rnti, pdu.harq_id, decoded);

        let ctx = DecodedMacRxPdu {
            slot_rx,
            cell_index,
            rnti: pdu.rnti,
            ue_index,
            harq_id: pdu.harq_id,
            payload: pdu.payload,
            decoded,
        };

        match ctx.decoded.find_crnti_ce() {
            Some(crnti_idx) => self.handle_crnti_ce(ctx, crnti_idx),
            None => self.dispatch_subpdus(&ctx),
        }
    }

    /// Submit a PDU whose identity changed binding while it was queued
    fn reroute_rx_pdu(
        self: &Arc<Self>,
        slot_rx: SlotPoint,
        cell_index: DuCellIndex,
        ue_index: DuUeIndex,
        pdu: MacRxPdu,
    ) -> bool {
        debug!("{} rnti={}: identity now bound to ue={}, rerouting PDU", slot_rx, pdu.rnti, ue_index);

        let handler = Arc::clone(self);
        let rnti = pdu.rnti;
        let executor = self.ue_exec_mapper.executor(ue_index);
        let task = Box::new(move || {
            handler.handle_rx_pdu(slot_rx, cell_index, ue_index, pdu);
        });
        if !executor.execute(task) {
            warn!(
                "{} rnti={}: Discarding PDU. Cause: task queue of {} is full",
                slot_rx,
                rnti,
                executor.name()
            );
            PduRxStats::inc(&self.stats.pdus_discarded);
            return false;
        }
        true
    }

    /// Resolve the identity carried in the C-RNTI CE and continue on its context
    fn handle_crnti_ce(self: &Arc<Self>, ctx: DecodedMacRxPdu, crnti_idx: usize) -> bool {
        PduRxStats::inc(&self.stats.crnti_ces_received);

        let Some(crnti_ce) = ctx.decoded.subpdu(crnti_idx).copied() else {
            return false;
        };
        let new_rnti = decode_crnti_ce(ctx.subpdu_payload(&crnti_ce));
        if !new_rnti.is_crnti() {
            warn!(
                "{} rnti={}: Discarding PDU. Cause: C-RNTI CE carries reserved rnti={}",
                ctx.slot_rx, ctx.rnti, new_rnti
            );
            PduRxStats::inc(&self.stats.pdus_discarded);
            return false;
        }
        let Some(new_ue_index) = self.ue_manager.find_by_rnti(new_rnti).map(|ue| ue.ue_index()) else {
            warn!(
                "{} rnti={}: Discarding PDU. Cause: C-RNTI CE with unknown rnti={}",
                ctx.slot_rx, ctx.rnti, new_rnti
            );
            PduRxStats::inc(&self.stats.pdus_discarded);
            return false;
        };
        debug!(
            "{} tc-rnti={}: C-RNTI CE for rnti={} ue={}",
            ctx.slot_rx, ctx.rnti, new_rnti, new_ue_index
        );

        let handler = Arc::clone(self);
        let slot_rx = ctx.slot_rx;
        let old_rnti = ctx.rnti;
        let task = Box::new(move || handler.complete_crnti_ce(ctx, new_rnti, new_ue_index));
        if !self.ue_exec_mapper.executor(new_ue_index).execute(task) {
            warn!(
                "{} rnti={}: Discarding PDU. Cause: task queue of ue={} is full",
                slot_rx, old_rnti, new_ue_index
            );
            PduRxStats::inc(&self.stats.pdus_discarded);
            return false;
        }
        true
    }

    /// Continuation on the execution context of the UE named by the C-RNTI CE
    fn complete_crnti_ce(&self, mut ctx: DecodedMacRxPdu, new_rnti: Rnti, new_ue_index: DuUeIndex) {
        let old_ue_index = ctx.ue_index;
        if old_ue_index.is_valid() && old_ue_index != new_ue_index {
            self.ue_ctrl_notifier.on_crnti_ce_received(old_ue_index);
        }

        ctx.rnti = new_rnti;
        ctx.ue_index = new_ue_index;
        if !self.dispatch_subpdus(&ctx) {
            return;
        }

        // Contention resolved, give the UE a grant to continue
        self.sched.handle_sr_indication(UlSrIndication {
            cell_index: ctx.cell_index,
            ue_index: new_ue_index,
            crnti: new_rnti,
        });
        PduRxStats::inc(&self.stats.srs_triggered);
    }

    /// Dispatch subPDUs in wire order. C-RNTI CEs were handled beforehand.
    fn dispatch_subpdus(&self, ctx: &DecodedMacRxPdu) -> bool {
        let ue = self.ue_manager.find_ue(ctx.ue_index);

        if ue.is_none() && !ctx.decoded.iter().any(|subpdu| subpdu.lcid().is_ccch()) {
            warn!(
                "{} rnti={}: Discarding PDU. Cause: no UE context for this identity",
                ctx.slot_rx, ctx.rnti
            );
            PduRxStats::inc(&self.stats.pdus_discarded);
            return false;
        }

        for subpdu in &ctx.decoded {
            let lcid = subpdu.lcid();
            if lcid == LcidUlSch::CRNTI || lcid.is_padding() {
                continue;
            }

            if lcid.is_ccch() {
                self.handle_ccch(ctx, ue.as_deref(), subpdu);
                continue;
            }

            let Some(ue) = ue.as_deref() else {
                debug!(
                    "{} rnti={}: Discarding {}. Cause: no UE context for this identity",
                    ctx.slot_rx, ctx.rnti, subpdu
                );
                continue;
            };

            if lcid.is_sdu() {
                self.handle_sdu(ctx, ue, subpdu);
            } else {
                self.handle_ce(ctx, ue, subpdu);
            }
        }
        true
    }

    fn handle_sdu(&self, ctx: &DecodedMacRxPdu, ue: &MacUlUeContext, subpdu: &UlSchSubpdu) {
        let Some(lcid) = subpdu.lcid().to_lcid() else {
            return;
        };
        let Some(bearer) = ue.bearer(lcid) else {
            warn!(
                "{} ue={} rnti={}: Discarding SDU. Cause: LCID {} is not configured",
                ctx.slot_rx, ue.ue_index(), ctx.rnti, lcid
            );
            PduRxStats::inc(&self.stats.sdus_discarded);
            return;
        };

        trace!("{} ue={} lcid={}: rx SDU of {} bytes", ctx.slot_rx, ue.ue_index(), lcid, subpdu.payload_len());
        bearer.on_new_sdu(MacRxSdu {
            rnti: ctx.rnti,
            lcid,
            payload: ctx.subpdu_bytes(subpdu),
        });
        PduRxStats::inc(&self.stats.sdus_forwarded);
    }

    fn handle_ccch(&self, ctx: &DecodedMacRxPdu, ue: Option<&MacUlUeContext>, subpdu: &UlSchSubpdu) {
        PduRxStats::inc(&self.stats.ccch_msgs_received);

        if let Some(ue) = ue {
            self.handle_sdu(ctx, ue, subpdu);
            return;
        }

        // Retained copy, independent of the transport block
        let payload = Bytes::copy_from_slice(ctx.subpdu_payload(subpdu));
        {
            let mut pending = self.pending_ccch.lock();
            if pending.contains_key(&ctx.rnti) {
                warn!(
                    "{} tc-rnti={}: Discarding CCCH message. Cause: a previous one is still pending",
                    ctx.slot_rx, ctx.rnti
                );
                return;
            }
            if pending.len() >= MAX_NOF_DU_UES as usize {
                warn!(
                    "{} tc-rnti={}: Discarding CCCH message. Cause: too many pending UE admissions",
                    ctx.slot_rx, ctx.rnti
                );
                return;
            }
            pending.insert(
                ctx.rnti,
                PendingCcch {
                    payload: payload.clone(),
                    slot_rx: ctx.slot_rx,
                },
            );
        }

        debug!("{} tc-rnti={}: rx CCCH message of {} bytes", ctx.slot_rx, ctx.rnti, payload.len());
        self.ue_ctrl_notifier.on_ul_ccch_msg_received(UlCcchIndication {
            cell_index: ctx.cell_index,
            tc_rnti: ctx.rnti,
            slot_rx: ctx.slot_rx,
            payload,
        });
    }

    fn handle_ce(&self, ctx: &DecodedMacRxPdu, ue: &MacUlUeContext, subpdu: &UlSchSubpdu) {
        let lcid = subpdu.lcid();
        match lcid {
            LcidUlSch::SHORT_BSR | LcidUlSch::SHORT_TRUNC_BSR => {
                let format = if lcid == LcidUlSch::SHORT_BSR {
                    BsrFormat::ShortBsr
                } else {
                    BsrFormat::ShortTruncatedBsr
                };
                let report = decode_sbsr(ctx.subpdu_payload(subpdu));
                let reported_lcgs = if report.buffer_size == 0 {
                    // Empty buffers for all LCGs
                    (0..MAX_NOF_LCGS as u8)
                        .map(|lcg| LcgBsrReport {
                            lcg_id: LcgId(lcg),
                            nof_bytes: 0,
                        })
                        .collect()
                } else {
                    vec![LcgBsrReport {
                        lcg_id: report.lcg_id,
                        nof_bytes: buff_size_field_to_bytes(report.buffer_size as usize, format),
                    }]
                };
                self.report_bsr(ctx, format, reported_lcgs);
            }
            LcidUlSch::LONG_BSR | LcidUlSch::LONG_TRUNC_BSR => {
                let format = if lcid == LcidUlSch::LONG_BSR {
                    BsrFormat::LongBsr
                } else {
                    BsrFormat::LongTruncatedBsr
                };
                let report = match decode_lbsr(format, ctx.subpdu_payload(subpdu)) {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(
                            "{} ue={} rnti={}: Discarding {}. Cause: {}",
                            ctx.slot_rx,
                            ue.ue_index(),
                            ctx.rnti,
                            lcid,
                            e
                        );
                        return;
                    }
                };
                let reported_lcgs = report
                    .list
                    .iter()
                    .map(|level| LcgBsrReport {
                        lcg_id: level.lcg_id,
                        nof_bytes: buff_size_field_to_bytes(level.buffer_size as usize, format),
                    })
                    .collect();
                self.report_bsr(ctx, format, reported_lcgs);
            }
            LcidUlSch::SE_PHR => {
                let report = decode_se_phr(ctx.subpdu_payload(subpdu));
                trace!(
                    "{} ue={}: PHR ph=[{}, {}] dB p_cmax=[{}, {}] dBm",
                    ctx.slot_rx,
                    ue.ue_index(),
                    report.ph.min_db,
                    report.ph.max_db,
                    report.p_cmax.min_dbm,
                    report.p_cmax.max_dbm
                );
                self.sched.handle_ul_phr_indication(UlPhrIndication {
                    cell_index: ctx.cell_index,
                    ue_index: ctx.ue_index,
                    crnti: ctx.rnti,
                    ph: report.ph,
                    p_cmax: report.p_cmax,
                });
                PduRxStats::inc(&self.stats.phrs_reported);
            }
            _ => {
                debug!("{} ue={}: Ignoring {}", ctx.slot_rx, ue.ue_index(), subpdu);
            }
        }
    }

    fn report_bsr(&self, ctx: &DecodedMacRxPdu, format: BsrFormat, reported_lcgs: Vec<LcgBsrReport>) {
        trace!("{} ue={}: {:?} {:?}", ctx.slot_rx, ctx.ue_index, format, reported_lcgs);
        self.sched.handle_ul_bsr_indication(UlBsrIndication {
            cell_index: ctx.cell_index,
            ue_index: ctx.ue_index,
            crnti: ctx.rnti,
            format,
            reported_lcgs,
        });
        PduRxStats::inc(&self.stats.bsrs_reported);
    }

    /// Deliver the CCCH message retained for the UE's C-RNTI to its SRB0.
    ///
    /// Nothing happens, and the message stays retained, while SRB0 is not
    /// configured. Returns true if a message was delivered.
    pub fn flush_pending_ccch(&self, ue_index: DuUeIndex) -> bool {
        let Some(ue) = self.ue_manager.find_ue(ue_index) else {
            return false;
        };
        let Some(srb0) = ue.bearer(Lcid::SRB0) else {
            return false;
        };
        let Some(ccch) = self.pending_ccch.lock().remove(&ue.crnti()) else {
            return false;
        };

        debug!(
            "ue={} rnti={}: forwarding CCCH message received at {}",
            ue_index,
            ue.crnti(),
            ccch.slot_rx
        );
        srb0.on_new_sdu(MacRxSdu {
            rnti: ue.crnti(),
            lcid: Lcid::SRB0,
            payload: ccch.payload,
        });
        PduRxStats::inc(&self.stats.sdus_forwarded);
        true
    }

    /// Forget the CCCH message retained for `rnti`, if any
    pub fn discard_pending_ccch(&self, rnti: Rnti) -> bool {
        self.pending_ccch.lock().remove(&rnti).is_some()
    }

    pub fn has_pending_ccch(&self, rnti: Rnti) -> bool {
        self.pending_ccch.lock().contains_key(&rnti)
    }

    pub fn nof_pending_ccch(&self) -> usize {
        self.pending_ccch.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::executor::{ManualExecutor, RoundRobinUeExecutorMapper, TaskExecutor};
    use interfaces::{MacLogicalChannelConfig, MacSduRxNotifier};

    #[derive(Default)]
    struct SchedSpy {
        bsrs: Mutex<Vec<UlBsrIndication>>,
        phrs: Mutex<Vec<UlPhrIndication>>,
        srs: Mutex<Vec<UlSrIndication>>,
    }

    impl SchedulerUlFeedbackHandler for SchedSpy {
        fn handle_ul_bsr_indication(&self, bsr: UlBsrIndication) {
            self.bsrs.lock().push(bsr);
        }
        fn handle_ul_phr_indication(&self, phr: UlPhrIndication) {
            self.phrs.lock().push(phr);
        }
        fn handle_sr_indication(&self, sr: UlSrIndication) {
            self.srs.lock().push(sr);
        }
    }

    #[derive(Default)]
    struct UeCtrlSpy {
        ccch: Mutex<Vec<UlCcchIndication>>,
        crnti_ces: Mutex<Vec<DuUeIndex>>,
    }

    impl MacUeControlNotifier for UeCtrlSpy {
        fn on_ul_ccch_msg_received(&self, msg: UlCcchIndication) {
            self.ccch.lock().push(msg);
        }
        fn on_crnti_ce_received(&self, old_ue_index: DuUeIndex) {
            self.crnti_ces.lock().push(old_ue_index);
        }
    }

    #[derive(Default)]
    struct SduSpy(Mutex<Vec<MacRxSdu>>);

    impl MacSduRxNotifier for SduSpy {
        fn on_new_sdu(&self, sdu: MacRxSdu) {
            self.0.lock().push(sdu);
        }
    }

    struct TestBench {
        handler: Arc<PduRxHandler>,
        ues: Arc<MacUlUeManager>,
        workers: Vec<Arc<ManualExecutor>>,
        sched: Arc<SchedSpy>,
        ue_ctrl: Arc<UeCtrlSpy>,
    }

    impl TestBench {
        fn new() -> Self {
            let workers: Vec<_> = (0..2).map(|i| Arc::new(ManualExecutor::new(format!("ue-{}", i), 8))).collect();
            let mapper = RoundRobinUeExecutorMapper::new(
                workers.iter().map(|w| w.clone() as Arc<dyn TaskExecutor>).collect(),
            );
            let ues = Arc::new(MacUlUeManager::default());
            let sched = Arc::new(SchedSpy::default());
            let ue_ctrl = Arc::new(UeCtrlSpy::default());
            let handler = Arc::new(PduRxHandler::new(
                ues.clone(),
                Arc::new(mapper),
                sched.clone(),
                ue_ctrl.clone(),
            ));
            Self {
                handler,
                ues,
                workers,
                sched,
                ue_ctrl,
            }
        }

        fn add_ue(&self, ue_index: u16, rnti: u16, lcids: &[u8]) -> Arc<SduSpy> {
            let sink = Arc::new(SduSpy::default());
            let bearers: Vec<_> = lcids
                .iter()
                .map(|&lcid| MacLogicalChannelConfig {
                    lcid: Lcid(lcid),
                    ul_bearer: sink.clone(),
                })
                .collect();
            self.ues
                .add_ue(DuUeIndex(ue_index), Rnti(rnti), DuCellIndex(0), &bearers)
                .unwrap();
            sink
        }

        fn rx(&self, rnti: u16, payload: &'static [u8]) -> bool {
            let routed_ue = self.ues.ue_index_of(Rnti(rnti));
            self.rx_routed(rnti, routed_ue, payload)
        }

        fn rx_routed(&self, rnti: u16, routed_ue: DuUeIndex, payload: &'static [u8]) -> bool {
            self.handler.handle_rx_pdu(
                SlotPoint::new(10, 3),
                DuCellIndex(0),
                routed_ue,
                MacRxPdu {
                    rnti: Rnti(rnti),
                    harq_id: 0,
                    payload: Bytes::from_static(payload),
                },
            )
        }
    }

    #[test]
    fn test_sdu_and_short_bsr() {
        let bench = TestBench::new();
        let sink = bench.add_ue(0, 0x4601, &[1]);

        assert!(bench.rx(0x4601, &[0x3d, 0x59, 0x01, 0x02, 0xaa, 0xbb]));

        let sdus = sink.0.lock();
        assert_eq!(sdus.len(), 1);
        assert_eq!(sdus[0].lcid, Lcid(1));
        assert_eq!(&sdus[0].payload[..], &[0xaa, 0xbb]);

        let bsrs = bench.sched.bsrs.lock();
        assert_eq!(bsrs.len(), 1);
        assert_eq!(bsrs[0].format, BsrFormat::ShortBsr);
        assert_eq!(bsrs[0].reported_lcgs, vec![LcgBsrReport { lcg_id: LcgId(2), nof_bytes: 28581 }]);
    }

    #[test]
    fn test_zero_short_bsr_reports_all_lcgs() {
        let bench = TestBench::new();
        bench.add_ue(0, 0x4601, &[]);

        assert!(bench.rx(0x4601, &[0x3b, 0x40]));

        let bsrs = bench.sched.bsrs.lock();
        assert_eq!(bsrs[0].format, BsrFormat::ShortTruncatedBsr);
        assert_eq!(bsrs[0].reported_lcgs.len(), MAX_NOF_LCGS);
        assert!(bsrs[0].reported_lcgs.iter().all(|r| r.nof_bytes == 0));
    }

    #[test]
    fn test_long_bsr_and_phr() {
        let bench = TestBench::new();
        bench.add_ue(0, 0x4601, &[]);

        // Long BSR with LCG1 and LCG4, SE PHR
        assert!(bench.rx(0x4601, &[0x3e, 0x03, 0b0001_0010, 1, 254, 0x39, 40, 53]));

        let bsrs = bench.sched.bsrs.lock();
        assert_eq!(
            bsrs[0].reported_lcgs,
            vec![
                LcgBsrReport { lcg_id: LcgId(1), nof_bytes: 10 },
                LcgBsrReport { lcg_id: LcgId(4), nof_bytes: 81338369 },
            ]
        );
        let phrs = bench.sched.phrs.lock();
        assert_eq!(phrs[0].ph.min_db, 8);
        assert_eq!(phrs[0].p_cmax.min_dbm, 23);
    }

    #[test]
    fn test_malformed_long_bsr_is_skipped() {
        let bench = TestBench::new();
        let sink = bench.add_ue(0, 0x4601, &[2]);

        // Bitmap flags 2 LCGs but carries one level, then an SDU
        assert!(bench.rx(0x4601, &[0x3e, 0x02, 0b0000_0011, 7, 0x02, 0x01, 0xee]));
        assert!(bench.sched.bsrs.lock().is_empty());
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[test]
    fn test_malformed_pdu_is_discarded() {
        let bench = TestBench::new();
        let sink = bench.add_ue(0, 0x4601, &[1]);

        assert!(!bench.rx(0x4601, &[0x01, 0x02, 0xaa, 0x3d, 0x00, 0x22]));
        assert!(sink.0.lock().is_empty());
        assert!(bench.sched.bsrs.lock().is_empty());
        assert_eq!(bench.handler.stats().snapshot().pdus_discarded, 1);
    }

    #[test]
    fn test_unregistered_lcid_is_dropped() {
        let bench = TestBench::new();
        let sink = bench.add_ue(0, 0x4601, &[1]);

        assert!(bench.rx(0x4601, &[0x05, 0x01, 0xaa, 0x01, 0x01, 0xbb]));
        let sdus = sink.0.lock();
        assert_eq!(sdus.len(), 1);
        assert_eq!(&sdus[0].payload[..], &[0xbb]);
        assert_eq!(bench.handler.stats().snapshot().sdus_discarded, 1);
    }

    #[test]
    fn test_ccch_from_unknown_identity_is_retained_once() {
        let bench = TestBench::new();

        assert!(bench.rx(0x4601, &[0x34, 1, 2, 3, 4, 5, 6]));
        assert!(bench.rx(0x4601, &[0x34, 9, 9, 9, 9, 9, 9]));

        let ccch = bench.ue_ctrl.ccch.lock();
        assert_eq!(ccch.len(), 1);
        assert_eq!(ccch[0].tc_rnti, Rnti(0x4601));
        assert_eq!(&ccch[0].payload[..], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(bench.handler.nof_pending_ccch(), 1);
    }

    #[test]
    fn test_pending_ccch_flushed_when_srb0_exists() {
        let bench = TestBench::new();
        assert!(bench.rx(0x4601, &[0x34, 1, 2, 3, 4, 5, 6]));

        let sink = bench.add_ue(0, 0x4601, &[1]);
        assert!(!bench.handler.flush_pending_ccch(DuUeIndex(0)));
        assert_eq!(bench.handler.nof_pending_ccch(), 1);

        bench
            .ues
            .find_ue(DuUeIndex(0))
            .unwrap()
            .addmod_bearers(&[MacLogicalChannelConfig {
                lcid: Lcid::SRB0,
                ul_bearer: sink.clone(),
            }]);
        assert!(bench.handler.flush_pending_ccch(DuUeIndex(0)));
        assert!(!bench.handler.flush_pending_ccch(DuUeIndex(0)));

        let sdus = sink.0.lock();
        assert_eq!(sdus.len(), 1);
        assert_eq!(sdus[0].lcid, Lcid::SRB0);
    }

    #[test]
    fn test_unknown_identity_without_ccch_is_discarded() {
        let bench = TestBench::new();
        assert!(!bench.rx(0x4601, &[0x3d, 0x59]));
        assert!(bench.sched.bsrs.lock().is_empty());
    }

    #[test]
    fn test_crnti_ce_continues_on_target_context() {
        let bench = TestBench::new();
        bench.add_ue(1, 0x4601, &[]);
        bench.add_ue(2, 0x4602, &[]);

        // TC-RNTI 0x4602 (ue 2) claims C-RNTI 0x4601 (ue 1)
        assert!(bench.rx(0x4602, &[0x3a, 0x46, 0x01, 0x3d, 0x21]));
        assert!(bench.sched.bsrs.lock().is_empty());
        assert_eq!(bench.workers[1].pending(), 1);
        assert_eq!(bench.workers[0].pending(), 0);

        bench.workers[1].run_pending();
        assert_eq!(*bench.ue_ctrl.crnti_ces.lock(), vec![DuUeIndex(2)]);

        let bsrs = bench.sched.bsrs.lock();
        assert_eq!(bsrs.len(), 1);
        assert_eq!(bsrs[0].ue_index, DuUeIndex(1));
        assert_eq!(bsrs[0].crnti, Rnti(0x4601));

        let srs = bench.sched.srs.lock();
        assert_eq!(srs.len(), 1);
        assert_eq!(srs[0].ue_index, DuUeIndex(1));
    }

    #[test]
    fn test_crnti_ce_with_unknown_target() {
        let bench = TestBench::new();
        bench.add_ue(0, 0x4602, &[]);

        assert!(!bench.rx(0x4602, &[0x3a, 0x47, 0x00, 0x3d, 0x21]));
        assert!(bench.workers.iter().all(|w| w.pending() == 0));
        assert!(bench.ue_ctrl.crnti_ces.lock().is_empty());
    }

    #[test]
    fn test_crnti_ce_with_reserved_rnti() {
        let bench = TestBench::new();
        bench.add_ue(0, 0x4602, &[]);

        let pdus: [&'static [u8]; 2] = [&[0x3a, 0xff, 0xff, 0x3d, 0x21], &[0x3a, 0x00, 0x00]];
        for pdu in pdus {
            assert!(!bench.rx(0x4602, pdu));
        }
        assert!(bench.workers.iter().all(|w| w.pending() == 0));
        assert!(bench.sched.bsrs.lock().is_empty());
        assert!(bench.ue_ctrl.crnti_ces.lock().is_empty());
        assert_eq!(bench.handler.stats().snapshot().pdus_discarded, 2);
    }

    #[test]
    fn test_reserved_phy_rnti_is_unknown_identity() {
        let bench = TestBench::new();
        bench.add_ue(0, 0x4601, &[]);

        assert!(!bench.rx(0xffff, &[0x3d, 0x21]));
        assert!(!bench.rx(0x0000, &[0x3d, 0x21]));
        assert!(bench.sched.bsrs.lock().is_empty());
        assert_eq!(bench.handler.stats().snapshot().pdus_discarded, 2);
    }

    #[test]
    fn test_pdu_moves_to_context_of_newly_bound_ue() {
        let bench = TestBench::new();
        // Routed while the identity was unknown, UE 1 lives on worker 1
        bench.add_ue(1, 0x4601, &[]);

        assert!(bench.rx_routed(0x4601, DuUeIndex::INVALID, &[0x3d, 0x21]));
        assert!(bench.sched.bsrs.lock().is_empty());
        assert_eq!(bench.workers[0].pending(), 0);
        assert_eq!(bench.workers[1].pending(), 1);
        assert_eq!(bench.handler.stats().snapshot().pdus_received, 0);

        assert_eq!(bench.workers[1].run_pending(), 1);
        let bsrs = bench.sched.bsrs.lock();
        assert_eq!(bsrs.len(), 1);
        assert_eq!(bsrs[0].ue_index, DuUeIndex(1));
        assert_eq!(bench.handler.stats().snapshot().pdus_received, 1);
    }

    #[test]
    fn test_pdu_of_removed_ue_moves_to_default_context() {
        let bench = TestBench::new();
        bench.add_ue(1, 0x4601, &[]);
        bench.ues.remove_ue(DuUeIndex(1));

        assert!(bench.rx_routed(0x4601, DuUeIndex(1), &[0x3d, 0x21]));
        assert_eq!(bench.workers[1].pending(), 0);
        assert_eq!(bench.workers[0].run_pending(), 1);
        assert!(bench.sched.bsrs.lock().is_empty());
        assert_eq!(bench.handler.stats().snapshot().pdus_discarded, 1);
    }

    #[test]
    fn test_last_crnti_ce_wins() {
        let bench = TestBench::new();
        let sink1 = bench.add_ue(1, 0x4601, &[1]);
        let sink2 = bench.add_ue(2, 0x4602, &[1]);
        bench.add_ue(3, 0x4603, &[1]);

        // C-RNTI 0x4601, SDU on LCID 1, C-RNTI 0x4602
        assert!(bench.rx(0x4603, &[0x3a, 0x46, 0x01, 0x01, 0x01, 0xaa, 0x3a, 0x46, 0x02]));
        assert_eq!(bench.workers[0].pending(), 1);
        assert_eq!(bench.workers[1].pending(), 0);
        bench.workers[0].run_pending();

        assert!(sink1.0.lock().is_empty());
        let sdus = sink2.0.lock();
        assert_eq!(sdus.len(), 1);
        assert_eq!(sdus[0].rnti, Rnti(0x4602));
        assert_eq!(sdus[0].lcid, Lcid(1));
        assert_eq!(&sdus[0].payload[..], &[0xaa]);

        assert_eq!(*bench.ue_ctrl.crnti_ces.lock(), vec![DuUeIndex(3)]);
        let srs = bench.sched.srs.lock();
        assert_eq!(srs.len(), 1);
        assert_eq!(srs[0].ue_index, DuUeIndex(2));

        let stats = bench.handler.stats().snapshot();
        assert_eq!(stats.crnti_ces_received, 1);
        assert_eq!(stats.sdus_forwarded, 1);
    }
}
