//! Trace replay
//!
//! Feeds a JSON-lines trace of uplink events through the MAC uplink processor.
//! Collaborator notifications are logged and counted.

use anyhow::Context;
use common::types::{DuCellIndex, DuUeIndex, Lcid, Rnti};
use interfaces::{
    MacLogicalChannelConfig, MacRxDataIndication, MacRxSdu, MacSduRxNotifier, MacUeControlNotifier,
    MacUeCreateRequest, SchedulerUlFeedbackHandler, UlBsrIndication, UlCcchIndication, UlPhrIndication,
    UlSrIndication,
};
use layers::mac::MacUlProcessor;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One line of a trace file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// PDUs received in one slot
    RxData(MacRxDataIndication),
    /// UE admitted with the given logical channels
    UeCreate {
        ue_index: DuUeIndex,
        #[serde(default)]
        cell_index: DuCellIndex,
        crnti: Rnti,
        #[serde(default)]
        lcids: Vec<Lcid>,
    },
    UeRemove {
        ue_index: DuUeIndex,
    },
    BearerAdd {
        ue_index: DuUeIndex,
        lcids: Vec<Lcid>,
    },
    BearerRemove {
        ue_index: DuUeIndex,
        lcids: Vec<Lcid>,
    },
}

/// Notification counters
#[derive(Debug, Default)]
pub struct ReplayCounters {
    pub bsrs: AtomicU64,
    pub phrs: AtomicU64,
    pub srs: AtomicU64,
    pub sdus: AtomicU64,
    pub sdu_bytes: AtomicU64,
    pub ccch_msgs: AtomicU64,
    pub crnti_ces: AtomicU64,
}

impl ReplayCounters {
    fn inc(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        info!("Notification statistics:");
        info!(
            "  BSRs: {}, PHRs: {}, SRs: {}",
            self.bsrs.load(Ordering::Relaxed),
            self.phrs.load(Ordering::Relaxed),
            self.srs.load(Ordering::Relaxed)
        );
        info!(
            "  SDUs: {} ({} bytes)",
            self.sdus.load(Ordering::Relaxed),
            self.sdu_bytes.load(Ordering::Relaxed)
        );
        info!(
            "  CCCH messages: {}, C-RNTI CEs: {}",
            self.ccch_msgs.load(Ordering::Relaxed),
            self.crnti_ces.load(Ordering::Relaxed)
        );
    }
}

/// Scheduler stand-in logging the feedback it gets
pub struct LoggingScheduler {
    counters: Arc<ReplayCounters>,
}

impl LoggingScheduler {
    pub fn new(counters: Arc<ReplayCounters>) -> Self {
        Self { counters }
    }
}

impl SchedulerUlFeedbackHandler for LoggingScheduler {
    fn handle_ul_bsr_indication(&self, bsr: UlBsrIndication) {
        debug!(
            "ue={} rnti={}: {:?} {:?}",
            bsr.ue_index, bsr.crnti, bsr.format, bsr.reported_lcgs
        );
        ReplayCounters::inc(&self.counters.bsrs, 1);
    }

    fn handle_ul_phr_indication(&self, phr: UlPhrIndication) {
        debug!(
            "ue={} rnti={}: PHR ph=[{}, {}] p_cmax=[{}, {}]",
            phr.ue_index, phr.crnti, phr.ph.min_db, phr.ph.max_db, phr.p_cmax.min_dbm, phr.p_cmax.max_dbm
        );
        ReplayCounters::inc(&self.counters.phrs, 1);
    }

    fn handle_sr_indication(&self, sr: UlSrIndication) {
        debug!("ue={} rnti={}: SR", sr.ue_index, sr.crnti);
        ReplayCounters::inc(&self.counters.srs, 1);
    }
}

/// UE lifecycle owner stand-in. UE creation comes from the trace itself.
pub struct LoggingUeControl {
    counters: Arc<ReplayCounters>,
}

impl LoggingUeControl {
    pub fn new(counters: Arc<ReplayCounters>) -> Self {
        Self { counters }
    }
}

impl MacUeControlNotifier for LoggingUeControl {
    fn on_ul_ccch_msg_received(&self, msg: UlCcchIndication) {
        info!(
            "{} tc-rnti={}: CCCH message of {} bytes",
            msg.slot_rx,
            msg.tc_rnti,
            msg.payload.len()
        );
        ReplayCounters::inc(&self.counters.ccch_msgs, 1);
    }

    fn on_crnti_ce_received(&self, old_ue_index: DuUeIndex) {
        info!("ue={}: C-RNTI CE received, UE to be released", old_ue_index);
        ReplayCounters::inc(&self.counters.crnti_ces, 1);
    }
}

/// Logical channel sink logging received SDUs
pub struct LoggingSduSink {
    ue_index: DuUeIndex,
    counters: Arc<ReplayCounters>,
}

impl MacSduRxNotifier for LoggingSduSink {
    fn on_new_sdu(&self, sdu: MacRxSdu) {
        debug!(
            "ue={} rnti={} lcid={}: SDU [{}]",
            self.ue_index,
            sdu.rnti,
            sdu.lcid,
            common::utils::bytes_to_hex_truncated(&sdu.payload, 16)
        );
        ReplayCounters::inc(&self.counters.sdus, 1);
        ReplayCounters::inc(&self.counters.sdu_bytes, sdu.payload.len() as u64);
    }
}

/// Outcome of a replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub invalid_lines: usize,
    pub rejected_requests: usize,
}

/// Drives a [`MacUlProcessor`] from trace events
pub struct TraceReplayer {
    mac_ul: Arc<MacUlProcessor>,
    counters: Arc<ReplayCounters>,
}

impl TraceReplayer {
    pub fn new(mac_ul: Arc<MacUlProcessor>, counters: Arc<ReplayCounters>) -> Self {
        Self { mac_ul, counters }
    }

    fn bearers(&self, ue_index: DuUeIndex, lcids: &[Lcid]) -> Vec<MacLogicalChannelConfig> {
        let sink: Arc<dyn MacSduRxNotifier> = Arc::new(LoggingSduSink {
            ue_index,
            counters: self.counters.clone(),
        });
        lcids
            .iter()
            .map(|&lcid| MacLogicalChannelConfig {
                lcid,
                ul_bearer: sink.clone(),
            })
            .collect()
    }

    /// Apply one event. Returns false if the MAC rejected the request.
    pub fn apply(&self, event: TraceEvent) -> bool {
        match event {
            TraceEvent::RxData(ind) => {
                self.mac_ul.handle_rx_data_indication(ind);
                true
            }
            TraceEvent::UeCreate {
                ue_index,
                cell_index,
                crnti,
                lcids,
            } => self.mac_ul.add_ue(MacUeCreateRequest {
                ue_index,
                cell_index,
                crnti,
                bearers: self.bearers(ue_index, &lcids),
            }),
            TraceEvent::UeRemove { ue_index } => self.mac_ul.remove_ue(ue_index),
            TraceEvent::BearerAdd { ue_index, lcids } => {
                self.mac_ul.addmod_bearers(ue_index, &self.bearers(ue_index, &lcids))
            }
            TraceEvent::BearerRemove { ue_index, lcids } => self.mac_ul.remove_bearers(ue_index, &lcids),
        }
    }

    /// Replay every line of `reader`. Blank lines and `#` comments are skipped.
    pub fn replay<R: BufRead>(&self, reader: R) -> anyhow::Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read trace line {}", line_no + 1))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let event: TraceEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping trace line {}: {}", line_no + 1, e);
                    summary.invalid_lines += 1;
                    continue;
                }
            };

            summary.events += 1;
            if !self.apply(event) {
                summary.rejected_requests += 1;
            }
        }

        Ok(summary)
    }
}
