//! Message Types exchanged between the MAC uplink core and its collaborators
//!
//! PHY indications and UE lifecycle requests flow in, scheduler feedback and
//! SDU deliveries flow out.

use bytes::Bytes;
use common::types::{DuCellIndex, DuUeIndex, LcgId, Lcid, Rnti, SlotPoint};
use serde::{Deserialize, Serialize};

/// One received transport block for one RNTI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacRxPdu {
    /// RNTI the PUSCH was scheduled for
    pub rnti: Rnti,
    /// HARQ process the TB belongs to
    #[serde(default)]
    pub harq_id: u8,
    /// Decoded transport block
    pub payload: Bytes,
}

/// Received-data event delivered by the PHY once per slot and cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacRxDataIndication {
    /// Slot in which the PDUs were received
    pub sl_rx: SlotPoint,
    /// Cell the PDUs were received on
    pub cell_index: DuCellIndex,
    /// Received PDUs
    pub pdus: Vec<MacRxPdu>,
}

/// Logical channel configuration supplied on UE creation or bearer add/mod
#[derive(Clone)]
pub struct MacLogicalChannelConfig {
    /// Logical channel identity
    pub lcid: Lcid,
    /// Sink receiving the SDUs of this channel
    pub ul_bearer: std::sync::Arc<dyn crate::MacSduRxNotifier>,
}

impl std::fmt::Debug for MacLogicalChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacLogicalChannelConfig")
            .field("lcid", &self.lcid)
            .finish_non_exhaustive()
    }
}

/// UE admission request
#[derive(Debug, Clone)]
pub struct MacUeCreateRequest {
    /// Index assigned by the UE lifecycle owner
    pub ue_index: DuUeIndex,
    /// Primary cell of the UE
    pub cell_index: DuCellIndex,
    /// C-RNTI of the UE
    pub crnti: Rnti,
    /// Initial logical channels
    pub bearers: Vec<MacLogicalChannelConfig>,
}

/// Format of a received buffer status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BsrFormat {
    ShortBsr,
    ShortTruncatedBsr,
    LongBsr,
    LongTruncatedBsr,
}

impl BsrFormat {
    /// Short formats use the 5-bit buffer size table, long ones the 8-bit table
    pub fn is_short(&self) -> bool {
        matches!(self, BsrFormat::ShortBsr | BsrFormat::ShortTruncatedBsr)
    }
}

/// Buffer occupancy of one logical channel group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcgBsrReport {
    pub lcg_id: LcgId,
    /// Buffered bytes, converted from the quantized level
    pub nof_bytes: u32,
}

/// Buffer status report forwarded to the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UlBsrIndication {
    pub cell_index: DuCellIndex,
    pub ue_index: DuUeIndex,
    pub crnti: Rnti,
    pub format: BsrFormat,
    pub reported_lcgs: Vec<LcgBsrReport>,
}

/// Closed dB interval a power headroom code maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhDbRange {
    pub min_db: i32,
    pub max_db: i32,
}

/// Closed dBm interval a configured maximum power code maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmaxDbmRange {
    pub min_dbm: i32,
    pub max_dbm: i32,
}

/// Power headroom report forwarded to the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UlPhrIndication {
    pub cell_index: DuCellIndex,
    pub ue_index: DuUeIndex,
    pub crnti: Rnti,
    pub ph: PhDbRange,
    pub p_cmax: PcmaxDbmRange,
}

/// Explicit request for an uplink grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UlSrIndication {
    pub cell_index: DuCellIndex,
    pub ue_index: DuUeIndex,
    pub crnti: Rnti,
}

/// SDU delivered to a logical channel sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacRxSdu {
    pub rnti: Rnti,
    pub lcid: Lcid,
    pub payload: Bytes,
}

/// First CCCH message seen for an identity without UE context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlCcchIndication {
    pub cell_index: DuCellIndex,
    pub tc_rnti: Rnti,
    pub slot_rx: SlotPoint,
    pub payload: Bytes,
}
