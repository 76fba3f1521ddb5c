//! Notification interfaces implemented by the MAC collaborators
//!
//! Every method is called from a UE execution context and must not block.

use crate::message_types::{MacRxSdu, UlBsrIndication, UlCcchIndication, UlPhrIndication, UlSrIndication};
use common::types::DuUeIndex;

/// Scheduler feedback for uplink events
pub trait SchedulerUlFeedbackHandler: Send + Sync {
    /// Buffer status report received
    fn handle_ul_bsr_indication(&self, bsr: UlBsrIndication);

    /// Power headroom report received
    fn handle_ul_phr_indication(&self, phr: UlPhrIndication);

    /// Force an uplink grant for the UE
    fn handle_sr_indication(&self, sr: UlSrIndication);
}

/// Sink of one UE logical channel
pub trait MacSduRxNotifier: Send + Sync {
    fn on_new_sdu(&self, sdu: MacRxSdu);
}

/// Notifications towards the UE lifecycle owner
pub trait MacUeControlNotifier: Send + Sync {
    /// CCCH message from an identity that has no UE context yet
    fn on_ul_ccch_msg_received(&self, msg: UlCcchIndication);

    /// The UE behind `old_ue_index` identified itself with a C-RNTI CE of
    /// another, already known UE
    fn on_crnti_ce_received(&self, old_ue_index: DuUeIndex);
}
