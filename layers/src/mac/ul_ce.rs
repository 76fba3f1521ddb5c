//! Fixed size UL MAC CEs: C-RNTI and Single Entry PHR
//!
//! Implements TS 38.321 Sections 6.1.3.2 and 6.1.3.8 with the report
//! mappings of TS 38.133 Tables 10.1.17.1-1 and 10.1.18.1-1.

use common::types::Rnti;
use interfaces::{PcmaxDbmRange, PhDbRange};

const PH_CODE_MASK: u8 = 0x3f;

/// PH codes below this step in 1 dB, above it in 2 dB
const PH_FIRST_BREAKPOINT: i32 = 54;
/// Highest PH code, meaning "at least 40 dB"
const PH_LAST_CODE: i32 = 63;
/// Highest P_CMAX code, meaning "at least 33 dBm"
const PCMAX_LAST_CODE: i32 = 63;

/// Decoded Single Entry PHR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SePhrReport {
    pub ph: PhDbRange,
    pub p_cmax: PcmaxDbmRange,
}

/// Decode a C-RNTI CE: the 16-bit C-RNTI, big-endian
pub fn decode_crnti_ce(payload: &[u8]) -> Rnti {
    debug_assert_eq!(payload.len(), 2, "C-RNTI CE payload must be two bytes");
    Rnti(u16::from_be_bytes([payload[0], payload[1]]))
}

/// Decode a Single Entry PHR: R R PH(6) | R R P_CMAX(6)
pub fn decode_se_phr(payload: &[u8]) -> SePhrReport {
    debug_assert_eq!(payload.len(), 2, "SE PHR payload must be two bytes");
    SePhrReport {
        ph: ph_code_to_db_range(payload[0] & PH_CODE_MASK),
        p_cmax: pcmax_code_to_dbm_range(payload[1] & PH_CODE_MASK),
    }
}

/// Power headroom code to dB interval (TS 38.133 Table 10.1.17.1-1)
pub fn ph_code_to_db_range(code: u8) -> PhDbRange {
    let code = i32::from(code & PH_CODE_MASK);
    if code < PH_FIRST_BREAKPOINT {
        PhDbRange {
            min_db: code - 32,
            max_db: code - 31,
        }
    } else if code < PH_LAST_CODE {
        let step = code - PH_FIRST_BREAKPOINT;
        PhDbRange {
            min_db: 22 + 2 * step,
            max_db: 24 + 2 * step,
        }
    } else {
        PhDbRange { min_db: 40, max_db: 40 }
    }
}

/// Configured maximum output power code to dBm interval (TS 38.133 Table 10.1.18.1-1)
pub fn pcmax_code_to_dbm_range(code: u8) -> PcmaxDbmRange {
    let code = i32::from(code & PH_CODE_MASK);
    if code < PCMAX_LAST_CODE {
        PcmaxDbmRange {
            min_dbm: code - 30,
            max_dbm: code - 29,
        }
    } else {
        PcmaxDbmRange { min_dbm: 33, max_dbm: 33 }
    }
}
