//! Buffer Status Report decoding
//!
//! Implements the BSR MAC CE formats of 3GPP TS 38.321 Section 6.1.3.1 and
//! the buffer size level tables 6.1.3.1-1 (5 bits) and 6.1.3.1-2 (8 bits).

use arrayvec::ArrayVec;
use bitflags::bitflags;
use common::types::{LcgId, MAX_NOF_LCGS};
use interfaces::BsrFormat;
use thiserror::Error;

/// Errors raised by CE codecs that validate their payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CeDecodeError {
    #[error("Empty {0:?} payload")]
    EmptyPayload(BsrFormat),

    #[error("{format:?} with {nof_lcgs} LCGs in the bitmap carries {nof_levels} buffer size fields")]
    BitmapMismatch {
        format: BsrFormat,
        nof_lcgs: usize,
        nof_levels: usize,
    },
}

bitflags! {
    /// LCG presence bitmap of a long BSR, bit i flags LCG i
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LcgBitmap: u8 {
        const LCG0 = 1 << 0;
        const LCG1 = 1 << 1;
        const LCG2 = 1 << 2;
        const LCG3 = 1 << 3;
        const LCG4 = 1 << 4;
        const LCG5 = 1 << 5;
        const LCG6 = 1 << 6;
        const LCG7 = 1 << 7;
    }
}

impl LcgBitmap {
    pub fn contains_lcg(&self, lcg_id: LcgId) -> bool {
        lcg_id.is_valid() && self.bits() & (1 << lcg_id.0) != 0
    }

    /// Present LCGs in ascending order
    pub fn lcgs(&self) -> impl Iterator<Item = LcgId> + '_ {
        (0..MAX_NOF_LCGS as u8)
            .map(LcgId)
            .filter(move |lcg| self.contains_lcg(*lcg))
    }
}

/// Quantized buffer level of one LCG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcgBufferLevel {
    pub lcg_id: LcgId,
    /// Index into the buffer size table
    pub buffer_size: u8,
}

/// Short or short truncated BSR
pub type ShortBsrReport = LcgBufferLevel;

/// Long or long truncated BSR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongBsrReport {
    pub bitmap: LcgBitmap,
    pub list: ArrayVec<LcgBufferLevel, MAX_NOF_LCGS>,
}

/// Decode a short (truncated) BSR: LCG ID (3 bits) | buffer size (5 bits)
pub fn decode_sbsr(payload: &[u8]) -> ShortBsrReport {
    debug_assert_eq!(payload.len(), 1, "short BSR payload must be one byte");
    let octet = payload[0];
    LcgBufferLevel {
        lcg_id: LcgId(octet >> 5),
        buffer_size: octet & 0x1f,
    }
}

/// Decode a long (truncated) BSR: LCG bitmap followed by one 8-bit buffer
/// size per flagged LCG in ascending LCG order.
///
/// A long BSR must carry exactly one field per flagged LCG. A long truncated
/// BSR may carry fewer, never more.
pub fn decode_lbsr(format: BsrFormat, payload: &[u8]) -> Result<LongBsrReport, CeDecodeError> {
    let (&bitmap, levels) = payload
        .split_first()
        .ok_or(CeDecodeError::EmptyPayload(format))?;
    let bitmap = LcgBitmap::from_bits_retain(bitmap);
    let nof_lcgs = bitmap.bits().count_ones() as usize;

    let consistent = match format {
        BsrFormat::LongTruncatedBsr => levels.len() <= nof_lcgs,
        _ => levels.len() == nof_lcgs,
    };
    if !consistent {
        return Err(CeDecodeError::BitmapMismatch {
            format,
            nof_lcgs,
            nof_levels: levels.len(),
        });
    }

    let list = bitmap
        .lcgs()
        .zip(levels.iter())
        .map(|(lcg_id, &buffer_size)| LcgBufferLevel { lcg_id, buffer_size })
        .collect();

    Ok(LongBsrReport { bitmap, list })
}

/// TS 38.321 Table 6.1.3.1-1, upper bound in bytes per 5-bit index. The last
/// entry stands for "more than 150000".
const BUFFER_SIZE_LEVELS_5BIT: [u32; 32] = [
    0, 10, 14, 20, 28, 38, 53, 74, 102, 142, 198, 276, 384, 535, 745, 1038, 1446, 2014, 2806, 3909,
    5446, 7587, 10570, 14726, 20516, 28581, 39818, 55474, 77284, 107669, 150000, 150001,
];

/// TS 38.321 Table 6.1.3.1-2, upper bound in bytes per 8-bit index. Index 254
/// stands for "more than 81338368", 255 is reserved and saturates.
const BUFFER_SIZE_LEVELS_8BIT: [u32; 256] = [
    0, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 22, 23, 25, 26, 28, 30, 32, 34, 36, 38, 40, 43,
    46, 49, 52, 55, 59, 62, 66, 71, 75, 80, 85, 91, 97, 103, 110, 117, 124, 132, 141, 150, 160,
    170, 181, 193, 205, 218, 233, 248, 264, 281, 299, 318, 339, 361, 384, 409, 436, 464, 494,
    526, 560, 597, 635, 677, 720, 767, 817, 870, 926, 987, 1051, 1119, 1191, 1269, 1351, 1439,
    1532, 1631, 1737, 1850, 1970, 2098, 2234, 2379, 2533, 2698, 2873, 3059, 3258, 3469, 3694,
    3934, 4189, 4461, 4751, 5059, 5387, 5737, 6109, 6506, 6928, 7378, 7857, 8367, 8910, 9488,
    10104, 10760, 11458, 12202, 12994, 13838, 14736, 15692, 16711, 17795, 18951, 20181, 21491,
    22885, 24371, 25953, 27638, 29431, 31342, 33376, 35543, 37850, 40307, 42923, 45709, 48676,
    51836, 55200, 58784, 62599, 66663, 70990, 75598, 80505, 85730, 91295, 97221, 103532, 110252,
    117409, 125030, 133146, 141789, 150992, 160793, 171231, 182345, 194182, 206786, 220209,
    234503, 249725, 265935, 283197, 301579, 321155, 342002, 364202, 387842, 413018, 439827,
    468377, 498780, 531156, 565634, 602350, 641449, 683087, 727427, 774645, 824928, 878475,
    935498, 996222, 1060888, 1129752, 1203085, 1281179, 1364342, 1452903, 1547213, 1647644,
    1754595, 1868488, 1989774, 2118933, 2256475, 2402946, 2558924, 2725027, 2901912, 3090279,
    3290873, 3504487, 3731968, 3974215, 4232186, 4506902, 4799451, 5110989, 5442750, 5796046,
    6172275, 6572925, 6999582, 7453933, 7937777, 8453028, 9001725, 9586039, 10208280, 10870913,
    11576557, 12328006, 13128233, 13980403, 14887889, 15854280, 16883401, 17979324, 19146385,
    20389201, 21712690, 23122088, 24622972, 26221280, 27923336, 29735875, 31666069, 33721553,
    35910462, 38241455, 40723756, 43367187, 46182206, 49179951, 52372284, 55771835, 59392055,
    63247269, 67352729, 71724679, 76380419, 81338368, 81338369, 81338369,
];

/// Convert a buffer size index into bytes using the table of `format`
pub fn buff_size_field_to_bytes(index: usize, format: BsrFormat) -> u32 {
    let table: &[u32] = if format.is_short() {
        &BUFFER_SIZE_LEVELS_5BIT
    } else {
        &BUFFER_SIZE_LEVELS_8BIT
    };
    // Out of range indexes saturate to "at least" the last level
    table[index.min(table.len() - 1)]
}
