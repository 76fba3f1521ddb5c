//! UL-SCH MAC PDU decoding
//!
//! Walks a received transport block and splits it into subPDUs according to
//! 3GPP TS 38.321 Section 6.1.2. Decoded subPDUs are offset/length views into
//! the original buffer, no payload is copied.

use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use std::fmt;
use std::ops::Range;
use thiserror::Error;
use tracing::warn;

use common::types::Lcid;

/// Maximum number of subPDUs decoded from one PDU
pub const MAX_UL_SCH_SUBPDUS: usize = 32;

const LCID_MASK: u8 = 0x3f;
const F_BIT_MASK: u8 = 0x40;

/// LCID values of the UL-SCH (TS 38.321 Table 6.2.1-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LcidUlSch(u8);

impl LcidUlSch {
    pub const CCCH_SIZE_64: Self = Self(0);
    pub const CCCH_SIZE_48: Self = Self(52);
    pub const BIT_RATE_QUERY: Self = Self(53);
    pub const MULTI_ENTRY_PHR_4_OCTET: Self = Self(54);
    pub const CONF_GRANT_CONFIRMATION: Self = Self(55);
    pub const MULTI_ENTRY_PHR_1_OCTET: Self = Self(56);
    pub const SE_PHR: Self = Self(57);
    pub const CRNTI: Self = Self(58);
    pub const SHORT_TRUNC_BSR: Self = Self(59);
    pub const LONG_TRUNC_BSR: Self = Self(60);
    pub const SHORT_BSR: Self = Self(61);
    pub const LONG_BSR: Self = Self(62);
    pub const PADDING: Self = Self(63);

    const MIN_RESERVED: u8 = 33;
    const MAX_RESERVED: u8 = 51;

    /// Build from the LCID field of a subheader. Only the 6 low bits are kept.
    pub fn new(value: u8) -> Self {
        Self(value & LCID_MASK)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_reserved(&self) -> bool {
        (Self::MIN_RESERVED..=Self::MAX_RESERVED).contains(&self.0)
    }

    pub fn is_ccch(&self) -> bool {
        *self == Self::CCCH_SIZE_64 || *self == Self::CCCH_SIZE_48
    }

    /// Carries upper layer data (CCCH or a logical channel 1-32)
    pub fn is_sdu(&self) -> bool {
        self.0 <= Lcid::MAX.0 || *self == Self::CCCH_SIZE_48
    }

    pub fn is_padding(&self) -> bool {
        *self == Self::PADDING
    }

    /// MAC control element
    pub fn is_ce(&self) -> bool {
        (Self::BIT_RATE_QUERY.0..Self::PADDING.0).contains(&self.0)
    }

    /// Logical channel the SDU is delivered to
    pub fn to_lcid(&self) -> Option<Lcid> {
        if self.is_ccch() {
            Some(Lcid::SRB0)
        } else if self.is_sdu() {
            Some(Lcid(self.0))
        } else {
            None
        }
    }

    /// Payload length implied by the LCID, if it is a fixed size element
    pub fn fixed_len(&self) -> Option<usize> {
        match *self {
            Self::CCCH_SIZE_64 => Some(8),
            Self::CCCH_SIZE_48 => Some(6),
            Self::BIT_RATE_QUERY => Some(2),
            Self::CONF_GRANT_CONFIRMATION => Some(0),
            Self::SE_PHR | Self::CRNTI => Some(2),
            Self::SHORT_TRUNC_BSR | Self::SHORT_BSR => Some(1),
            _ => None,
        }
    }

    /// Whether the subheader carries an L field
    pub fn has_length_field(&self) -> bool {
        !self.is_reserved() && !self.is_padding() && self.fixed_len().is_none()
    }
}

impl fmt::Display for LcidUlSch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::CCCH_SIZE_64 => f.write_str("CCCH64"),
            Self::CCCH_SIZE_48 => f.write_str("CCCH48"),
            Self::BIT_RATE_QUERY => f.write_str("BR_QUERY"),
            Self::MULTI_ENTRY_PHR_4_OCTET => f.write_str("MULTI_PHR_4"),
            Self::CONF_GRANT_CONFIRMATION => f.write_str("CG_CONF"),
            Self::MULTI_ENTRY_PHR_1_OCTET => f.write_str("MULTI_PHR_1"),
            Self::SE_PHR => f.write_str("SE_PHR"),
            Self::CRNTI => f.write_str("CRNTI"),
            Self::SHORT_TRUNC_BSR => f.write_str("SHORT_TRUNC_BSR"),
            Self::LONG_TRUNC_BSR => f.write_str("LONG_TRUNC_BSR"),
            Self::SHORT_BSR => f.write_str("SHORT_BSR"),
            Self::LONG_BSR => f.write_str("LONG_BSR"),
            Self::PADDING => f.write_str("PAD"),
            lcid if lcid.is_reserved() => write!(f, "RESERVED({})", lcid.0),
            lcid => write!(f, "LCID{}", lcid.0),
        }
    }
}

/// Errors raised while decoding a UL-SCH PDU
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PduDecodeError {
    #[error("Empty PDU")]
    Empty,

    #[error("Reserved LCID {lcid} at offset {offset}")]
    ReservedLcid { lcid: u8, offset: usize },

    #[error("Truncated L field of LCID {lcid} at offset {offset}")]
    TruncatedHeader { lcid: u8, offset: usize },

    #[error("LCID {lcid} at offset {offset} declares {declared} bytes but only {available} remain")]
    PayloadOverrun {
        lcid: u8,
        offset: usize,
        declared: usize,
        available: usize,
    },
}

/// One decoded subPDU: LCID plus the position of header and payload in the PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlSchSubpdu {
    lcid: LcidUlSch,
    offset: usize,
    header_len: usize,
    payload_len: usize,
}

/// Subheader octet: R(1) F(1) LCID(6)
fn subheader(input: &[u8]) -> IResult<&[u8], (LcidUlSch, bool)> {
    let (rest, octet) = be_u8(input)?;
    Ok((rest, (LcidUlSch::new(octet), octet & F_BIT_MASK != 0)))
}

/// L field, 8 bits or 16 bits when F is set
fn length_field(input: &[u8], long: bool) -> IResult<&[u8], usize> {
    if long {
        let (rest, len) = be_u16(input)?;
        Ok((rest, len as usize))
    } else {
        let (rest, len) = be_u8(input)?;
        Ok((rest, len as usize))
    }
}

fn payload(input: &[u8], len: usize) -> IResult<&[u8], &[u8]> {
    take(len)(input)
}

impl UlSchSubpdu {
    /// Decode the subPDU starting at `offset`
    fn unpack(pdu: &[u8], offset: usize) -> Result<Self, PduDecodeError> {
        let input = &pdu[offset..];
        let (rest, (lcid, f_bit)) = subheader(input).map_err(|_| PduDecodeError::Empty)?;

        if lcid.is_reserved() {
            return Err(PduDecodeError::ReservedLcid {
                lcid: lcid.value(),
                offset,
            });
        }

        if lcid.is_padding() {
            // Padding swallows whatever is left
            return Ok(Self {
                lcid,
                offset,
                header_len: 1,
                payload_len: rest.len(),
            });
        }

        let (rest, payload_len) = match lcid.fixed_len() {
            Some(len) => (rest, len),
            None => length_field(rest, f_bit).map_err(|_| PduDecodeError::TruncatedHeader {
                lcid: lcid.value(),
                offset,
            })?,
        };
        let header_len = input.len() - rest.len();

        payload(rest, payload_len).map_err(|_| PduDecodeError::PayloadOverrun {
            lcid: lcid.value(),
            offset,
            declared: payload_len,
            available: rest.len(),
        })?;

        Ok(Self {
            lcid,
            offset,
            header_len,
            payload_len,
        })
    }

    pub fn lcid(&self) -> LcidUlSch {
        self.lcid
    }

    /// Position of the subheader in the PDU
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Subheader plus payload
    pub fn total_len(&self) -> usize {
        self.header_len + self.payload_len
    }

    /// Byte range covered by subheader and payload
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.total_len()
    }

    pub fn payload_range(&self) -> Range<usize> {
        let start = self.offset + self.header_len;
        start..start + self.payload_len
    }

    /// Payload view into the PDU this subPDU was decoded from
    pub fn payload<'a>(&self, pdu: &'a [u8]) -> &'a [u8] {
        &pdu[self.payload_range()]
    }
}

impl fmt::Display for UlSchSubpdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: len={}", self.lcid, self.payload_len)
    }
}

/// Decoded UL-SCH PDU
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UlSchPdu {
    subpdus: ArrayVec<UlSchSubpdu, MAX_UL_SCH_SUBPDUS>,
    decoded_len: usize,
    truncated: bool,
}

impl UlSchPdu {
    /// Decode a PDU. Any malformed subPDU fails the whole PDU.
    ///
    /// When the PDU holds more than [`MAX_UL_SCH_SUBPDUS`] subPDUs, decoding
    /// stops there and the result is flagged as truncated.
    pub fn decode(pdu: &[u8]) -> Result<Self, PduDecodeError> {
        if pdu.is_empty() {
            return Err(PduDecodeError::Empty);
        }

        let mut decoded = Self::default();
        let mut offset = 0;
        while offset < pdu.len() {
            if decoded.subpdus.is_full() {
                warn!(
                    "UL-SCH PDU holds more than {} subPDUs, ignoring the last {} bytes",
                    MAX_UL_SCH_SUBPDUS,
                    pdu.len() - offset
                );
                decoded.truncated = true;
                break;
            }
            let subpdu = UlSchSubpdu::unpack(pdu, offset)?;
            offset += subpdu.total_len();
            decoded.subpdus.push(subpdu);
        }
        decoded.decoded_len = offset;

        Ok(decoded)
    }

    pub fn len(&self) -> usize {
        self.subpdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subpdus.is_empty()
    }

    pub fn subpdu(&self, index: usize) -> Option<&UlSchSubpdu> {
        self.subpdus.get(index)
    }

    /// Payload of subPDU `index` within `pdu`, the buffer this was decoded from
    pub fn subpdu_payload<'a>(&self, pdu: &'a [u8], index: usize) -> Option<&'a [u8]> {
        self.subpdus.get(index).map(|subpdu| subpdu.payload(pdu))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UlSchSubpdu> {
        self.subpdus.iter()
    }

    /// Bytes covered by the decoded subPDUs
    pub fn decoded_len(&self) -> usize {
        self.decoded_len
    }

    /// Decoding stopped at the subPDU ceiling
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Index of the C-RNTI CE, scanning from the end of the PDU
    pub fn find_crnti_ce(&self) -> Option<usize> {
        self.subpdus
            .iter()
            .rposition(|subpdu| subpdu.lcid() == LcidUlSch::CRNTI)
    }
}

impl<'a> IntoIterator for &'a UlSchPdu {
    type Item = &'a UlSchSubpdu;
    type IntoIter = std::slice::Iter<'a, UlSchSubpdu>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for UlSchPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, subpdu) in self.subpdus.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", subpdu)?;
        }
        Ok(())
    }
}
