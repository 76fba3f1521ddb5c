//! Common Utilities
//!
//! Provides utility functions used across the MAC implementation

use tracing::trace;

/// Number of subcarriers in one resource block
pub const NOF_SUBCARRIERS_PER_RB: usize = 12;

/// OFDM symbols per slot (normal cyclic prefix)
pub const NOF_OFDM_SYMBOLS_PER_SLOT: usize = 14;

/// Bits per resource element at the highest modulation order (256QAM)
pub const MAX_BITS_PER_RE: usize = 8;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Same as [`bytes_to_hex`] but stops after `max_len` bytes
pub fn bytes_to_hex_truncated(data: &[u8], max_len: usize) -> String {
    if data.len() <= max_len {
        return bytes_to_hex(data);
    }
    format!("{} ... ({} bytes)", bytes_to_hex(&data[..max_len]), data.len())
}

/// Upper bound of a transport block in bytes for a carrier of `nof_rbs` resource
/// blocks transmitted over `nof_ports` antenna ports
pub fn max_transport_block_bytes(nof_rbs: usize, nof_ports: usize) -> usize {
    let nof_re = nof_rbs * NOF_SUBCARRIERS_PER_RB * NOF_OFDM_SYMBOLS_PER_SLOT;
    let bytes = nof_re * MAX_BITS_PER_RE * nof_ports / 8;

    trace!("Max TB size for {} RBs and {} ports: {} bytes", nof_rbs, nof_ports, bytes);

    bytes
}
