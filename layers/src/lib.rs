//! Protocol Stack Layers Library
//!
//! This crate implements the uplink core of the 5G NR MAC layer according to
//! 3GPP Release 16.

pub mod mac;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("DL buffer pool: {0}")]
    DlBufferPool(#[from] mac::DlBufferPoolError),

    #[error("Unknown cell index {0}")]
    UnknownCell(u8),
}
