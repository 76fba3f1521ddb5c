//! Common Utilities and Types Library
//!
//! This crate provides shared types, execution contexts and utilities used
//! across the gNB MAC implementation.

pub mod executor;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use executor::*;
pub use types::*;
pub use utils::*;
