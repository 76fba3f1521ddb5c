//! MAC Collaborator Interfaces Library
//!
//! This crate defines the messages and notifier traits connecting the MAC
//! uplink core to the PHY, the scheduler, the UE lifecycle owner and the
//! logical channel sinks.

pub mod message_types;
pub mod notifiers;

pub use message_types::*;
pub use notifiers::*;
