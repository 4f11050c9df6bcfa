//! stash-core — wire format, protocol constants, and configuration.
//! All other Stash crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{ControlFrame, ControlMessage, PduType, WireError};
