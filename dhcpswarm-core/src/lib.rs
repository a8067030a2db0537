//! Core library for dhcpswarm
//!
//! This crate provides the error taxonomy, shared types, immutable run
//! configuration, and network-interface lookup used by the rest of the
//! simulator.

pub mod config;
pub mod error;
pub mod interface;
pub mod types;

// Re-export commonly used types
pub use config::{RetryPolicy, RunMode, SimConfig};
pub use error::{Error, Result};
pub use interface::Interface;
pub use types::{MacAddr, ProtocolVariant};
