//! Common SONiC types for link-level control protocols.
//!
//! This crate provides type-safe representations of the network primitives
//! shared by the link-aggregation control plane:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`LinkSpeed`]: negotiated physical link speeds
//! - [`Duplex`]: link duplex mode

mod link;
mod mac;

pub use link::{Duplex, LinkSpeed};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid link speed: {0}")]
    InvalidLinkSpeed(String),

    #[error("invalid duplex mode: {0} (expected half or full)")]
    InvalidDuplex(String),
}
