//! Error types for the LACP engine.
//!
//! Protocol-level anomalies (transmit failure, loopback, aggregator
//! exhaustion, member-list inconsistency) are constructed and logged by the
//! engine but never returned from the tick: the protocol recovers on its own
//! at the next natural trigger. API misuse, PDU decode failures and
//! configuration errors are returned to the caller.

use sonic_types::MacAddress;
use std::io;
use thiserror::Error;

/// Result type alias for LACP operations.
pub type Result<T> = std::result::Result<T, LacpError>;

/// Errors that can occur in the LACP engine.
#[derive(Debug, Error)]
pub enum LacpError {
    /// The transmit collaborator refused a frame.
    #[error("Transmit failed on slot {slot}: {message}")]
    TxFailed {
        /// Slot the frame was destined for.
        slot: usize,
        /// Reason reported by the collaborator.
        message: String,
    },

    /// A received LACPDU carries our own actor system.
    #[error("Loopback on slot {slot}: received LACPDU from our own system {system}")]
    Loopback {
        /// Receiving slot.
        slot: usize,
        /// The looped system MAC.
        system: MacAddress,
    },

    /// Every aggregator is in use; the port stays unselected.
    #[error("No free aggregator for port on slot {slot}")]
    NoFreeAggregator {
        /// Slot of the selecting port.
        slot: usize,
    },

    /// A port claims an aggregator whose member list does not contain it.
    #[error("Slot {slot} not found in member list of aggregator {aggregator_id}")]
    NotAMember {
        /// Slot being detached.
        slot: usize,
        /// Identifier of the aggregator.
        aggregator_id: u16,
    },

    /// Slot index beyond the device's configured port count.
    #[error("Slot {slot} out of range (device has {max_ports} slots)")]
    SlotOutOfRange { slot: usize, max_ports: usize },

    /// Operation on a slot that has no bound port.
    #[error("Slot {slot} is not bound")]
    PortNotBound { slot: usize },

    /// Bind on a slot that already has a port.
    #[error("Slot {slot} is already bound")]
    PortAlreadyBound { slot: usize },

    /// PDU shorter than its fixed layout.
    #[error("Truncated {what}: need {need} bytes, got {got}")]
    Truncated {
        what: &'static str,
        need: usize,
        got: usize,
    },

    /// Frame with another destination or EtherType.
    #[error("Frame on slot {slot} is not a slow-protocols frame")]
    NotSlowProtocols { slot: usize },

    /// Slow-protocols subtype other than LACP or Marker.
    #[error("Unknown slow-protocols subtype {0:#04x}")]
    UnknownSubtype(u8),

    /// TLV type or length does not match the fixed layout.
    #[error("Malformed {what} TLV: type {tlv_type:#04x}, length {length:#04x}")]
    MalformedTlv {
        what: &'static str,
        tlv_type: u8,
        length: u8,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    Config {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Configuration file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LacpError {
    /// Creates a transmit failure error.
    pub fn tx_failed(slot: usize, message: impl Into<String>) -> Self {
        Self::TxFailed {
            slot,
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a truncated PDU error.
    pub fn truncated(what: &'static str, need: usize, got: usize) -> Self {
        Self::Truncated { what, need, got }
    }

    /// Returns true if this error indicates a transient condition that the
    /// protocol retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LacpError::TxFailed { .. } | LacpError::NoFreeAggregator { .. }
        )
    }
}
