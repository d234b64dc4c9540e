//! IEEE 802.3ad Link Aggregation Control Protocol engine.
//!
//! Bundles the member links of a bonding device into aggregators by
//! negotiating with the partner system over LACPDUs. The bonding layer owns
//! the frames and interfaces; it drives the engine through [`LacpEngine`]
//! and is driven back through [`LacpCallbacks`].
//!
//! ```text
//!   bonding layer ── bind/unbind, link events, frames ──▶ LacpEngine
//!         ▲                                                  │ tick()
//!         └──── transmit, data path, carrier (callbacks) ◀───┘
//! ```

pub mod aggregator;
pub mod config;
pub mod device;
pub mod driver;
pub mod engine;
pub mod error;
pub mod machines;
pub mod pdu;
pub mod port;
mod selection;
pub mod timers;
pub mod types;

pub use aggregator::AggregatorInfo;
pub use config::{LacpConfig, DEFAULT_CONFIG_PATH};
pub use engine::{LacpCallbacks, LacpEngine, PduKind};
pub use error::{LacpError, Result};
pub use port::{LinkInfo, Port, PortStats};
pub use types::{AdSelect, LacpRate, PortState, SystemId};
