//! Protocol primitives: system identity, state bitfields, port parameters,
//! port keys and policy enums.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use sonic_types::{Duplex, LinkSpeed, MacAddress};
use std::fmt;

/// Identity of one aggregation system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId {
    pub priority: u16,
    pub mac: MacAddress,
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x},{}", self.priority, self.mac)
    }
}

bitflags! {
    /// Actor/partner port-state octet as carried in LACPDUs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PortState: u8 {
        const LACP_ACTIVITY   = 0x01;
        const LACP_TIMEOUT    = 0x02;
        const AGGREGATION     = 0x04;
        const SYNCHRONIZATION = 0x08;
        const COLLECTING      = 0x10;
        const DISTRIBUTING    = 0x20;
        const DEFAULTED       = 0x40;
        const EXPIRED         = 0x80;
    }
}

bitflags! {
    /// Per-port state-machine variables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SmVars: u16 {
        const BEGIN         = 0x0001;
        const LACP_ENABLED  = 0x0002;
        const ACTOR_CHURN   = 0x0004;
        const PARTNER_CHURN = 0x0008;
        const READY         = 0x0010;
        const READY_N       = 0x0020;
        const MATCHED       = 0x0040;
        const STANDBY       = 0x0080;
        const SELECTED      = 0x0100;
        const MOVED         = 0x0200;
        const CHURNED       = 0x0400;
    }
}

/// One side's protocol parameters for a port.
///
/// Used for the configured partner defaults, the live negotiated partner
/// and the actor/partner TLVs of a LACPDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortParams {
    pub system: MacAddress,
    pub system_priority: u16,
    pub key: u16,
    pub port_number: u16,
    pub port_priority: u16,
    pub port_state: PortState,
}

impl PortParams {
    /// Partner defaults used until a LACPDU is received.
    pub const ADMIN_DEFAULT: PortParams = PortParams {
        system: MacAddress::ZERO,
        system_priority: 0xffff,
        key: 1,
        port_number: 1,
        port_priority: 0xff,
        port_state: PortState::LACP_ACTIVITY,
    };

    /// Returns true if these parameters name a real partner system.
    pub fn has_system(&self) -> bool {
        !self.system.is_zero()
    }
}

impl Default for PortParams {
    fn default() -> Self {
        Self::ADMIN_DEFAULT
    }
}

/// Key bit carrying the full-duplex flag.
pub const KEY_DUPLEX_MASK: u16 = 0x0001;
/// Key bits carrying the link speed index.
pub const KEY_SPEED_MASK: u16 = 0x003e;
/// Key bits carrying the user-configured key.
pub const KEY_USER_MASK: u16 = 0xffc0;
/// Largest user key that fits the key layout.
pub const MAX_USER_PORT_KEY: u16 = KEY_USER_MASK >> 6;

/// Builds an actor port key from the user key and the link's speed/duplex.
pub fn port_key(user_key: u16, speed: LinkSpeed, duplex: Duplex) -> u16 {
    let mut key = (user_key << 6) & KEY_USER_MASK;
    key |= (u16::from(speed.index()) << 1) & KEY_SPEED_MASK;
    if duplex.is_full() {
        key |= KEY_DUPLEX_MASK;
    }
    key
}

/// Speed index encoded in a port key.
pub fn key_speed_index(key: u16) -> u8 {
    ((key & KEY_SPEED_MASK) >> 1) as u8
}

/// Returns true if the key's duplex bit is set.
pub fn key_is_full_duplex(key: u16) -> bool {
    key & KEY_DUPLEX_MASK != 0
}

/// Rate at which the actor asks its partner to transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LacpRate {
    /// Partner transmits every 30 s, long timeout.
    #[default]
    Slow,
    /// Partner transmits every second, short timeout.
    Fast,
}

impl fmt::Display for LacpRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LacpRate::Slow => write!(f, "slow"),
            LacpRate::Fast => write!(f, "fast"),
        }
    }
}

/// Aggregator selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdSelect {
    /// Highest bandwidth, but keep the active aggregator while it is usable.
    #[default]
    Stable,
    /// Highest aggregate bandwidth.
    Bandwidth,
    /// Most active ports, bandwidth as tie-break.
    Count,
}

impl fmt::Display for AdSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdSelect::Stable => write!(f, "stable"),
            AdSelect::Bandwidth => write!(f, "bandwidth"),
            AdSelect::Count => write!(f, "count"),
        }
    }
}
