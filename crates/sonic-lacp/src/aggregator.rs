//! Aggregators and the bandwidth table used to rank them.

use crate::config::BandwidthOverride;
use sonic_types::{LinkSpeed, MacAddress};
use std::collections::HashMap;
use std::fmt;

/// A logical bundle of member ports. One exists per port slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Aggregator {
    /// Device-wide identifier, assigned at bind. Zero for an unbound slot.
    pub id: u16,
    pub actor_admin_key: u16,
    pub actor_oper_key: u16,
    pub partner_system: MacAddress,
    pub partner_system_priority: u16,
    pub partner_key: u16,
    /// Member slots, most recently joined first.
    pub lag_ports: Vec<usize>,
    pub is_active: bool,
    pub is_individual: bool,
    /// Every member has READY_N.
    pub ready: bool,
}

impl Aggregator {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn num_ports(&self) -> usize {
        self.lag_ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lag_ports.is_empty()
    }

    /// True once a partner system has been negotiated.
    pub fn has_partner(&self) -> bool {
        !self.partner_system.is_zero()
    }

    /// Returns the aggregator to its unused state, keeping its identifier.
    pub fn clear(&mut self) {
        *self = Self::new(self.id);
    }

    pub fn info(&self) -> AggregatorInfo {
        AggregatorInfo {
            id: self.id,
            num_ports: self.num_ports(),
            actor_key: self.actor_oper_key,
            partner_key: self.partner_key,
            partner_system: self.partner_system,
        }
    }
}

/// Summary of an aggregator for the bonding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorInfo {
    pub id: u16,
    pub num_ports: usize,
    pub actor_key: u16,
    pub partner_key: u16,
    pub partner_system: MacAddress,
}

impl fmt::Display for AggregatorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "aggregator {} ports={} actor_key={:#06x} partner_key={:#06x} partner={}",
            self.id, self.num_ports, self.actor_key, self.partner_key, self.partner_system
        )
    }
}

/// Nominal per-link bandwidth by speed, with configured overrides.
///
/// Aggregate bandwidth is member count times the per-link figure. It is a
/// ranking heuristic, not measured throughput.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandwidthTable {
    overrides: HashMap<LinkSpeed, u32>,
}

impl BandwidthTable {
    pub fn new(overrides: &[BandwidthOverride]) -> Self {
        Self {
            overrides: overrides.iter().map(|o| (o.speed, o.mbps)).collect(),
        }
    }

    pub fn mbps(&self, speed: LinkSpeed) -> u32 {
        self.overrides
            .get(&speed)
            .copied()
            .unwrap_or_else(|| speed.mbps())
    }

    pub fn aggregate(&self, num_ports: usize, speed: LinkSpeed) -> u64 {
        num_ports as u64 * u64::from(self.mbps(speed))
    }
}
