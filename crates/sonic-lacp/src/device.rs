//! Device-wide tables: the link table, the aggregators and the carrier.
//!
//! The Port↔Aggregator relation lives here as slot indices, so aggregator
//! selection can rank every aggregator of the device without touching any
//! per-port guard.

use crate::aggregator::{Aggregator, BandwidthTable};
use crate::engine::LacpCallbacks;
use crate::types::{AdSelect, LacpRate};
use sonic_types::{Duplex, LinkSpeed};
use tracing::{debug, info};

/// Device-table view of one slot's physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    pub bound: bool,
    pub up: bool,
    pub speed: LinkSpeed,
    pub duplex: Duplex,
    /// Index of the aggregator this port is a member of.
    pub aggregator: Option<usize>,
    /// Mirror of the port's READY_N.
    pub ready_n: bool,
    /// Whether the port's data path participates in the aggregate.
    pub data_path: bool,
}

/// Aggregator selection inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub ad_select: AdSelect,
    pub min_links: usize,
    pub bandwidth: BandwidthTable,
}

/// Shared per-device state, guarded by the device lock.
#[derive(Debug)]
pub struct DeviceTables {
    pub links: Vec<Link>,
    pub aggregators: Vec<Aggregator>,
    pub carrier: bool,
    /// Ticks until the initial aggregator selection settles.
    pub agg_select_timer: u32,
    pub lacp_rate: LacpRate,
    pub policy: SelectionPolicy,
    next_aggregator_id: u16,
}

impl DeviceTables {
    pub fn new(
        max_ports: usize,
        policy: SelectionPolicy,
        lacp_rate: LacpRate,
        agg_select_timer: u32,
    ) -> Self {
        Self {
            links: vec![Link::default(); max_ports],
            aggregators: vec![Aggregator::default(); max_ports],
            carrier: false,
            agg_select_timer,
            lacp_rate,
            policy,
            next_aggregator_id: 0,
        }
    }

    /// Next aggregator identifier. Never returns zero.
    pub fn allocate_aggregator_id(&mut self) -> u16 {
        self.next_aggregator_id = self.next_aggregator_id.wrapping_add(1);
        if self.next_aggregator_id == 0 {
            self.next_aggregator_id = 1;
        }
        self.next_aggregator_id
    }

    pub fn any_bound(&self) -> bool {
        self.links.iter().any(|l| l.bound)
    }

    /// Slots with a bound port, in slot order.
    pub fn bound_slots(&self) -> Vec<usize> {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, l)| l.bound)
            .map(|(slot, _)| slot)
            .collect()
    }

    /// The active aggregator among bound slots, if any.
    pub fn active_aggregator(&self) -> Option<usize> {
        self.bound_slots()
            .into_iter()
            .find(|&slot| self.aggregators[slot].is_active)
    }

    /// Members whose link is up.
    pub fn active_ports(&self, agg: usize) -> usize {
        self.aggregators[agg]
            .lag_ports
            .iter()
            .filter(|&&slot| self.links[slot].up)
            .count()
    }

    /// An aggregator is up when its first member's link is up.
    pub fn aggregator_up(&self, agg: usize) -> bool {
        self.aggregators[agg]
            .lag_ports
            .first()
            .map(|&slot| self.links[slot].bound && self.links[slot].up)
            .unwrap_or(false)
    }

    /// Member count times the first member's per-link bandwidth.
    pub fn bandwidth(&self, agg: usize) -> u64 {
        let aggregator = &self.aggregators[agg];
        match aggregator.lag_ports.first() {
            Some(&slot) => self
                .policy
                .bandwidth
                .aggregate(aggregator.num_ports(), self.links[slot].speed),
            None => 0,
        }
    }

    /// Recomputes the aggregator's READY aggregate from its members' READY_N.
    pub fn refresh_ready(&mut self, agg: usize) {
        let ready = self.aggregators[agg]
            .lag_ports
            .iter()
            .all(|&slot| self.links[slot].ready_n);
        self.aggregators[agg].ready = ready;
    }

    pub fn set_ready_n(&mut self, slot: usize, ready_n: bool) {
        self.links[slot].ready_n = ready_n;
        if let Some(agg) = self.links[slot].aggregator {
            self.refresh_ready(agg);
        }
    }

    /// Switches a port's data path, notifying the collaborator on change.
    pub fn set_data_path(&mut self, slot: usize, enabled: bool, callbacks: &dyn LacpCallbacks) {
        if self.links[slot].data_path == enabled {
            return;
        }
        self.links[slot].data_path = enabled;
        debug!(slot, enabled, "data path changed");
        callbacks.set_data_path(slot, enabled);
    }

    /// Enables a port's data path if its link is up.
    pub fn enable_port(&mut self, slot: usize, callbacks: &dyn LacpCallbacks) {
        if self.links[slot].up {
            self.set_data_path(slot, true, callbacks);
        }
    }

    pub fn disable_port(&mut self, slot: usize, callbacks: &dyn LacpCallbacks) {
        self.set_data_path(slot, false, callbacks);
    }

    /// Carrier is up while the active aggregator has at least `min_links`
    /// active ports.
    pub fn update_carrier(&mut self, callbacks: &dyn LacpCallbacks) {
        let carrier = match self.active_aggregator() {
            Some(agg) => self.active_ports(agg) >= self.policy.min_links,
            None => false,
        };
        if carrier != self.carrier {
            self.carrier = carrier;
            info!(carrier, "device carrier changed");
            callbacks.set_carrier(carrier);
        }
    }
}
