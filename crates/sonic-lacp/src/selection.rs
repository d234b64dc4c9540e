//! Port-to-aggregator assignment and active aggregator selection.

use crate::aggregator::Aggregator;
use crate::device::DeviceTables;
use crate::engine::LacpCallbacks;
use crate::error::LacpError;
use crate::port::{MuxState, Port};
use crate::types::{key_is_full_duplex, AdSelect, PortState, SmVars};
use std::cmp::Ordering;
use tracing::{debug, error, info, warn};

impl DeviceTables {
    /// Assigns an unselected port to an aggregator.
    ///
    /// A de-selected port keeps its old membership until its Mux machine has
    /// walked back to DETACHED.
    pub fn port_selection(&mut self, port: &mut Port, callbacks: &dyn LacpCallbacks) {
        if port.is_selected() || port.mux_state != MuxState::Detached {
            return;
        }
        let slot = port.slot;

        if self.links[slot].aggregator.is_some() {
            self.detach_port(slot, callbacks);
        }

        let mut free = None;
        let mut found = None;
        for agg in self.bound_slots() {
            let aggregator = &self.aggregators[agg];
            if aggregator.is_empty() {
                if free.is_none() {
                    free = Some(agg);
                }
                continue;
            }
            let partner = &port.partner_oper;
            if aggregator.actor_oper_key == port.actor_oper_key
                && aggregator.partner_system == partner.system
                && aggregator.partner_system_priority == partner.system_priority
                && aggregator.partner_key == partner.key
                && partner.has_system()
                && !aggregator.is_individual
            {
                found = Some(agg);
                break;
            }
        }

        let agg = match (found, free) {
            (Some(agg), _) => agg,
            (None, Some(agg)) => {
                let aggregator = &mut self.aggregators[agg];
                aggregator.is_individual = !key_is_full_duplex(port.actor_oper_key);
                aggregator.actor_admin_key = port.actor_admin_key;
                aggregator.actor_oper_key = port.actor_oper_key;
                aggregator.partner_system = port.partner_oper.system;
                aggregator.partner_system_priority = port.partner_oper.system_priority;
                aggregator.partner_key = port.partner_oper.key;
                agg
            }
            (None, None) => {
                let err = LacpError::NoFreeAggregator { slot };
                error!(%err, "port stays unselected");
                return;
            }
        };

        self.aggregators[agg].lag_ports.insert(0, slot);
        self.links[slot].aggregator = Some(agg);
        port.sm_vars.insert(SmVars::SELECTED);
        debug!(
            slot,
            aggregator = self.aggregators[agg].id,
            "port selected aggregator"
        );

        self.refresh_ready(agg);
        self.aggregator_selection(callbacks);
        if !self.aggregators[agg].is_active {
            port.actor_oper_state.remove(PortState::SYNCHRONIZATION);
        }
    }

    /// Removes a port from the aggregator it references, clearing the
    /// aggregator when it becomes empty. The port stops carrying traffic.
    pub fn detach_port(&mut self, slot: usize, callbacks: &dyn LacpCallbacks) {
        let Some(agg) = self.links[slot].aggregator.take() else {
            return;
        };
        self.disable_port(slot, callbacks);
        let aggregator = &mut self.aggregators[agg];
        match aggregator.lag_ports.iter().position(|&p| p == slot) {
            Some(pos) => {
                aggregator.lag_ports.remove(pos);
                if aggregator.is_empty() {
                    aggregator.clear();
                }
            }
            None => {
                let err = LacpError::NotAMember {
                    slot,
                    aggregator_id: aggregator.id,
                };
                warn!(%err, "detaching anyway");
            }
        }
        self.refresh_ready(agg);
    }

    /// Releases an unbinding slot's aggregator and membership.
    ///
    /// Other members of the slot's own aggregator move, identity and all, to
    /// an aggregator that is free or only holds this slot, so the bundle
    /// survives under a different index.
    pub fn vacate_slot(&mut self, slot: usize, callbacks: &dyn LacpCallbacks) {
        let own = &self.aggregators[slot];
        if !own.is_empty() && own.lag_ports != [slot] {
            let target = self.bound_slots().into_iter().find(|&agg| {
                agg != slot
                    && (self.aggregators[agg].is_empty() || self.aggregators[agg].lag_ports == [slot])
            });
            match target {
                Some(target) => {
                    let select_new = self.aggregators[target].lag_ports == [slot]
                        && self.aggregators[target].is_active;
                    let id = self.aggregators[target].id;
                    self.aggregators[target] = Aggregator {
                        id,
                        ..self.aggregators[slot].clone()
                    };
                    for member in self.aggregators[target].lag_ports.clone() {
                        self.links[member].aggregator = Some(target);
                    }
                    info!(
                        from = self.aggregators[slot].id,
                        to = id,
                        "moved aggregator members off unbinding slot"
                    );
                    self.aggregators[slot].clear();
                    if select_new {
                        self.aggregator_selection(callbacks);
                    }
                }
                None => {
                    warn!(
                        slot,
                        aggregator = self.aggregators[slot].id,
                        "no free aggregator to move members to"
                    );
                }
            }
        } else if own.lag_ports == [slot] {
            let was_active = own.is_active;
            self.aggregators[slot].clear();
            if was_active {
                self.aggregator_selection(callbacks);
            }
        }

        let listed = self
            .bound_slots()
            .into_iter()
            .find(|&agg| self.aggregators[agg].lag_ports.contains(&slot));
        if let Some(agg) = listed {
            self.aggregators[agg].lag_ports.retain(|&p| p != slot);
            self.refresh_ready(agg);
            if self.active_ports(agg) == 0 {
                let was_active = self.aggregators[agg].is_active;
                if self.aggregators[agg].is_empty() {
                    self.aggregators[agg].clear();
                }
                if was_active {
                    self.aggregator_selection(callbacks);
                }
            }
        }
        self.links[slot].aggregator = None;
    }

    /// Chooses the single active aggregator of the device and recomputes
    /// the carrier.
    pub fn aggregator_selection(&mut self, callbacks: &dyn LacpCallbacks) {
        let active = self.active_aggregator();
        let mut best = active.filter(|&agg| self.aggregator_up(agg));

        for agg in self.bound_slots() {
            self.aggregators[agg].is_active = false;
            if self.active_ports(agg) > 0 && self.aggregator_up(agg) {
                best = Some(match best {
                    Some(b) => self.better_of(b, agg),
                    None => agg,
                });
            }
        }

        if let (Some(b), Some(a)) = (best, active) {
            if self.policy.ad_select == AdSelect::Stable && self.keep_stable(a, b) {
                best = None;
                self.aggregators[a].is_active = true;
            }
        }

        if best.is_some() && best == active {
            best = None;
            if let Some(a) = active {
                self.aggregators[a].is_active = true;
            }
        }

        if let Some(b) = best {
            self.aggregators[b].is_active = true;
            let winner = &self.aggregators[b];
            info!(
                aggregator = winner.id,
                ports = winner.num_ports(),
                partner = %winner.partner_system,
                "new active aggregator"
            );
            if winner.is_individual {
                warn!(
                    aggregator = winner.id,
                    "active aggregator is individual, no usable partner"
                );
            }
        }

        // A deactivated aggregator stops carrying traffic.
        if let Some(a) = active.filter(|&a| !self.aggregators[a].is_active) {
            for slot in self.aggregators[a].lag_ports.clone() {
                self.disable_port(slot, callbacks);
            }
        }

        if let Some(a) = self.active_aggregator() {
            if !self.aggregators[a].has_partner() {
                for slot in self.aggregators[a].lag_ports.clone() {
                    self.enable_port(slot, callbacks);
                }
            }
        }

        self.update_carrier(callbacks);
    }

    /// Under the stable policy the current active aggregator is kept while
    /// it is still up with active ports and partner presence does not
    /// improve, unless the candidate gains a non-zero key.
    fn keep_stable(&self, active: usize, best: usize) -> bool {
        let a = &self.aggregators[active];
        let b = &self.aggregators[best];
        let usable = self.aggregator_up(active) && self.active_ports(active) > 0;
        let partner_ok = a.has_partner() || !b.has_partner();
        usable && partner_ok && !(a.actor_oper_key == 0 && b.actor_oper_key != 0)
    }

    /// Total order used to fold candidates: aggregatable beats individual,
    /// partnered beats unpartnered, then the configured policy decides.
    /// Ties keep the current best.
    fn better_of(&self, best: usize, curr: usize) -> usize {
        let b = &self.aggregators[best];
        let c = &self.aggregators[curr];

        match (c.is_individual, b.is_individual) {
            (false, true) => return curr,
            (true, false) => return best,
            _ => {}
        }
        match (c.has_partner(), b.has_partner()) {
            (true, false) => return curr,
            (false, true) => return best,
            _ => {}
        }

        if self.policy.ad_select == AdSelect::Count {
            match self.active_ports(curr).cmp(&self.active_ports(best)) {
                Ordering::Greater => return curr,
                Ordering::Less => return best,
                Ordering::Equal => {}
            }
        }

        if self.bandwidth(curr) > self.bandwidth(best) {
            curr
        } else {
            best
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::BandwidthTable;
    use crate::device::{Link, SelectionPolicy};
    use crate::port::{ActorDefaults, LinkInfo};
    use crate::testutil::RecordingCallbacks;
    use crate::timers::TickRate;
    use crate::types::{LacpRate, PortParams, SystemId};
    use pretty_assertions::assert_eq;
    use sonic_types::{Duplex, LinkSpeed, MacAddress};

    const PARTNER: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 0x02]);

    fn tables(max_ports: usize, ad_select: AdSelect) -> DeviceTables {
        DeviceTables::new(
            max_ports,
            SelectionPolicy {
                ad_select,
                min_links: 0,
                bandwidth: BandwidthTable::default(),
            },
            LacpRate::Slow,
            0,
        )
    }

    fn link_info(speed: LinkSpeed) -> LinkInfo {
        LinkInfo {
            mac: MacAddress::new([0x02, 0, 0, 0, 1, 0]),
            up: true,
            speed,
            duplex: Duplex::Full,
        }
    }

    fn bind(t: &mut DeviceTables, slot: usize, speed: LinkSpeed) -> Port {
        let info = link_info(speed);
        t.links[slot] = Link {
            bound: true,
            up: true,
            speed,
            duplex: Duplex::Full,
            ..Link::default()
        };
        let id = t.allocate_aggregator_id();
        t.aggregators[slot] = Aggregator::new(id);
        let actor = ActorDefaults {
            system: SystemId {
                priority: 0xffff,
                mac: MacAddress::new([0x02, 0, 0, 0, 0, 0x01]),
            },
            port_priority: 0xff,
            user_port_key: 0,
            lacp_rate: LacpRate::Slow,
        };
        Port::bind(slot, &actor, &info, TickRate::default())
    }

    fn with_partner(port: &mut Port, key: u16) {
        port.partner_oper = PortParams {
            system: PARTNER,
            system_priority: 0x8000,
            key,
            ..PortParams::ADMIN_DEFAULT
        };
    }

    fn active_count(t: &DeviceTables) -> usize {
        t.aggregators.iter().filter(|a| a.is_active).count()
    }

    #[test]
    fn test_ports_with_same_partner_share_aggregator() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        let mut p1 = bind(&mut t, 1, LinkSpeed::Gb10);
        with_partner(&mut p0, 9);
        with_partner(&mut p1, 9);

        t.port_selection(&mut p0, &cb);
        t.port_selection(&mut p1, &cb);

        assert!(p0.is_selected() && p1.is_selected());
        assert_eq!(t.links[0].aggregator, Some(0));
        assert_eq!(t.links[1].aggregator, Some(0));
        assert_eq!(t.aggregators[0].lag_ports, vec![1, 0]);
        assert!(t.aggregators[0].is_active);
        assert!(t.aggregators[1].is_empty());
    }

    #[test]
    fn test_unpartnered_ports_get_own_aggregators() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        let mut p1 = bind(&mut t, 1, LinkSpeed::Gb10);

        t.port_selection(&mut p0, &cb);
        t.port_selection(&mut p1, &cb);

        assert_eq!(t.links[0].aggregator, Some(0));
        assert_eq!(t.links[1].aggregator, Some(1));
        assert_eq!(active_count(&t), 1);
    }

    #[test]
    fn test_half_duplex_aggregator_is_individual() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(2, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb1);
        p0.update_keys(&LinkInfo {
            duplex: Duplex::Half,
            ..link_info(LinkSpeed::Gb1)
        });
        t.port_selection(&mut p0, &cb);
        assert!(t.aggregators[0].is_individual);
    }

    #[test]
    fn test_no_free_aggregator_leaves_port_unselected() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(2, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        let _p1 = bind(&mut t, 1, LinkSpeed::Gb10);
        // Occupy both aggregators with members p0 cannot join.
        t.aggregators[0].lag_ports = vec![1];
        t.aggregators[1].lag_ports = vec![1];

        t.port_selection(&mut p0, &cb);
        assert!(!p0.is_selected());
        assert_eq!(t.links[0].aggregator, None);
    }

    #[test]
    fn test_selection_waits_for_detached_mux() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(2, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        p0.mux_state = MuxState::Attached;
        t.port_selection(&mut p0, &cb);
        assert!(!p0.is_selected());
        assert_eq!(t.links[0].aggregator, None);
    }

    #[test]
    fn test_reselection_detaches_and_clears_empty_aggregator() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(2, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        t.port_selection(&mut p0, &cb);
        assert_eq!(t.links[0].aggregator, Some(0));

        // Partner appears: the port re-selects with the new partner values.
        p0.sm_vars.remove(SmVars::SELECTED);
        with_partner(&mut p0, 5);
        t.port_selection(&mut p0, &cb);
        let agg = t.links[0].aggregator.unwrap();
        assert_eq!(t.aggregators[agg].partner_system, PARTNER);
        assert_eq!(t.aggregators[agg].lag_ports, vec![0]);
    }

    #[test]
    fn test_detach_missing_member_is_tolerated() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(2, AdSelect::Stable);
        let _p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        t.links[0].aggregator = Some(1);
        t.detach_port(0, &cb);
        assert_eq!(t.links[0].aggregator, None);
    }

    /// Two candidates: two active ports without partner versus one port with
    /// a negotiated partner. The partnered one wins under BANDWIDTH.
    #[test]
    fn test_partnered_aggregator_beats_larger_unpartnered() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Bandwidth);
        for slot in 0..3 {
            let _ = bind(&mut t, slot, LinkSpeed::Gb10);
        }
        t.aggregators[0].lag_ports = vec![0, 1];
        t.aggregators[0].actor_oper_key = 0x0f;
        t.aggregators[2].lag_ports = vec![2];
        t.aggregators[2].actor_oper_key = 0x0f;
        t.aggregators[2].partner_system = PARTNER;
        for slot in 0..3 {
            t.links[slot].aggregator = Some(if slot == 2 { 2 } else { 0 });
        }

        t.aggregator_selection(&cb);
        assert!(t.aggregators[2].is_active);
        assert!(!t.aggregators[0].is_active);
        assert_eq!(active_count(&t), 1);
    }

    #[test]
    fn test_count_policy_prefers_more_ports() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Count);
        let _ = bind(&mut t, 0, LinkSpeed::Gb100);
        let _ = bind(&mut t, 1, LinkSpeed::Gb10);
        let _ = bind(&mut t, 2, LinkSpeed::Gb10);
        t.aggregators[0].lag_ports = vec![0];
        t.aggregators[0].partner_system = PARTNER;
        t.aggregators[1].lag_ports = vec![1, 2];
        t.aggregators[1].partner_system = PARTNER;

        t.aggregator_selection(&cb);
        assert!(t.aggregators[1].is_active);

        let mut t2 = tables(4, AdSelect::Bandwidth);
        let _ = bind(&mut t2, 0, LinkSpeed::Gb100);
        let _ = bind(&mut t2, 1, LinkSpeed::Gb10);
        let _ = bind(&mut t2, 2, LinkSpeed::Gb10);
        t2.aggregators[0].lag_ports = vec![0];
        t2.aggregators[0].partner_system = PARTNER;
        t2.aggregators[1].lag_ports = vec![1, 2];
        t2.aggregators[1].partner_system = PARTNER;
        t2.aggregator_selection(&cb);
        assert!(t2.aggregators[0].is_active);
    }

    #[test]
    fn test_stable_keeps_active_aggregator() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Stable);
        let _ = bind(&mut t, 0, LinkSpeed::Gb10);
        let _ = bind(&mut t, 1, LinkSpeed::Gb100);
        t.aggregators[0].lag_ports = vec![0];
        t.aggregators[0].partner_system = PARTNER;
        t.aggregators[0].actor_oper_key = 0x0f;
        t.aggregators[0].is_active = true;
        t.aggregators[1].lag_ports = vec![1];
        t.aggregators[1].partner_system = PARTNER;
        t.aggregators[1].actor_oper_key = 0x1d;

        t.aggregator_selection(&cb);
        assert!(t.aggregators[0].is_active);
        assert!(!t.aggregators[1].is_active);

        // Bandwidth policy switches to the faster bundle.
        t.policy.ad_select = AdSelect::Bandwidth;
        t.links[0].data_path = true;
        t.aggregator_selection(&cb);
        assert!(t.aggregators[1].is_active);
        assert!(!t.links[0].data_path, "old active members are disabled");
    }

    #[test]
    fn test_stable_yields_to_keyed_candidate() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Stable);
        let _ = bind(&mut t, 0, LinkSpeed::Gb10);
        let _ = bind(&mut t, 1, LinkSpeed::Gb10);
        t.aggregators[0].lag_ports = vec![0];
        t.aggregators[0].is_active = true;
        t.aggregators[1].lag_ports = vec![1];
        t.aggregators[1].actor_oper_key = 0x0f;
        // The faster candidate wins the fold, and stability yields because
        // only the candidate carries a key.
        t.links[0].speed = LinkSpeed::Gb1;

        t.aggregator_selection(&cb);
        assert!(t.aggregators[1].is_active);
    }

    #[test]
    fn test_stable_drops_active_aggregator_whose_first_member_is_down() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Stable);
        for slot in 0..3 {
            let _ = bind(&mut t, slot, LinkSpeed::Gb10);
        }
        t.aggregators[0].lag_ports = vec![1, 0];
        t.aggregators[0].partner_system = PARTNER;
        t.aggregators[0].actor_oper_key = 0x0f;
        t.aggregators[0].is_active = true;
        t.aggregators[2].lag_ports = vec![2];
        t.aggregators[2].partner_system = PARTNER;
        t.aggregators[2].actor_oper_key = 0x0f;
        t.links[1].up = false;

        t.aggregator_selection(&cb);
        assert!(!t.aggregators[0].is_active);
        assert!(t.aggregators[2].is_active);
        assert_eq!(active_count(&t), 1);
    }

    #[test]
    fn test_unpartnered_active_aggregator_is_force_enabled() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(2, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        t.port_selection(&mut p0, &cb);
        assert!(t.aggregators[0].is_active);
        assert!(t.links[0].data_path);
        assert!(t.carrier);
    }

    #[test]
    fn test_down_aggregators_are_not_candidates() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(2, AdSelect::Stable);
        let _ = bind(&mut t, 0, LinkSpeed::Gb10);
        t.aggregators[0].lag_ports = vec![0];
        t.links[0].up = false;
        t.aggregator_selection(&cb);
        assert_eq!(active_count(&t), 0);
        assert!(!t.carrier);
    }

    #[test]
    fn test_losing_active_aggregator_disables_members() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(2, AdSelect::Stable);
        let _ = bind(&mut t, 0, LinkSpeed::Gb10);
        t.aggregators[0].lag_ports = vec![0];
        t.aggregators[0].is_active = true;
        t.links[0].data_path = true;
        t.links[0].up = false;

        t.aggregator_selection(&cb);
        assert_eq!(active_count(&t), 0);
        assert!(!t.links[0].data_path);
        assert_eq!(cb.data_path_events(), vec![(0, false)]);
    }

    #[test]
    fn test_vacate_moves_members_to_free_aggregator() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        let mut p1 = bind(&mut t, 1, LinkSpeed::Gb10);
        with_partner(&mut p0, 9);
        with_partner(&mut p1, 9);
        t.port_selection(&mut p0, &cb);
        t.port_selection(&mut p1, &cb);
        let id = t.aggregators[0].id;
        assert!(t.aggregators[0].is_active);

        t.vacate_slot(0, &cb);
        assert_eq!(t.aggregators[1].lag_ports, vec![1]);
        assert_eq!(t.aggregators[1].partner_system, PARTNER);
        assert!(t.aggregators[1].is_active);
        assert_ne!(t.aggregators[1].id, id, "target keeps its own identifier");
        assert_eq!(t.links[1].aggregator, Some(1));
        assert_eq!(t.links[0].aggregator, None);
        assert_eq!(t.aggregators[0], Aggregator::new(id));
    }

    #[test]
    fn test_vacate_sole_member_reselects() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        let mut p1 = bind(&mut t, 1, LinkSpeed::Gb10);
        with_partner(&mut p1, 9);
        t.port_selection(&mut p0, &cb);
        t.port_selection(&mut p1, &cb);
        // Partnered aggregator 1 wins over the unpartnered one.
        assert!(t.aggregators[1].is_active);

        t.vacate_slot(1, &cb);
        t.links[1].bound = false;
        assert!(t.aggregators[1].is_empty());
        assert_eq!(t.links[1].aggregator, None);
        assert!(t.aggregators[0].is_active);
        assert_eq!(active_count(&t), 1);
    }

    #[test]
    fn test_vacate_member_of_other_aggregator() {
        let cb = RecordingCallbacks::default();
        let mut t = tables(4, AdSelect::Stable);
        let mut p0 = bind(&mut t, 0, LinkSpeed::Gb10);
        let mut p1 = bind(&mut t, 1, LinkSpeed::Gb10);
        with_partner(&mut p0, 9);
        with_partner(&mut p1, 9);
        t.port_selection(&mut p0, &cb);
        t.port_selection(&mut p1, &cb);

        t.vacate_slot(1, &cb);
        assert_eq!(t.aggregators[0].lag_ports, vec![0]);
        assert!(t.aggregators[0].is_active);
        assert_eq!(t.links[0].aggregator, Some(0));
    }
}
