//! Receive machine.

use crate::error::{LacpError, Result};
use crate::pdu::Lacpdu;
use crate::port::{Port, RxState};
use crate::timers::TickRate;
use crate::types::{key_is_full_duplex, PortParams, PortState, SmVars};
use tracing::debug;

/// Delivers a received LACPDU to the receive machine.
///
/// A PDU that carries this port's own actor system is rejected before any
/// transition, leaving the port untouched.
pub fn receive_lacpdu(port: &mut Port, pdu: &Lacpdu, rate: TickRate) -> Result<()> {
    if pdu.actor.system == port.actor_system.mac {
        return Err(LacpError::Loopback {
            slot: port.slot,
            system: pdu.actor.system,
        });
    }
    rx_machine(port, Some(pdu), rate);
    Ok(())
}

/// Runs one step of the receive machine, with or without a fresh PDU.
pub fn rx_machine(port: &mut Port, pdu: Option<&Lacpdu>, rate: TickRate) {
    let last = port.rx_state;
    let begin = port.sm_vars.contains(SmVars::BEGIN);

    if begin {
        port.rx_state = RxState::Initialize;
        port.sm_vars.insert(SmVars::CHURNED);
    } else if !port.is_enabled && !port.sm_vars.contains(SmVars::MOVED) {
        port.rx_state = RxState::PortDisabled;
    } else if pdu.is_some()
        && matches!(
            port.rx_state,
            RxState::Expired | RxState::Defaulted | RxState::Current
        )
    {
        if port.rx_state != RxState::Current {
            port.sm_vars.insert(SmVars::CHURNED);
        }
        port.timers.current_while = 0;
        port.rx_state = RxState::Current;
    } else if port.timers.current_while > 0 {
        port.timers.current_while -= 1;
        if port.timers.current_while == 0 {
            match port.rx_state {
                RxState::Expired => port.rx_state = RxState::Defaulted,
                RxState::Current => port.rx_state = RxState::Expired,
                _ => {}
            }
        }
    } else if port.rx_state == RxState::PortDisabled {
        if let Some(next) = port_disabled_exit(port) {
            port.rx_state = next;
        }
    }

    // BEGIN re-runs INITIALIZE even when the port already sits there.
    if begin || port.rx_state != last || pdu.is_some() {
        if port.rx_state != last {
            debug!(slot = port.slot, from = ?last, to = ?port.rx_state, "rx transition");
        }
        enter(port, port.rx_state, pdu, rate);
    }
}

/// Exit conditions of PORT_DISABLED.
fn port_disabled_exit(port: &Port) -> Option<RxState> {
    if port.sm_vars.contains(SmVars::MOVED) {
        Some(RxState::Initialize)
    } else if port.is_enabled && port.lacp_enabled() {
        Some(RxState::Expired)
    } else if port.is_enabled {
        Some(RxState::LacpDisabled)
    } else {
        None
    }
}

fn enter(port: &mut Port, state: RxState, pdu: Option<&Lacpdu>, rate: TickRate) {
    port.rx_state = state;
    match state {
        RxState::Initialize => {
            port.sm_vars
                .set(SmVars::LACP_ENABLED, key_is_full_duplex(port.actor_oper_key));
            port.sm_vars.remove(SmVars::SELECTED | SmVars::MOVED);
            record_default(port);
            port.actor_oper_state.remove(PortState::EXPIRED);
            // INITIALIZE always continues into PORT_DISABLED.
            enter(port, RxState::PortDisabled, None, rate);
        }
        RxState::PortDisabled => {
            port.sm_vars.remove(SmVars::MATCHED);
            if let Some(next) = port_disabled_exit(port) {
                enter(port, next, None, rate);
            }
        }
        RxState::LacpDisabled => {
            port.sm_vars.remove(SmVars::SELECTED);
            record_default(port);
            port.partner_oper.port_state.remove(PortState::AGGREGATION);
            port.sm_vars.insert(SmVars::MATCHED);
            port.actor_oper_state.remove(PortState::EXPIRED);
        }
        RxState::Expired => {
            port.partner_oper.port_state.remove(PortState::SYNCHRONIZATION);
            port.sm_vars.remove(SmVars::MATCHED);
            port.partner_oper.port_state.insert(PortState::LACP_ACTIVITY);
            port.timers.current_while = rate.current_while(true);
            port.actor_oper_state.insert(PortState::EXPIRED);
            port.sm_vars.insert(SmVars::CHURNED);
        }
        RxState::Defaulted => {
            update_default_selected(port);
            record_default(port);
            port.sm_vars.insert(SmVars::MATCHED);
            port.actor_oper_state.remove(PortState::EXPIRED);
        }
        RxState::Current => {
            if let Some(pdu) = pdu {
                update_selected(port, pdu);
                update_ntt(port, pdu);
                record_pdu(port, pdu);
                let short = pdu.actor.port_state.contains(PortState::LACP_TIMEOUT);
                port.timers.current_while = rate.current_while(short);
                port.actor_oper_state.remove(PortState::EXPIRED);
            }
        }
    }
}

/// Falls back to the configured partner defaults.
fn record_default(port: &mut Port) {
    port.partner_oper = port.partner_admin;
    port.actor_oper_state.insert(PortState::DEFAULTED);
}

/// MATCHED when the PDU's view of us equals our actor parameters, or the
/// partner runs individual.
fn choose_matched(port: &mut Port, pdu: &Lacpdu) {
    let view = &pdu.partner;
    let agg_bit = PortState::AGGREGATION;
    let matched = (view.port_number == port.actor_port_number
        && view.port_priority == port.actor_port_priority
        && view.system == port.actor_system.mac
        && view.system_priority == port.actor_system.priority
        && view.key == port.actor_oper_key
        && view.port_state.contains(agg_bit) == port.actor_oper_state.contains(agg_bit))
        || !pdu.actor.port_state.contains(agg_bit);
    port.sm_vars.set(SmVars::MATCHED, matched);
}

/// Merges the PDU's actor fields into the operational partner.
fn record_pdu(port: &mut Port, pdu: &Lacpdu) {
    choose_matched(port, pdu);
    port.partner_oper = pdu.actor;
    port.actor_oper_state.remove(PortState::DEFAULTED);
    let in_sync = port.sm_vars.contains(SmVars::MATCHED)
        && pdu.actor.port_state.contains(PortState::SYNCHRONIZATION);
    port.partner_oper
        .port_state
        .set(PortState::SYNCHRONIZATION, in_sync);
}

/// Identity fields that, when changed, invalidate the current selection.
fn same_partner(a: &PortParams, b: &PortParams) -> bool {
    a.port_number == b.port_number
        && a.port_priority == b.port_priority
        && a.system == b.system
        && a.system_priority == b.system_priority
        && a.key == b.key
        && a.port_state.contains(PortState::AGGREGATION)
            == b.port_state.contains(PortState::AGGREGATION)
}

fn update_selected(port: &mut Port, pdu: &Lacpdu) {
    if !same_partner(&pdu.actor, &port.partner_oper) {
        port.sm_vars.remove(SmVars::SELECTED);
    }
}

fn update_default_selected(port: &mut Port) {
    if !same_partner(&port.partner_admin, &port.partner_oper) {
        port.sm_vars.remove(SmVars::SELECTED);
    }
}

/// Schedules a transmission when the partner's view of us is stale.
fn update_ntt(port: &mut Port, pdu: &Lacpdu) {
    let view = &pdu.partner;
    let tracked = PortState::LACP_ACTIVITY
        | PortState::LACP_TIMEOUT
        | PortState::SYNCHRONIZATION
        | PortState::AGGREGATION;
    if view.port_number != port.actor_port_number
        || view.port_priority != port.actor_port_priority
        || view.system != port.actor_system.mac
        || view.system_priority != port.actor_system.priority
        || view.key != port.actor_oper_key
        || (view.port_state & tracked) != (port.actor_oper_state & tracked)
    {
        port.ntt = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bound_port, partner_pdu};
    use pretty_assertions::assert_eq;

    fn settle_initialize(port: &mut Port) {
        rx_machine(port, None, TickRate::default());
        port.sm_vars.remove(SmVars::BEGIN);
    }

    #[test]
    fn test_begin_on_disabled_port_lands_in_port_disabled() {
        let mut port = bound_port(0, false);
        rx_machine(&mut port, None, TickRate::default());
        assert_eq!(port.rx_state, RxState::PortDisabled);
        assert!(!port.sm_vars.contains(SmVars::MATCHED));
        assert!(port.actor_oper_state.contains(PortState::DEFAULTED));
    }

    #[test]
    fn test_begin_on_enabled_port_lands_in_expired() {
        let mut a = bound_port(0, true);
        let mut b = bound_port(1, true);
        assert_eq!(a.actor_admin_key, b.actor_admin_key);

        rx_machine(&mut a, None, TickRate::default());
        rx_machine(&mut b, None, TickRate::default());
        for port in [&a, &b] {
            assert_eq!(port.rx_state, RxState::Expired);
            assert_eq!(port.timers.current_while, 30);
            assert!(port.actor_oper_state.contains(PortState::EXPIRED));
            assert_eq!(port.partner_oper.port_state, PortState::LACP_ACTIVITY);
        }
    }

    #[test]
    fn test_begin_runs_initialize_on_fresh_port() {
        let mut port = bound_port(0, true);
        assert_eq!(port.rx_state, RxState::Initialize);
        settle_initialize(&mut port);
        assert_eq!(port.rx_state, RxState::Expired);

        for _ in 0..30 {
            rx_machine(&mut port, None, TickRate::default());
        }
        assert_eq!(port.rx_state, RxState::Defaulted);
        assert!(port.actor_oper_state.contains(PortState::DEFAULTED));
        assert!(!port.actor_oper_state.contains(PortState::EXPIRED));
    }

    #[test]
    fn test_half_duplex_port_runs_lacp_disabled() {
        let mut port = bound_port(0, true);
        port.actor_oper_key &= !crate::types::KEY_DUPLEX_MASK;
        rx_machine(&mut port, None, TickRate::default());
        assert_eq!(port.rx_state, RxState::LacpDisabled);
        assert!(!port.lacp_enabled());
        assert!(port.sm_vars.contains(SmVars::MATCHED));
        assert!(!port.partner_oper.port_state.contains(PortState::AGGREGATION));
    }

    #[test]
    fn test_expired_times_out_to_defaulted() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);
        for _ in 0..29 {
            rx_machine(&mut port, None, TickRate::default());
        }
        assert_eq!(port.rx_state, RxState::Expired);
        rx_machine(&mut port, None, TickRate::default());
        assert_eq!(port.rx_state, RxState::Defaulted);
        assert!(port.sm_vars.contains(SmVars::MATCHED));
        assert!(!port.actor_oper_state.contains(PortState::EXPIRED));
        assert_eq!(port.partner_oper, port.partner_admin);
    }

    #[test]
    fn test_pdu_in_expired_goes_current() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);

        let mut pdu = partner_pdu(&port);
        pdu.actor.port_state |= PortState::LACP_TIMEOUT | PortState::SYNCHRONIZATION;
        pdu.partner.port_state |= PortState::LACP_TIMEOUT;
        receive_lacpdu(&mut port, &pdu, TickRate::default()).unwrap();

        assert_eq!(port.rx_state, RxState::Current);
        assert_eq!(port.timers.current_while, 30);
        assert!(port.sm_vars.contains(SmVars::MATCHED));
        assert!(port.sm_vars.contains(SmVars::CHURNED));
        assert!(port.partner_oper.port_state.contains(PortState::SYNCHRONIZATION));
        assert!(!port.actor_oper_state.contains(PortState::DEFAULTED));
        assert!(!port.actor_oper_state.contains(PortState::EXPIRED));
    }

    #[test]
    fn test_unmatched_pdu_withholds_partner_sync() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);

        let mut pdu = partner_pdu(&port);
        pdu.actor.port_state |= PortState::SYNCHRONIZATION;
        pdu.partner.key ^= 0x40;
        receive_lacpdu(&mut port, &pdu, TickRate::default()).unwrap();

        assert!(!port.sm_vars.contains(SmVars::MATCHED));
        assert!(!port.partner_oper.port_state.contains(PortState::SYNCHRONIZATION));
        assert!(port.ntt, "stale partner view schedules a transmission");
    }

    #[test]
    fn test_individual_partner_is_matched() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);

        let mut pdu = partner_pdu(&port);
        pdu.actor.port_state.remove(PortState::AGGREGATION);
        pdu.partner.key ^= 0x40;
        receive_lacpdu(&mut port, &pdu, TickRate::default()).unwrap();
        assert!(port.sm_vars.contains(SmVars::MATCHED));
    }

    #[test]
    fn test_long_timeout_when_partner_tracks_slow() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);
        let pdu = partner_pdu(&port);
        receive_lacpdu(&mut port, &pdu, TickRate::default()).unwrap();
        assert_eq!(port.timers.current_while, 900);
    }

    #[test]
    fn test_receive_timeout_follows_partner_actor_claim() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);

        let mut short = partner_pdu(&port);
        short.actor.port_state |= PortState::LACP_TIMEOUT;
        receive_lacpdu(&mut port, &short, TickRate::default()).unwrap();
        assert_eq!(port.timers.current_while, 30);

        let mut view_only = partner_pdu(&port);
        view_only.partner.port_state |= PortState::LACP_TIMEOUT;
        receive_lacpdu(&mut port, &view_only, TickRate::default()).unwrap();
        assert_eq!(port.timers.current_while, 900);
    }

    #[test]
    fn test_partner_change_clears_selected() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);
        let pdu = partner_pdu(&port);
        receive_lacpdu(&mut port, &pdu, TickRate::default()).unwrap();
        port.sm_vars.insert(SmVars::SELECTED);

        receive_lacpdu(&mut port, &pdu, TickRate::default()).unwrap();
        assert!(port.is_selected(), "same partner keeps selection");

        let mut moved = pdu;
        moved.actor.key += 1;
        receive_lacpdu(&mut port, &moved, TickRate::default()).unwrap();
        assert!(!port.is_selected());
    }

    #[test]
    fn test_current_expires_after_timeout() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);
        let mut pdu = partner_pdu(&port);
        pdu.actor.port_state |= PortState::LACP_TIMEOUT;
        receive_lacpdu(&mut port, &pdu, TickRate::default()).unwrap();
        for _ in 0..30 {
            rx_machine(&mut port, None, TickRate::default());
        }
        assert_eq!(port.rx_state, RxState::Expired);
        assert!(!port.partner_oper.port_state.contains(PortState::SYNCHRONIZATION));
    }

    #[test]
    fn test_looped_pdu_changes_nothing() {
        let mut port = bound_port(0, true);
        settle_initialize(&mut port);
        let before = port.clone();

        let looped = port.lacpdu();
        let err = receive_lacpdu(&mut port, &looped, TickRate::default()).unwrap_err();
        assert!(matches!(err, LacpError::Loopback { slot: 0, .. }));
        assert_eq!(port, before);
    }

    #[test]
    fn test_merge_reproduces_sender_params() {
        let sender = bound_port(3, true);
        let mut receiver = bound_port(0, true);
        receiver.actor_system.mac = sonic_types::MacAddress::new([0x02, 0, 0, 0, 0, 0x77]);
        settle_initialize(&mut receiver);

        let pdu = sender.lacpdu();
        receive_lacpdu(&mut receiver, &pdu, TickRate::default()).unwrap();
        assert_eq!(receiver.partner_oper, sender.actor_params());
    }

    #[test]
    fn test_disabled_port_ignores_pdu() {
        let mut port = bound_port(0, false);
        settle_initialize(&mut port);
        let pdu = partner_pdu(&port);
        receive_lacpdu(&mut port, &pdu, TickRate::default()).unwrap();
        assert_eq!(port.rx_state, RxState::PortDisabled);
        assert_eq!(port.partner_oper, port.partner_admin);
    }
}
