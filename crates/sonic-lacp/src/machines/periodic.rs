//! Periodic transmission machine.

use crate::port::{PeriodicState, Port};
use crate::timers::TickRate;
use crate::types::{PortState, SmVars};

/// Runs one step of the periodic machine.
pub fn periodic_machine(port: &mut Port, rate: TickRate) {
    let last = port.periodic_state;
    let partner_short = port
        .partner_oper
        .port_state
        .contains(PortState::LACP_TIMEOUT);
    let any_active = (port.actor_oper_state | port.partner_oper.port_state)
        .contains(PortState::LACP_ACTIVITY);

    if port.sm_vars.contains(SmVars::BEGIN)
        || !port.lacp_enabled()
        || !port.is_enabled
        || !any_active
    {
        port.periodic_state = PeriodicState::NoPeriodic;
    } else if port.timers.periodic > 0 {
        port.timers.periodic -= 1;
        if port.timers.periodic == 0 {
            port.periodic_state = PeriodicState::PeriodicTx;
        } else {
            match port.periodic_state {
                PeriodicState::FastPeriodic if !partner_short => {
                    port.periodic_state = PeriodicState::SlowPeriodic;
                }
                PeriodicState::SlowPeriodic if partner_short => {
                    port.timers.periodic = 0;
                    port.periodic_state = PeriodicState::PeriodicTx;
                }
                _ => {}
            }
        }
    } else {
        match port.periodic_state {
            PeriodicState::NoPeriodic => port.periodic_state = PeriodicState::FastPeriodic,
            PeriodicState::PeriodicTx => {
                port.periodic_state = if partner_short {
                    PeriodicState::FastPeriodic
                } else {
                    PeriodicState::SlowPeriodic
                };
            }
            _ => {}
        }
    }

    if port.periodic_state != last {
        match port.periodic_state {
            PeriodicState::NoPeriodic => port.timers.periodic = 0,
            PeriodicState::FastPeriodic => {
                port.timers.periodic = rate.periodic(true).saturating_sub(1);
            }
            PeriodicState::SlowPeriodic => {
                port.timers.periodic = rate.periodic(false).saturating_sub(1);
            }
            PeriodicState::PeriodicTx => port.ntt = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::bound_port;
    use pretty_assertions::assert_eq;

    fn running_port() -> Port {
        let mut port = bound_port(0, true);
        port.sm_vars.remove(SmVars::BEGIN);
        port
    }

    #[test]
    fn test_begin_holds_no_periodic() {
        let mut port = bound_port(0, true);
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::NoPeriodic);
        assert_eq!(port.timers.periodic, 0);
    }

    #[test]
    fn test_starts_fast_then_transmits() {
        let mut port = running_port();
        port.partner_oper.port_state |= PortState::LACP_TIMEOUT;
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::FastPeriodic);
        assert_eq!(port.timers.periodic, 9);

        for _ in 0..8 {
            periodic_machine(&mut port, TickRate::default());
        }
        assert!(!port.ntt);
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::PeriodicTx);
        assert!(port.ntt);

        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::FastPeriodic);
    }

    #[test]
    fn test_long_timeout_partner_moves_to_slow() {
        let mut port = running_port();
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::FastPeriodic);
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::SlowPeriodic);
        assert_eq!(port.timers.periodic, 299);
    }

    #[test]
    fn test_slow_switches_to_tx_when_partner_wants_fast() {
        let mut port = running_port();
        periodic_machine(&mut port, TickRate::default());
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::SlowPeriodic);

        port.partner_oper.port_state |= PortState::LACP_TIMEOUT;
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::PeriodicTx);
        assert!(port.ntt);
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::FastPeriodic);
    }

    #[test]
    fn test_both_passive_stops_periodic() {
        let mut port = running_port();
        periodic_machine(&mut port, TickRate::default());
        port.actor_oper_state.remove(PortState::LACP_ACTIVITY);
        port.partner_oper.port_state.remove(PortState::LACP_ACTIVITY);
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::NoPeriodic);
        assert_eq!(port.timers.periodic, 0);
    }

    #[test]
    fn test_disabled_link_stops_periodic() {
        let mut port = bound_port(0, false);
        port.sm_vars.remove(SmVars::BEGIN);
        periodic_machine(&mut port, TickRate::default());
        assert_eq!(port.periodic_state, PeriodicState::NoPeriodic);
    }
}
