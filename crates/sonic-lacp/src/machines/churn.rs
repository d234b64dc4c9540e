//! Actor and partner churn detection.

use crate::port::{ChurnState, Port};
use crate::timers::TickRate;
use crate::types::{PortState, SmVars};
use tracing::warn;

/// Runs one step of both churn machines.
///
/// A receive-machine event (CHURNED) restarts monitoring on both sides.
pub fn churn_machine(port: &mut Port, rate: TickRate) {
    if port.sm_vars.contains(SmVars::CHURNED) {
        port.sm_vars.remove(SmVars::CHURNED);
        port.actor_churn_state = ChurnState::Monitor;
        port.partner_churn_state = ChurnState::Monitor;
        port.timers.actor_churn = rate.churn();
        port.timers.partner_churn = rate.churn();
        return;
    }

    let actor_sync = port.actor_oper_state.contains(PortState::SYNCHRONIZATION);
    if let Some(churned) = step(
        &mut port.actor_churn_state,
        &mut port.timers.actor_churn,
        actor_sync,
    ) {
        port.sm_vars.set(SmVars::ACTOR_CHURN, churned);
        if churned {
            port.stats.churn_actor_count += 1;
            warn!(slot = port.slot, "actor churn detected");
        }
    }

    let partner_sync = port
        .partner_oper
        .port_state
        .contains(PortState::SYNCHRONIZATION);
    if let Some(churned) = step(
        &mut port.partner_churn_state,
        &mut port.timers.partner_churn,
        partner_sync,
    ) {
        port.sm_vars.set(SmVars::PARTNER_CHURN, churned);
        if churned {
            port.stats.churn_partner_count += 1;
            warn!(slot = port.slot, "partner churn detected");
        }
    }
}

/// Advances one side. Returns the churn verdict when the monitor period
/// ends.
fn step(state: &mut ChurnState, timer: &mut u32, in_sync: bool) -> Option<bool> {
    if *timer == 0 {
        return None;
    }
    *timer -= 1;
    if *timer > 0 || *state != ChurnState::Monitor {
        return None;
    }
    if in_sync {
        *state = ChurnState::NoChurn;
        Some(false)
    } else {
        *state = ChurnState::Churn;
        Some(true)
    }
}
