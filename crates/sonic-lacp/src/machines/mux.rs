//! Mux machine: attaches a selected port to its aggregator and gates
//! collection and distribution.

use crate::device::DeviceTables;
use crate::engine::LacpCallbacks;
use crate::port::{MuxState, Port};
use crate::timers::TickRate;
use crate::types::{PortState, SmVars};
use tracing::debug;

/// Runs one step of the mux machine.
pub fn mux_machine(
    port: &mut Port,
    device: &mut DeviceTables,
    rate: TickRate,
    callbacks: &dyn LacpCallbacks,
) {
    let slot = port.slot;
    let last = port.mux_state;
    let begin = port.sm_vars.contains(SmVars::BEGIN);

    if begin {
        port.mux_state = MuxState::Detached;
    } else {
        sync_ready(port, device);
        let selected = port.is_selected();
        let standby = port.sm_vars.contains(SmVars::STANDBY);
        let partner_sync = port
            .partner_oper
            .port_state
            .contains(PortState::SYNCHRONIZATION);

        match port.mux_state {
            MuxState::Detached => {
                if selected || standby {
                    port.mux_state = MuxState::Waiting;
                }
            }
            MuxState::Waiting => {
                if !selected {
                    set_ready_n(port, device, false);
                    port.mux_state = MuxState::Detached;
                } else {
                    if port.timers.wait_while > 0 {
                        port.timers.wait_while -= 1;
                    }
                    if port.timers.wait_while == 0
                        && device.agg_select_timer == 0
                        && !port.sm_vars.contains(SmVars::READY_N)
                    {
                        set_ready_n(port, device, true);
                    }
                    sync_ready(port, device);
                    if port.sm_vars.contains(SmVars::READY) && port.timers.wait_while == 0 {
                        port.mux_state = MuxState::Attached;
                    }
                }
            }
            MuxState::Attached => {
                if selected && partner_sync && device.agg_select_timer == 0 {
                    port.mux_state = MuxState::CollectingDistributing;
                } else if !selected || standby {
                    set_ready_n(port, device, false);
                    port.mux_state = MuxState::Detached;
                }
            }
            MuxState::CollectingDistributing => {
                if !selected || standby || !partner_sync {
                    port.mux_state = MuxState::Attached;
                } else if aggregator_active(port, device) && !device.links[slot].data_path {
                    device.enable_port(slot, callbacks);
                }
            }
        }
    }

    if port.mux_state != last {
        debug!(slot, from = ?last, to = ?port.mux_state, "mux transition");
    }
    if begin || port.mux_state != last {
        enter(port, device, rate, callbacks);
    }
}

fn enter(port: &mut Port, device: &mut DeviceTables, rate: TickRate, callbacks: &dyn LacpCallbacks) {
    let slot = port.slot;
    match port.mux_state {
        MuxState::Detached => {
            port.actor_oper_state.remove(
                PortState::SYNCHRONIZATION | PortState::COLLECTING | PortState::DISTRIBUTING,
            );
            disable_if_partnered(port, device, callbacks);
            port.ntt = true;
        }
        MuxState::Waiting => {
            port.timers.wait_while = rate.wait_while();
        }
        MuxState::Attached => {
            port.actor_oper_state.insert(PortState::SYNCHRONIZATION);
            port.actor_oper_state
                .remove(PortState::COLLECTING | PortState::DISTRIBUTING);
            disable_if_partnered(port, device, callbacks);
            port.ntt = true;
        }
        MuxState::CollectingDistributing => {
            port.actor_oper_state
                .insert(PortState::COLLECTING | PortState::DISTRIBUTING);
            if aggregator_active(port, device) {
                device.enable_port(slot, callbacks);
            }
            port.ntt = true;
        }
    }
}

/// Mirrors the aggregator's READY into the port.
fn sync_ready(port: &mut Port, device: &DeviceTables) {
    let ready = device.links[port.slot]
        .aggregator
        .map(|agg| device.aggregators[agg].ready)
        .unwrap_or(false);
    port.sm_vars.set(SmVars::READY, ready);
}

fn set_ready_n(port: &mut Port, device: &mut DeviceTables, ready_n: bool) {
    port.sm_vars.set(SmVars::READY_N, ready_n);
    device.set_ready_n(port.slot, ready_n);
}

fn aggregator_active(port: &Port, device: &DeviceTables) -> bool {
    device.links[port.slot]
        .aggregator
        .map(|agg| device.aggregators[agg].is_active)
        .unwrap_or(false)
}

/// Stops traffic on a port whose aggregator has a negotiated partner. An
/// unpartnered active aggregator keeps its force-enabled members.
fn disable_if_partnered(port: &Port, device: &mut DeviceTables, callbacks: &dyn LacpCallbacks) {
    let partnered = device.links[port.slot]
        .aggregator
        .map(|agg| device.aggregators[agg].has_partner())
        .unwrap_or(false);
    if partnered {
        device.disable_port(port.slot, callbacks);
    }
}
