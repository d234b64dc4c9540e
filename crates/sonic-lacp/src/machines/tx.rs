//! Transmit machine, rate limited to one LACPDU per transmit window.

use crate::engine::LacpCallbacks;
use crate::error::LacpError;
use crate::pdu::build_frame;
use crate::port::Port;
use crate::timers::TickRate;
use tracing::{debug, warn};

/// Runs one step of the transmit machine.
///
/// A failed transmission leaves NTT set so the next window retries it.
pub fn tx_machine(port: &mut Port, rate: TickRate, callbacks: &dyn LacpCallbacks) {
    if port.timers.tx_window > 0 {
        port.timers.tx_window -= 1;
    }
    if port.timers.tx_window > 0 {
        return;
    }

    if port.ntt && port.lacp_enabled() {
        let frame = build_frame(port.mac, &port.lacpdu().encode());
        match callbacks.transmit(port.slot, &frame) {
            Ok(()) => {
                port.ntt = false;
                port.stats.lacpdu_tx += 1;
                debug!(
                    slot = port.slot,
                    state = ?port.actor_oper_state,
                    "sent LACPDU"
                );
            }
            Err(message) => {
                let err = LacpError::tx_failed(port.slot, message);
                warn!(%err, retryable = err.is_retryable(), "LACPDU not sent");
                port.stats.lacpdu_tx_failed += 1;
            }
        }
    }
    port.timers.tx_window = rate.tx_window();
}
