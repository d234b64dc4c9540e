//! The per-device LACP engine.
//!
//! One [`LacpEngine`] owns every port slot of a bonding device. Device-wide
//! tables sit behind one lock and each port behind its own; the device lock
//! is always taken first. PDU receive touches only the port lock, so frames
//! can be dispatched concurrently with a running tick.

use crate::aggregator::{Aggregator, AggregatorInfo, BandwidthTable};
use crate::config::LacpConfig;
use crate::device::{DeviceTables, Link, SelectionPolicy};
use crate::error::{LacpError, Result};
use crate::machines::{
    churn_machine, mux_machine, periodic_machine, receive_lacpdu, rx_machine, tx_machine,
};
use crate::pdu::{build_frame, frame_payload, MarkerKind, SlowProtocolPdu};
use crate::port::{ActorDefaults, LinkInfo, Port, PortStats};
use crate::timers::TickRate;
use crate::types::{LacpRate, PortState, SmVars, SystemId};
use parking_lot::{Mutex, MutexGuard};
use sonic_types::{Duplex, LinkSpeed, MacAddress};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Services the bonding layer provides to the engine.
///
/// Called with engine locks held; implementations must not call back into
/// the engine.
pub trait LacpCallbacks: Send + Sync {
    /// Sends a complete Ethernet frame out of a member port.
    fn transmit(&self, slot: usize, frame: &[u8]) -> std::result::Result<(), String>;
    /// Adds or removes a member from the aggregate's data path.
    fn set_data_path(&self, slot: usize, enabled: bool);
    /// Carrier of the bonding device.
    fn set_carrier(&self, up: bool);
}

/// What a received slow-protocols PDU turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    Lacpdu,
    /// A LACPDU carrying our own system, dropped.
    LoopedLacpdu,
    /// Marker information, answered with a response.
    MarkerInformation,
    MarkerResponse,
    MarkerUnknown(u8),
}

/// LACP engine for one bonding device.
pub struct LacpEngine {
    system: SystemId,
    actor: ActorDefaults,
    rate: TickRate,
    tick_interval: Duration,
    callbacks: Arc<dyn LacpCallbacks>,
    device: Mutex<DeviceTables>,
    ports: Vec<Mutex<Port>>,
}

impl LacpEngine {
    /// Creates an engine with every slot unbound.
    pub fn new(
        config: &LacpConfig,
        system_mac: MacAddress,
        callbacks: Arc<dyn LacpCallbacks>,
    ) -> Result<Self> {
        config.validate()?;
        if system_mac.is_zero() || system_mac.is_multicast() {
            return Err(LacpError::config(
                "system_mac",
                format!("{system_mac} is not a unicast address"),
            ));
        }
        let rate = TickRate::from_interval(config.tick_interval())?;
        let system = SystemId {
            priority: config.system_priority,
            mac: system_mac,
        };
        let policy = SelectionPolicy {
            ad_select: config.ad_select,
            min_links: config.min_links,
            bandwidth: BandwidthTable::new(&config.bandwidth),
        };
        let device = DeviceTables::new(
            config.max_ports,
            policy,
            config.lacp_rate,
            rate.agg_selection(),
        );

        info!(
            system = %system,
            ticks_per_sec = rate.ticks_per_sec(),
            max_ports = config.max_ports,
            ad_select = %config.ad_select,
            "LACP engine initialized"
        );

        Ok(Self {
            system,
            actor: ActorDefaults {
                system,
                port_priority: config.port_priority,
                user_port_key: config.user_port_key,
                lacp_rate: config.lacp_rate,
            },
            rate,
            tick_interval: config.tick_interval(),
            callbacks,
            device: Mutex::new(device),
            ports: (0..config.max_ports)
                .map(|slot| Mutex::new(Port::unbound(slot)))
                .collect(),
        })
    }

    pub fn system(&self) -> SystemId {
        self.system
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.ports.len() {
            return Err(LacpError::SlotOutOfRange {
                slot,
                max_ports: self.ports.len(),
            });
        }
        Ok(())
    }

    /// Locks the device tables, failing if the slot has no bound port.
    fn lock_bound(&self, slot: usize) -> Result<MutexGuard<'_, DeviceTables>> {
        self.check_slot(slot)?;
        let device = self.device.lock();
        if !device.links[slot].bound {
            return Err(LacpError::PortNotBound { slot });
        }
        Ok(device)
    }

    /// Advances every bound port by one tick.
    pub fn tick(&self) {
        let mut device = self.device.lock();
        if !device.any_bound() {
            return;
        }
        let callbacks = self.callbacks.as_ref();

        if device.agg_select_timer > 0 {
            device.agg_select_timer -= 1;
            if device.agg_select_timer == 0 {
                debug!("aggregator selection delay elapsed");
                device.aggregator_selection(callbacks);
            }
        }

        for slot in device.bound_slots() {
            let mut port = self.ports[slot].lock();
            rx_machine(&mut port, None, self.rate);
            periodic_machine(&mut port, self.rate);
            device.port_selection(&mut port, callbacks);
            mux_machine(&mut port, &mut device, self.rate, callbacks);
            tx_machine(&mut port, self.rate, callbacks);
            churn_machine(&mut port, self.rate);
            port.sm_vars.remove(SmVars::BEGIN);
        }
    }

    /// Binds a member link to a slot. The port starts with BEGIN set and its
    /// data path disabled.
    #[instrument(skip(self))]
    pub fn bind_port(&self, slot: usize, link: LinkInfo) -> Result<()> {
        self.check_slot(slot)?;
        let mut device = self.device.lock();
        if device.links[slot].bound {
            return Err(LacpError::PortAlreadyBound { slot });
        }

        let actor = ActorDefaults {
            lacp_rate: device.lacp_rate,
            ..self.actor
        };
        let mut port = self.ports[slot].lock();
        *port = Port::bind(slot, &actor, &link, self.rate);

        let id = device.allocate_aggregator_id();
        device.aggregators[slot] = Aggregator::new(id);
        device.links[slot] = Link {
            bound: true,
            up: link.up,
            speed: link.speed,
            duplex: link.duplex,
            ..Link::default()
        };
        self.callbacks.set_data_path(slot, false);

        info!(
            slot,
            aggregator = id,
            key = port.actor_oper_key,
            speed = %link.speed,
            up = link.up,
            "port bound"
        );
        Ok(())
    }

    /// Unbinds a slot, telling the partner the link is leaving the
    /// aggregate. Remaining members of the slot's aggregator keep their
    /// bundle.
    #[instrument(skip(self))]
    pub fn unbind_port(&self, slot: usize) -> Result<()> {
        let mut device = self.lock_bound(slot)?;
        let callbacks = self.callbacks.as_ref();
        let mut port = self.ports[slot].lock();

        port.actor_oper_state.remove(
            PortState::SYNCHRONIZATION
                | PortState::COLLECTING
                | PortState::DISTRIBUTING
                | PortState::AGGREGATION,
        );
        let frame = build_frame(port.mac, &port.lacpdu().encode());
        if let Err(message) = callbacks.transmit(slot, &frame) {
            let err = LacpError::tx_failed(slot, message);
            warn!(%err, retryable = err.is_retryable(), "leaving LACPDU not sent");
        }

        device.disable_port(slot, callbacks);
        device.vacate_slot(slot, callbacks);
        device.links[slot] = Link::default();
        device.aggregators[slot] = Aggregator::default();
        *port = Port::unbound(slot);
        device.update_carrier(callbacks);

        info!(slot, "port unbound");
        Ok(())
    }

    /// Link carrier change on a member. Restarts the port's machines.
    #[instrument(skip(self))]
    pub fn link_state_changed(&self, slot: usize, up: bool) -> Result<()> {
        let mut device = self.lock_bound(slot)?;
        let callbacks = self.callbacks.as_ref();
        let mut port = self.ports[slot].lock();

        device.links[slot].up = up;
        port.is_enabled = up;
        let link = device.links[slot];
        let mac = port.mac;
        port.update_keys(&LinkInfo {
            mac,
            up,
            speed: link.speed,
            duplex: link.duplex,
        });
        port.sm_vars.insert(SmVars::BEGIN);

        if !up {
            device.disable_port(slot, callbacks);
        }
        device.aggregator_selection(callbacks);

        info!(slot, up, key = port.actor_oper_key, "link state changed");
        Ok(())
    }

    /// Speed or duplex change on a member. Recomputes its keys and restarts
    /// the port's machines.
    #[instrument(skip(self))]
    pub fn speed_duplex_changed(&self, slot: usize, speed: LinkSpeed, duplex: Duplex) -> Result<()> {
        let mut device = self.lock_bound(slot)?;
        let mut port = self.ports[slot].lock();

        device.links[slot].speed = speed;
        device.links[slot].duplex = duplex;
        let mac = port.mac;
        port.update_keys(&LinkInfo {
            mac,
            up: device.links[slot].up,
            speed,
            duplex,
        });
        port.sm_vars.insert(SmVars::BEGIN);

        info!(slot, %speed, ?duplex, key = port.actor_oper_key, "link speed/duplex changed");
        Ok(())
    }

    /// Changes the rate partners are asked to transmit at, for every bound
    /// port and every port bound later.
    #[instrument(skip(self))]
    pub fn set_lacp_rate(&self, rate: LacpRate) {
        let mut device = self.device.lock();
        device.lacp_rate = rate;
        for slot in device.bound_slots() {
            let mut port = self.ports[slot].lock();
            port.set_lacp_rate(rate);
            port.ntt = true;
        }
        info!(%rate, "LACP rate changed");
    }

    /// Dispatches a slow-protocols payload received on a slot.
    ///
    /// Malformed PDUs are counted and returned as errors. Looped LACPDUs are
    /// counted and dropped without touching protocol state.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn receive_pdu(&self, slot: usize, payload: &[u8]) -> Result<PduKind> {
        self.check_slot(slot)?;
        let mut port = self.ports[slot].lock();
        if !port.bound {
            return Err(LacpError::PortNotBound { slot });
        }

        let pdu = match SlowProtocolPdu::decode(payload) {
            Ok(pdu) => pdu,
            Err(err) => {
                port.stats.lacpdu_illegal_rx += 1;
                debug!(%err, "dropping malformed PDU");
                return Err(err);
            }
        };

        match pdu {
            SlowProtocolPdu::Lacp(lacpdu) => {
                port.stats.lacpdu_rx += 1;
                match receive_lacpdu(&mut port, &lacpdu, self.rate) {
                    Ok(()) => Ok(PduKind::Lacpdu),
                    Err(err @ LacpError::Loopback { .. }) => {
                        port.stats.lacpdu_looped_rx += 1;
                        error!(%err, "dropping looped LACPDU");
                        Ok(PduKind::LoopedLacpdu)
                    }
                    Err(err) => Err(err),
                }
            }
            SlowProtocolPdu::Marker(marker) => match marker.kind {
                MarkerKind::Information => {
                    port.stats.marker_rx += 1;
                    let frame = build_frame(port.mac, &marker.to_response().encode());
                    match self.callbacks.transmit(slot, &frame) {
                        Ok(()) => port.stats.marker_resp_tx += 1,
                        Err(message) => {
                            let err = LacpError::tx_failed(slot, message);
                            warn!(%err, "marker response dropped");
                        }
                    }
                    Ok(PduKind::MarkerInformation)
                }
                MarkerKind::Response => {
                    port.stats.marker_resp_rx += 1;
                    Ok(PduKind::MarkerResponse)
                }
                MarkerKind::Unknown(tlv_type) => {
                    port.stats.marker_unknown_rx += 1;
                    debug!(tlv_type, "ignoring unknown marker TLV");
                    Ok(PduKind::MarkerUnknown(tlv_type))
                }
            },
        }
    }

    /// Like [`receive_pdu`](Self::receive_pdu) for a whole Ethernet frame.
    pub fn receive_frame(&self, slot: usize, frame: &[u8]) -> Result<PduKind> {
        match frame_payload(frame) {
            Some(payload) => self.receive_pdu(slot, payload),
            None => Err(LacpError::NotSlowProtocols { slot }),
        }
    }

    /// The active aggregator of the device, if one is selected.
    pub fn active_aggregator_info(&self) -> Option<AggregatorInfo> {
        let device = self.device.lock();
        device
            .active_aggregator()
            .map(|agg| device.aggregators[agg].info())
    }

    /// Member slots currently allowed to carry aggregate traffic.
    pub fn egress_ports(&self) -> Vec<usize> {
        let device = self.device.lock();
        match device.active_aggregator() {
            Some(agg) => device.aggregators[agg]
                .lag_ports
                .iter()
                .copied()
                .filter(|&slot| device.links[slot].data_path)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Egress filter for the hash policy of the bonding layer.
    pub fn may_transmit(&self, slot: usize) -> bool {
        let device = self.device.lock();
        match device.links.get(slot) {
            Some(link) if link.data_path => link
                .aggregator
                .map(|agg| device.aggregators[agg].is_active)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Snapshot of a bound port.
    pub fn port(&self, slot: usize) -> Result<Port> {
        self.check_slot(slot)?;
        let port = self.ports[slot].lock();
        if !port.bound {
            return Err(LacpError::PortNotBound { slot });
        }
        Ok(port.clone())
    }

    pub fn port_stats(&self, slot: usize) -> Result<PortStats> {
        self.port(slot).map(|port| port.stats)
    }

    /// The aggregator a bound port is a member of.
    pub fn aggregator(&self, slot: usize) -> Result<Option<AggregatorInfo>> {
        let device = self.lock_bound(slot)?;
        Ok(device.links[slot]
            .aggregator
            .map(|agg| device.aggregators[agg].info()))
    }

    pub fn link(&self, slot: usize) -> Result<Link> {
        let device = self.lock_bound(slot)?;
        Ok(device.links[slot])
    }

    pub fn carrier(&self) -> bool {
        self.device.lock().carrier
    }
}
