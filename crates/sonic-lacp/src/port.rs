//! Per-port protocol state.

use crate::pdu::Lacpdu;
use crate::timers::TickRate;
use crate::types::{
    key_is_full_duplex, port_key, LacpRate, PortParams, PortState, SmVars, SystemId,
    KEY_USER_MASK,
};
use sonic_types::{Duplex, LinkSpeed, MacAddress};

/// Receive machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RxState {
    #[default]
    Initialize,
    PortDisabled,
    LacpDisabled,
    Expired,
    Defaulted,
    Current,
}

/// Periodic transmission machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodicState {
    #[default]
    NoPeriodic,
    FastPeriodic,
    SlowPeriodic,
    PeriodicTx,
}

/// Mux machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuxState {
    #[default]
    Detached,
    Waiting,
    Attached,
    CollectingDistributing,
}

/// Actor and partner churn machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChurnState {
    #[default]
    Monitor,
    NoChurn,
    Churn,
}

/// Countdown timers, in ticks. Zero means stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortTimers {
    pub current_while: u32,
    pub periodic: u32,
    pub wait_while: u32,
    pub tx_window: u32,
    pub actor_churn: u32,
    pub partner_churn: u32,
}

/// Per-port PDU counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStats {
    pub lacpdu_rx: u64,
    pub lacpdu_tx: u64,
    pub lacpdu_tx_failed: u64,
    pub lacpdu_illegal_rx: u64,
    pub lacpdu_looped_rx: u64,
    pub marker_rx: u64,
    pub marker_resp_rx: u64,
    pub marker_resp_tx: u64,
    pub marker_unknown_rx: u64,
    pub churn_actor_count: u64,
    pub churn_partner_count: u64,
}

/// Physical link attributes reported by the bonding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    /// MAC of the member interface, used as frame source.
    pub mac: MacAddress,
    pub up: bool,
    pub speed: LinkSpeed,
    pub duplex: Duplex,
}

/// Actor parameters shared by every port of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorDefaults {
    pub system: SystemId,
    pub port_priority: u16,
    pub user_port_key: u16,
    pub lacp_rate: LacpRate,
}

/// One physical link member and its LACP state machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub slot: usize,
    pub bound: bool,
    pub mac: MacAddress,
    pub is_enabled: bool,

    pub actor_system: SystemId,
    pub actor_port_number: u16,
    pub actor_port_priority: u16,
    pub actor_admin_key: u16,
    pub actor_oper_key: u16,
    pub actor_admin_state: PortState,
    pub actor_oper_state: PortState,

    pub partner_admin: PortParams,
    pub partner_oper: PortParams,

    pub sm_vars: SmVars,
    pub rx_state: RxState,
    pub periodic_state: PeriodicState,
    pub mux_state: MuxState,
    pub actor_churn_state: ChurnState,
    pub partner_churn_state: ChurnState,
    pub timers: PortTimers,
    pub ntt: bool,

    pub stats: PortStats,
}

impl Port {
    /// An empty slot.
    pub fn unbound(slot: usize) -> Self {
        Self {
            slot,
            bound: false,
            mac: MacAddress::ZERO,
            is_enabled: false,
            actor_system: SystemId {
                priority: 0xffff,
                mac: MacAddress::ZERO,
            },
            actor_port_number: 0,
            actor_port_priority: 0xff,
            actor_admin_key: 0,
            actor_oper_key: 0,
            actor_admin_state: PortState::empty(),
            actor_oper_state: PortState::empty(),
            partner_admin: PortParams::ADMIN_DEFAULT,
            partner_oper: PortParams::ADMIN_DEFAULT,
            sm_vars: SmVars::empty(),
            rx_state: RxState::default(),
            periodic_state: PeriodicState::default(),
            mux_state: MuxState::default(),
            actor_churn_state: ChurnState::default(),
            partner_churn_state: ChurnState::default(),
            timers: PortTimers::default(),
            ntt: false,
            stats: PortStats::default(),
        }
    }

    /// A freshly bound port with BEGIN set.
    pub fn bind(slot: usize, actor: &ActorDefaults, link: &LinkInfo, rate: TickRate) -> Self {
        let mut state = PortState::LACP_ACTIVITY | PortState::AGGREGATION;
        if actor.lacp_rate == LacpRate::Fast {
            state |= PortState::LACP_TIMEOUT;
        }

        let mut port = Self {
            bound: true,
            mac: link.mac,
            is_enabled: link.up,
            actor_system: actor.system,
            actor_port_number: (slot + 1) as u16,
            actor_port_priority: actor.port_priority,
            actor_admin_key: port_key(actor.user_port_key, LinkSpeed::Unknown, Duplex::Half),
            actor_admin_state: state,
            actor_oper_state: state,
            sm_vars: SmVars::BEGIN,
            ..Self::unbound(slot)
        };
        port.timers.tx_window = rate.tx_window();
        port.update_keys(link);
        port
    }

    /// Recomputes admin/oper keys from the link. A down link contributes
    /// neither speed nor duplex. Half-duplex ports run with LACP disabled.
    pub fn update_keys(&mut self, link: &LinkInfo) {
        let user = (self.actor_admin_key & KEY_USER_MASK) >> 6;
        let key = if link.up {
            port_key(user, link.speed, link.duplex)
        } else {
            port_key(user, LinkSpeed::Unknown, Duplex::Half)
        };
        self.actor_admin_key = key;
        self.actor_oper_key = key;
        self.sm_vars
            .set(SmVars::LACP_ENABLED, key_is_full_duplex(key));
    }

    /// Sets or clears the actor's short-timeout request.
    pub fn set_lacp_rate(&mut self, rate: LacpRate) {
        let fast = rate == LacpRate::Fast;
        self.actor_admin_state.set(PortState::LACP_TIMEOUT, fast);
        self.actor_oper_state.set(PortState::LACP_TIMEOUT, fast);
    }

    /// The actor side as carried in the actor TLV.
    pub fn actor_params(&self) -> PortParams {
        PortParams {
            system: self.actor_system.mac,
            system_priority: self.actor_system.priority,
            key: self.actor_oper_key,
            port_number: self.actor_port_number,
            port_priority: self.actor_port_priority,
            port_state: self.actor_oper_state,
        }
    }

    /// The LACPDU this port would send now.
    pub fn lacpdu(&self) -> Lacpdu {
        Lacpdu {
            actor: self.actor_params(),
            partner: self.partner_oper,
            collector_max_delay: 0,
        }
    }

    pub fn is_selected(&self) -> bool {
        self.sm_vars.contains(SmVars::SELECTED)
    }

    pub fn lacp_enabled(&self) -> bool {
        self.sm_vars.contains(SmVars::LACP_ENABLED)
    }
}
