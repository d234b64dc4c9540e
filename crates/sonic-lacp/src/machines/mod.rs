//! The per-port LACP state machines.
//!
//! Each machine is a free function over a [`Port`](crate::port::Port)
//! advanced once per tick by the engine, in the order rx, periodic,
//! selection, mux, tx, churn.

mod churn;
mod mux;
mod periodic;
mod rx;
mod tx;

pub use churn::churn_machine;
pub use mux::mux_machine;
pub use periodic::periodic_machine;
pub use rx::{receive_lacpdu, rx_machine};
pub use tx::tx_machine;
