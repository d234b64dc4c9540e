//! Tick-quantized protocol timers.

use crate::error::{LacpError, Result};
use std::time::Duration;

/// Fast periodic transmission interval.
pub const FAST_PERIODIC_SECS: u32 = 1;
/// Slow periodic transmission interval.
pub const SLOW_PERIODIC_SECS: u32 = 30;
/// Current-while timeout when the short timeout is in use.
pub const SHORT_TIMEOUT_SECS: u32 = 3;
/// Current-while timeout when the long timeout is in use.
pub const LONG_TIMEOUT_SECS: u32 = 90;
/// Mux wait-while period before a port may attach.
pub const AGGREGATE_WAIT_SECS: u32 = 2;
/// Churn detection period.
pub const CHURN_DETECTION_SECS: u32 = 60;
/// Device-wide delay before the first aggregator selection settles.
pub const AGG_SELECTION_SECS: u32 = 8;
/// Upper bound on LACPDUs per port per second.
pub const MAX_TX_PER_SEC: u32 = 3;

/// Number of ticks in one second for a device, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    ticks_per_sec: u32,
}

impl TickRate {
    /// Derives the tick rate from the tick interval.
    ///
    /// The interval must leave room for [`MAX_TX_PER_SEC`] transmit windows
    /// per second.
    pub fn from_interval(interval: Duration) -> Result<Self> {
        let ms = interval.as_millis();
        if ms == 0 {
            return Err(LacpError::config("tick_interval_ms", "must be > 0"));
        }
        let ticks_per_sec = u32::try_from(1000 / ms).unwrap_or(0);
        if ticks_per_sec < MAX_TX_PER_SEC {
            return Err(LacpError::config(
                "tick_interval_ms",
                format!("{ms} ms leaves fewer than {MAX_TX_PER_SEC} ticks per second"),
            ));
        }
        Ok(Self { ticks_per_sec })
    }

    pub fn ticks_per_sec(&self) -> u32 {
        self.ticks_per_sec
    }

    /// Converts whole seconds to ticks.
    pub fn secs(&self, secs: u32) -> u32 {
        secs * self.ticks_per_sec
    }

    /// Current-while timer for the short or long timeout.
    pub fn current_while(&self, short: bool) -> u32 {
        if short {
            self.secs(SHORT_TIMEOUT_SECS)
        } else {
            self.secs(LONG_TIMEOUT_SECS)
        }
    }

    /// Periodic timer for fast or slow transmission.
    pub fn periodic(&self, fast: bool) -> u32 {
        if fast {
            self.secs(FAST_PERIODIC_SECS)
        } else {
            self.secs(SLOW_PERIODIC_SECS)
        }
    }

    pub fn wait_while(&self) -> u32 {
        self.secs(AGGREGATE_WAIT_SECS)
    }

    pub fn churn(&self) -> u32 {
        self.secs(CHURN_DETECTION_SECS)
    }

    pub fn agg_selection(&self) -> u32 {
        self.secs(AGG_SELECTION_SECS)
    }

    /// Length of one transmit window.
    pub fn tx_window(&self) -> u32 {
        self.ticks_per_sec / MAX_TX_PER_SEC
    }
}

impl Default for TickRate {
    /// 100 ms ticks.
    fn default() -> Self {
        Self { ticks_per_sec: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_rate() {
        let rate = TickRate::from_interval(Duration::from_millis(100)).unwrap();
        assert_eq!(rate, TickRate::default());
        assert_eq!(rate.current_while(true), 30);
        assert_eq!(rate.current_while(false), 900);
        assert_eq!(rate.periodic(true), 10);
        assert_eq!(rate.periodic(false), 300);
        assert_eq!(rate.wait_while(), 20);
        assert_eq!(rate.churn(), 600);
        assert_eq!(rate.agg_selection(), 80);
        assert_eq!(rate.tx_window(), 3);
    }

    #[test]
    fn test_rate_bounds() {
        assert!(TickRate::from_interval(Duration::ZERO).is_err());
        assert!(TickRate::from_interval(Duration::from_millis(334)).is_err());
        let slowest = TickRate::from_interval(Duration::from_millis(333)).unwrap();
        assert_eq!(slowest.ticks_per_sec(), 3);
        assert_eq!(slowest.tx_window(), 1);
    }

    #[test]
    fn test_fine_rate() {
        let rate = TickRate::from_interval(Duration::from_millis(10)).unwrap();
        assert_eq!(rate.ticks_per_sec(), 100);
        assert_eq!(rate.tx_window(), 33);
    }
}
