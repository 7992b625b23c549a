//! Bounded hardware polling.
//!
//! Everything here is blocking. Long waits keep the hardware watchdog fed so that a
//! slow medium does not reset the board halfway through a boot.

use embedded_hal::delay::DelayNs;

use crate::{Error, Result};

/// Pause between two polls of a status condition.
pub const POLL_INTERVAL_US: u32 = 10;

/// Free-running millisecond counter.
pub trait Ticks {
    fn now_ms(&self) -> u64;
}

/// Hardware watchdog which has to be serviced inside polling loops.
pub trait Watchdog {
    fn feed(&mut self);
}

/// For boards without a watchdog.
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&mut self) {}
}

/// Time services handed to loaders that poll hardware.
pub struct Timing<'a> {
    pub ticks: &'a dyn Ticks,
    pub delay: &'a mut dyn DelayNs,
    pub watchdog: &'a mut dyn Watchdog,
}

impl Timing<'_> {
    /// Poll `ready` until it reports true, failing with [`Error::Timeout`] once
    /// `timeout_ms` has elapsed.
    ///
    /// Errors from `ready` itself are returned as-is.
    pub fn poll_timeout(
        &mut self,
        timeout_ms: u64,
        mut ready: impl FnMut() -> Result<bool>,
    ) -> Result<()> {
        let start = self.ticks.now_ms();
        loop {
            self.watchdog.feed();
            if ready()? {
                return Ok(());
            }
            if self.ticks.now_ms().wrapping_sub(start) > timeout_ms {
                return Err(Error::Timeout);
            }
            self.delay.delay_us(POLL_INTERVAL_US);
        }
    }

    pub fn feed(&mut self) {
        self.watchdog.feed();
    }
}
