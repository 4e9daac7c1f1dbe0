//! Wait conditions that turn a doorbell into a blocking return.
//!
//! One condition exists per (channel, wait kind) pair. The caller arms its
//! condition before the engine can possibly answer, then polls it without
//! holding any channel lock; the doorbell handler sets it.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use engine_abi::{ChannelType, WaitKind};

use crate::error::{IpcError, Result};

/// Monotonic time source and busy-wait delay provided by the platform.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed point.
    fn now(&self) -> Duration;

    /// Pause for roughly `us` microseconds.
    fn delay_us(&self, us: u32) {
        for _ in 0..u64::from(us) * 100 {
            core::hint::spin_loop();
        }
    }
}

const CONDITIONS: usize = ChannelType::COUNT * WaitKind::COUNT;

/// Signaled flags for every wait a caller can block on.
pub struct WaitConditions {
    signaled: [AtomicBool; CONDITIONS],
}

impl WaitConditions {
    pub fn new() -> Self {
        Self {
            signaled: [const { AtomicBool::new(false) }; CONDITIONS],
        }
    }

    fn condition(&self, channel: ChannelType, kind: WaitKind) -> &AtomicBool {
        &self.signaled[channel.index() * WaitKind::COUNT + kind.index()]
    }

    /// Forget any signal left over from an earlier wait.
    pub fn arm(&self, channel: ChannelType, kind: WaitKind) {
        self.condition(channel, kind).store(false, Ordering::Release);
    }

    /// Wake the caller blocked on `(channel, kind)`, if any.
    pub fn signal(&self, channel: ChannelType, kind: WaitKind) {
        self.condition(channel, kind).store(true, Ordering::Release);
    }

    pub fn is_signaled(&self, channel: ChannelType, kind: WaitKind) -> bool {
        self.condition(channel, kind).load(Ordering::Acquire)
    }

    /// Block until `(channel, kind)` is signaled or `timeout` elapses.
    ///
    /// Consumes the signal on success.
    pub fn wait(
        &self,
        channel: ChannelType,
        kind: WaitKind,
        timeout: Duration,
        clock: &dyn Clock,
        poll_interval_us: u32,
    ) -> Result<()> {
        let condition = self.condition(channel, kind);
        let deadline = clock.now().saturating_add(timeout);
        loop {
            if condition.swap(false, Ordering::AcqRel) {
                return Ok(());
            }
            if clock.now() >= deadline {
                return Err(IpcError::Timeout);
            }
            clock.delay_us(poll_interval_us);
        }
    }
}

impl Default for WaitConditions {
    fn default() -> Self {
        Self::new()
    }
}
