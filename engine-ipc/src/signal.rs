//! Doorbells between the host and the engine.
//!
//! Every channel has two signals: one the host raises after writing to the
//! engine, and one the engine raises after writing to the host. The platform
//! provides the registers behind them through [`Doorbell`]; this module binds
//! a channel's incoming signal to a [`SignalHandler`] that finds its way back
//! to the owning driver instance.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, Ordering};

use engine_abi::ChannelType;
use log::{debug, error, trace};

use crate::descriptor::{ChannelDescriptor, SignalSpec};
use crate::error::{IpcError, Result};
use crate::ipc::{EngineIpc, IpcShared};

/// Access to the mailbox and semaphore registers.
pub trait Doorbell: Send + Sync {
    /// Raise `signal` towards the engine.
    ///
    /// Called with the channel lock held, so it must not deliver host-side
    /// signals synchronously.
    fn ring(&self, signal: &SignalSpec);

    /// Route the engine's `signal` to `handler`.
    fn bind(&self, signal: &SignalSpec, handler: SignalHandler) -> Result<()>;

    /// Stop routing `signal`. Unknown signals are ignored.
    fn unbind(&self, signal: &SignalSpec);
}

/// Receive callback registered for one channel.
///
/// Holds only a weak reference to the driver, so a doorbell that fires after
/// the driver is gone is dropped rather than dereferencing freed state.
#[derive(Clone)]
pub struct SignalHandler {
    owner: Weak<IpcShared>,
    channel_type: ChannelType,
}

impl SignalHandler {
    pub(crate) fn new(owner: Weak<IpcShared>, channel_type: ChannelType) -> Self {
        Self { owner, channel_type }
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// The driver instance that owns this channel, if it still exists.
    pub fn owner(&self) -> Option<EngineIpc> {
        self.owner.upgrade().map(EngineIpc::from_shared)
    }

    /// Deliver one doorbell. Safe to call from interrupt context.
    pub fn fire(&self) {
        match self.owner() {
            Some(ipc) => ipc.handle_signal(self.channel_type),
            None => debug!("{}: doorbell after driver teardown", self.channel_type.name()),
        }
    }
}

/// Both signals of a bound channel.
pub struct SignalPath {
    channel_type: ChannelType,
    to_peer: SignalSpec,
    from_peer: SignalSpec,
    doorbell: Arc<dyn Doorbell>,
    bound: AtomicBool,
}

impl SignalPath {
    /// Bind the incoming signal of `descriptor` to `handler`.
    pub fn bind(
        descriptor: &ChannelDescriptor,
        doorbell: Arc<dyn Doorbell>,
        handler: SignalHandler,
    ) -> Result<Self> {
        let channel_type = descriptor.channel_type;
        doorbell.bind(&descriptor.from_peer, handler).map_err(|err| {
            error!("{}: binding {:?} failed: {}", channel_type.name(), descriptor.from_peer, err);
            IpcError::BindFailed(channel_type)
        })?;
        Ok(Self {
            channel_type,
            to_peer: descriptor.to_peer,
            from_peer: descriptor.from_peer,
            doorbell,
            bound: AtomicBool::new(true),
        })
    }

    /// Tell the engine there is something to look at.
    pub fn notify(&self) {
        trace!("{}: ring {:?}", self.channel_type.name(), self.to_peer);
        self.doorbell.ring(&self.to_peer);
    }

    /// Release the incoming signal. Idempotent.
    pub fn unbind(&self) {
        if self.bound.swap(false, Ordering::AcqRel) {
            self.doorbell.unbind(&self.from_peer);
        }
    }
}

impl Drop for SignalPath {
    fn drop(&mut self) {
        self.unbind();
    }
}
