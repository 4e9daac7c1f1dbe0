//! Driver configuration.

use core::time::Duration;

use engine_abi::{
    ChannelType, DEFAULT_POOL_SLOTS, DEFAULT_RPC_TIMEOUT_MS, RESET_POLL_INTERVAL_US,
    WAIT_POLL_INTERVAL_US,
};

use crate::descriptor::{ChannelDescriptor, DEFAULT_DESCRIPTORS};

/// Tunables for one [`EngineIpc`](crate::EngineIpc) instance.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// One descriptor per channel kind, indexed by [`ChannelType::index`].
    pub descriptors: [ChannelDescriptor; ChannelType::COUNT],
    /// Upper bound on a synchronous request or event wait.
    pub rpc_timeout: Duration,
    /// Backoff between readiness polls while resetting a channel.
    pub reset_poll_interval_us: u32,
    /// Bound on the reset handshake. `None` polls until the engine answers.
    pub reset_timeout: Option<Duration>,
    /// Backoff between checks of a wait condition.
    pub wait_poll_interval_us: u32,
    /// Request/reply buffers pre-allocated per admin client.
    pub pool_slots: usize,
}

impl IpcConfig {
    /// Replace the descriptor for `descriptor.channel_type`.
    pub fn with_descriptor(mut self, descriptor: ChannelDescriptor) -> Self {
        self.descriptors[descriptor.channel_type.index()] = descriptor;
        self
    }

    pub fn descriptor(&self, channel_type: ChannelType) -> &ChannelDescriptor {
        &self.descriptors[channel_type.index()]
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            descriptors: DEFAULT_DESCRIPTORS,
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            reset_poll_interval_us: RESET_POLL_INTERVAL_US,
            reset_timeout: None,
            wait_poll_interval_us: WAIT_POLL_INTERVAL_US,
            pool_slots: DEFAULT_POOL_SLOTS,
        }
    }
}
