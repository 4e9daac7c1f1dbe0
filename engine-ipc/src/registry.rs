//! Table of live channels, one slot per channel kind.

use alloc::sync::Arc;

use engine_abi::ChannelType;
use spinning_top::Spinlock;

use crate::channel::Channel;
use crate::descriptor::ChannelDescriptor;
use crate::error::{IpcError, Result};

/// Descriptor table plus the channel currently bound to each descriptor.
pub struct ChannelRegistry {
    descriptors: [ChannelDescriptor; ChannelType::COUNT],
    slots: [Spinlock<Option<Arc<Channel>>>; ChannelType::COUNT],
}

impl ChannelRegistry {
    /// Create an empty registry over `descriptors`.
    pub fn new(descriptors: [ChannelDescriptor; ChannelType::COUNT]) -> Self {
        debug_assert!(
            descriptors
                .iter()
                .enumerate()
                .all(|(i, d)| d.channel_type.index() == i),
            "descriptors must be in channel order"
        );
        Self {
            descriptors,
            slots: core::array::from_fn(|_| Spinlock::new(None)),
        }
    }

    pub fn descriptor(&self, channel_type: ChannelType) -> &ChannelDescriptor {
        &self.descriptors[channel_type.index()]
    }

    /// The live channel of this kind, if one is published.
    pub fn get(&self, channel_type: ChannelType) -> Option<Arc<Channel>> {
        self.slots[channel_type.index()].lock().clone()
    }

    pub fn is_published(&self, channel_type: ChannelType) -> bool {
        self.slots[channel_type.index()].lock().is_some()
    }

    /// Make `channel` visible to lookups.
    pub fn publish(&self, channel: Arc<Channel>) -> Result<()> {
        let channel_type = channel.channel_type();
        let mut slot = self.slots[channel_type.index()].lock();
        if slot.is_some() {
            return Err(IpcError::AlreadyInitialized(channel_type));
        }
        *slot = Some(channel);
        Ok(())
    }

    /// Take the channel of this kind out of the table.
    pub fn remove(&self, channel_type: ChannelType) -> Option<Arc<Channel>> {
        self.slots[channel_type.index()].lock().take()
    }
}
