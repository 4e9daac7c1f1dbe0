//! Static description of each logical channel.
//!
//! A descriptor says how big a channel's queues are and which doorbells
//! connect it to the engine. The table is fixed at build time; `channel_init`
//! binds one descriptor to a live channel.

use bitflags::bitflags;
use engine_abi::{
    ADMIN_FRAME_COUNT, ADMIN_FRAME_SIZE, ChannelType, MessageHeader, RM_FRAME_COUNT,
    RM_FRAME_SIZE, RM_NOTIFY_FRAME_COUNT, RM_NOTIFY_FRAME_SIZE,
};

bitflags! {
    /// What a channel supports.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct ChannelCaps: u32 {
        /// The channel exists in this configuration.
        const VALID          = 1 << 0;
        /// Every frame starts with a [`MessageHeader`].
        const HAS_MSG_HEADER = 1 << 1;
    }
}

/// Hardware used to raise a notification in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalSpec {
    /// Doorbell register of hardware mailbox `id`.
    Mailbox { id: u8 },
    /// Bit `bit` of shared semaphore `id`.
    Semaphore { id: u8, bit: u8 },
}

/// Frame geometry of both queues of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueGeometry {
    pub frame_count: u32,
    pub frame_size: u32,
}

impl QueueGeometry {
    pub const fn new(frame_count: u32, frame_size: u32) -> Self {
        Self { frame_count, frame_size }
    }

    /// Frame size rounded up to the ring alignment.
    pub const fn aligned_frame_size(&self) -> usize {
        ivc::align(self.frame_size as usize)
    }

    /// Shared memory taken by one queue (one direction).
    pub const fn ring_bytes(&self) -> usize {
        ivc::total_queue_size(self.aligned_frame_size(), self.frame_count as usize)
    }

    pub const fn is_empty(&self) -> bool {
        self.frame_count == 0 || self.frame_size == 0
    }
}

/// Compile-time description of one logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub channel_type: ChannelType,
    pub caps: ChannelCaps,
    /// Raised by the host when it has written to the engine.
    pub to_peer: SignalSpec,
    /// Raised by the engine when it has written to the host.
    pub from_peer: SignalSpec,
    pub geometry: QueueGeometry,
}

impl ChannelDescriptor {
    /// Placeholder for a channel kind compiled out of this configuration.
    pub const fn disabled(channel_type: ChannelType) -> Self {
        let id = channel_type as u8;
        Self {
            channel_type,
            caps: ChannelCaps::empty(),
            to_peer: SignalSpec::Mailbox { id },
            from_peer: SignalSpec::Mailbox { id },
            geometry: QueueGeometry::new(0, 0),
        }
    }

    pub const fn is_valid(&self) -> bool {
        self.caps.contains(ChannelCaps::VALID)
    }

    pub const fn has_msg_header(&self) -> bool {
        self.caps.contains(ChannelCaps::HAS_MSG_HEADER)
    }

    /// Largest payload one frame can carry.
    pub const fn max_payload(&self) -> usize {
        let frame = self.geometry.aligned_frame_size();
        if self.has_msg_header() {
            frame.saturating_sub(MessageHeader::SIZE)
        } else {
            frame
        }
    }
}

/// Channel table used unless the board configuration overrides it.
pub const DEFAULT_DESCRIPTORS: [ChannelDescriptor; ChannelType::COUNT] = [
    ChannelDescriptor {
        channel_type: ChannelType::Admin,
        caps: ChannelCaps::VALID.union(ChannelCaps::HAS_MSG_HEADER),
        to_peer: SignalSpec::Mailbox { id: 0 },
        from_peer: SignalSpec::Mailbox { id: 1 },
        geometry: QueueGeometry::new(ADMIN_FRAME_COUNT, ADMIN_FRAME_SIZE),
    },
    ChannelDescriptor {
        channel_type: ChannelType::Rm,
        caps: ChannelCaps::VALID.union(ChannelCaps::HAS_MSG_HEADER),
        to_peer: SignalSpec::Semaphore { id: 0, bit: 0 },
        from_peer: SignalSpec::Mailbox { id: 2 },
        geometry: QueueGeometry::new(RM_FRAME_COUNT, RM_FRAME_SIZE),
    },
    ChannelDescriptor {
        channel_type: ChannelType::RmNotify,
        caps: ChannelCaps::VALID,
        to_peer: SignalSpec::Semaphore { id: 0, bit: 1 },
        from_peer: SignalSpec::Mailbox { id: 3 },
        geometry: QueueGeometry::new(RM_NOTIFY_FRAME_COUNT, RM_NOTIFY_FRAME_SIZE),
    },
];
