//! Definitions shared between the host driver and the engine firmware.
//!
//! This crate contains the channel and client identifiers, default queue
//! geometry, timing constants and the on-wire message header that both
//! processors need to agree on.

#![no_std]

pub mod message;

pub use message::MessageHeader;

// =============================================================================
// Channels
// =============================================================================

/// Logical channel multiplexed over the shared region.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelType {
    /// Admin commands, boot and log events.
    Admin = 0,
    /// Display resource-manager RPCs.
    Rm = 1,
    /// Notifications from the display resource manager.
    RmNotify = 2,
}

impl ChannelType {
    /// Number of channel kinds.
    pub const COUNT: usize = 3;

    /// Every channel kind, in registry order.
    pub const ALL: [ChannelType; Self::COUNT] =
        [ChannelType::Admin, ChannelType::Rm, ChannelType::RmNotify];

    /// Registry slot of this channel kind.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Channel kind for a registry slot or hardware identifier.
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ChannelType::Admin),
            1 => Some(ChannelType::Rm),
            2 => Some(ChannelType::RmNotify),
            _ => None,
        }
    }

    /// Short name used in log output.
    pub const fn name(self) -> &'static str {
        match self {
            ChannelType::Admin => "admin",
            ChannelType::Rm => "rm",
            ChannelType::RmNotify => "rm-notify",
        }
    }
}

// =============================================================================
// Waits
// =============================================================================

/// Why a caller is blocked on a channel.
///
/// A channel with no blocked caller records `None` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    /// Reply to a synchronous request.
    RpcReply,
    /// Engine finished booting.
    BootComplete,
    /// Engine flushed its log buffer.
    LogEvent,
}

impl WaitKind {
    /// Number of wait kinds.
    pub const COUNT: usize = 3;

    pub const ALL: [WaitKind; Self::COUNT] =
        [WaitKind::RpcReply, WaitKind::BootComplete, WaitKind::LogEvent];

    pub const fn index(self) -> usize {
        match self {
            WaitKind::RpcReply => 0,
            WaitKind::BootComplete => 1,
            WaitKind::LogEvent => 2,
        }
    }
}

// =============================================================================
// Admin clients
// =============================================================================

/// Logical clients sharing the admin channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientId {
    Admin,
    Perf,
    Debug,
    Pm,
}

impl ClientId {
    /// Number of logical clients.
    pub const COUNT: usize = 4;

    pub const ALL: [ClientId; Self::COUNT] =
        [ClientId::Admin, ClientId::Perf, ClientId::Debug, ClientId::Pm];

    pub const fn index(self) -> usize {
        match self {
            ClientId::Admin => 0,
            ClientId::Perf => 1,
            ClientId::Debug => 2,
            ClientId::Pm => 3,
        }
    }
}

// =============================================================================
// Queue geometry
// =============================================================================

/// Frames per direction on the admin channel.
pub const ADMIN_FRAME_COUNT: u32 = 4;
/// Frame size on the admin channel.
pub const ADMIN_FRAME_SIZE: u32 = 1024;

/// Frames per direction on the RM channel.
pub const RM_FRAME_COUNT: u32 = 1;
/// Frame size on the RM channel.
pub const RM_FRAME_SIZE: u32 = 4096;

/// Frames per direction on the RM notification channel.
pub const RM_NOTIFY_FRAME_COUNT: u32 = 4;
/// Frame size on the RM notification channel.
pub const RM_NOTIFY_FRAME_SIZE: u32 = 4096;

// =============================================================================
// Timing
// =============================================================================

/// Upper bound on how long a synchronous request waits for its reply.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5000;

/// Backoff between readiness polls during a channel reset.
pub const RESET_POLL_INTERVAL_US: u32 = 20;

/// Backoff between checks of a wait condition.
pub const WAIT_POLL_INTERVAL_US: u32 = 10;

// =============================================================================
// Client buffers
// =============================================================================

/// Pre-allocated request/reply buffers per admin client.
pub const DEFAULT_POOL_SLOTS: usize = 2;
