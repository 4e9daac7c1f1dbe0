//! Classification of incoming doorbells.

use engine_abi::{ChannelType, WaitKind};

/// What a doorbell from the engine means, given the channel's state when it
/// fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Reply to the synchronous request outstanding on the channel.
    RpcReply(ChannelType),
    /// The engine finished booting.
    BootEvent,
    /// The engine flushed its log buffer.
    LogEvent,
    /// Unsolicited admin message, not tied to any request.
    AdminAsyncEvent,
    /// Unsolicited message on a client channel.
    Notification(ChannelType),
    /// Nothing the host needs to act on.
    Stray(ChannelType),
}

impl SignalEvent {
    /// Decide what a doorbell on `channel` means.
    ///
    /// `wait` is the kind of wait outstanding on the channel and
    /// `data_available` whether a frame is waiting to be read. A doorbell
    /// during an RPC with nothing queued (the engine freeing a slot, say) does
    /// not complete the call.
    pub fn classify(channel: ChannelType, wait: Option<WaitKind>, data_available: bool) -> Self {
        match (channel, wait) {
            (_, Some(WaitKind::RpcReply)) if data_available => SignalEvent::RpcReply(channel),
            (ChannelType::Admin, Some(WaitKind::BootComplete)) => SignalEvent::BootEvent,
            (ChannelType::Admin, Some(WaitKind::LogEvent)) => SignalEvent::LogEvent,
            (ChannelType::Admin, None) if data_available => SignalEvent::AdminAsyncEvent,
            (_, None) if data_available => SignalEvent::Notification(channel),
            _ => SignalEvent::Stray(channel),
        }
    }

    /// The wait condition this event completes, if any.
    pub fn wake_target(&self) -> Option<(ChannelType, WaitKind)> {
        match *self {
            SignalEvent::RpcReply(channel) => Some((channel, WaitKind::RpcReply)),
            SignalEvent::BootEvent => Some((ChannelType::Admin, WaitKind::BootComplete)),
            SignalEvent::LogEvent => Some((ChannelType::Admin, WaitKind::LogEvent)),
            _ => None,
        }
    }
}
