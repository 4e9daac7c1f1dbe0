//! Error type for channel operations.

use engine_abi::{ChannelType, ClientId, WaitKind};
use ivc::IvcError;

/// Result type returned by channel operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Errors produced by the IPC layer.
///
/// `Full` and `Empty` are flow-control outcomes rather than failures: a full
/// ring is backpressure, an empty one means no message has arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    /// The channel's descriptor is not marked valid in this configuration.
    #[error("{0:?} channel is disabled")]
    Disabled(ChannelType),
    /// `channel_init` was called twice without a `channel_deinit`.
    #[error("{0:?} channel is already initialized")]
    AlreadyInitialized(ChannelType),
    /// The shared region cannot hold another queue pair.
    #[error("shared region exhausted: {requested} bytes requested, {available} available")]
    RegionExhausted { requested: usize, available: usize },
    /// Zero frames or a zero frame size.
    #[error("invalid queue geometry")]
    InvalidGeometry,
    /// The shared region could not be allocated.
    #[error("shared region allocation failed")]
    AllocationFailed,
    /// The doorbell refused to route the channel's interrupt.
    #[error("could not bind the doorbell of the {0:?} channel")]
    BindFailed(ChannelType),
    /// The channel has not been initialized, or was torn down.
    #[error("{0:?} channel is not initialized")]
    NotInitialized(ChannelType),
    /// The channel has not completed its reset handshake.
    #[error("{0:?} channel is not synchronized with the engine")]
    NotSynced(ChannelType),
    /// The engine has not drained earlier frames.
    #[error("channel is full")]
    Full,
    /// No frame is waiting to be read.
    #[error("channel is empty")]
    Empty,
    /// The payload does not fit in one frame.
    #[error("message of {size} bytes exceeds the {max}-byte limit")]
    MessageTooLarge { size: usize, max: usize },
    /// The destination buffer is smaller than the pending message.
    #[error("message of {needed} bytes does not fit in a {available}-byte buffer")]
    BufferTooSmall { needed: usize, available: usize },
    /// The engine did not signal within the configured timeout.
    #[error("timed out waiting for the engine")]
    Timeout,
    /// The reset handshake did not complete within the configured bound.
    #[error("channel reset handshake timed out")]
    ResetTimeout,
    /// Another caller is already blocked on this channel.
    #[error("a {0:?} wait is already outstanding on this channel")]
    WaitInProgress(WaitKind),
    /// The channel never raises this kind of event.
    #[error("{channel:?} channel does not deliver {kind:?} events")]
    UnsupportedWait { channel: ChannelType, kind: WaitKind },
    /// Every pre-allocated buffer of the client is in use.
    #[error("no free message buffer for the {0:?} client")]
    Busy(ClientId),
    /// The ring transport rejected the queue layout.
    #[error("ring transport error")]
    Ring(#[source] IvcError),
}

impl From<IvcError> for IpcError {
    fn from(err: IvcError) -> Self {
        match err {
            IvcError::Full => IpcError::Full,
            IvcError::Empty => IpcError::Empty,
            IvcError::FrameTooLarge { size, frame_size } => IpcError::MessageTooLarge {
                size,
                max: frame_size,
            },
            other => IpcError::Ring(other),
        }
    }
}
