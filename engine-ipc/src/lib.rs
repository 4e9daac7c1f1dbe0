//! Host driver for the shared-memory IPC link to the display engine.
//!
//! Several logical channels are multiplexed over one memory region shared with
//! the engine. Each channel is a pair of framed rings (see the `ivc` crate)
//! plus two doorbells. [`EngineIpc`] owns the region and the channels and
//! offers plain send/receive, blocking request/reply and the reset handshake
//! that both processors must complete before any traffic flows.
//!
//! The platform supplies the memory ([`SharedRegion`]), the doorbell registers
//! ([`Doorbell`]) and a time source ([`Clock`]).

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod channel;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod pool;
pub mod region;
pub mod registry;
pub mod signal;
pub mod wait;

pub use channel::{ChannelFlags, QueueInfo};
pub use config::IpcConfig;
pub use descriptor::{ChannelCaps, ChannelDescriptor, DEFAULT_DESCRIPTORS, QueueGeometry, SignalSpec};
pub use dispatch::SignalEvent;
pub use engine_abi::{ChannelType, ClientId, WaitKind};
pub use error::{IpcError, Result};
pub use ipc::{EngineIpc, EventHandler, RpcMessage};
pub use pool::{ClientBuffer, ClientPool, ClientPools};
pub use region::SharedRegion;
pub use signal::{Doorbell, SignalHandler};
pub use wait::Clock;
