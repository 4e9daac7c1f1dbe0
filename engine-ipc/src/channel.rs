//! A live channel: one ring pair, its doorbells, and the state guarding them.
//!
//! All mutable state sits behind one spinlock. Sends ring the doorbell while
//! still holding it, so the engine never sees the doorbell for a frame that is
//! not yet published and two senders never interleave. Nothing ever sleeps
//! with the lock held.

use bitflags::bitflags;
use engine_abi::{ChannelType, MessageHeader, WaitKind};
use ivc::{Ivc, IvcError};
use log::{info, trace, warn};
use spinning_top::Spinlock;
use zerocopy::IntoBytes;

use crate::descriptor::ChannelDescriptor;
use crate::error::{IpcError, Result};
use crate::region::SharedRegion;
use crate::signal::SignalPath;
use crate::wait::WaitConditions;

bitflags! {
    /// Lifecycle state of a channel.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct ChannelFlags: u8 {
        const INITIALIZED = 1 << 0;
        /// The reset handshake completed and no reset has started since.
        const SYNCED      = 1 << 1;
        /// The engine restarted the handshake on a synced channel.
        const RESYNCING   = 1 << 2;
    }
}

/// Where a channel's queues live, as handed to the engine's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub frame_count: u32,
    /// Aligned frame size.
    pub frame_size: u32,
    /// Engine-visible address of the queue the host reads.
    pub rx_addr: u64,
    /// Engine-visible address of the queue the host writes.
    pub tx_addr: u64,
}

struct ChannelState {
    ring: Ivc,
    flags: ChannelFlags,
    wait: Option<WaitKind>,
}

pub struct Channel {
    descriptor: ChannelDescriptor,
    queue_info: QueueInfo,
    signal: SignalPath,
    state: Spinlock<ChannelState>,
}

impl Channel {
    /// Carve queues for `descriptor` out of `region` and set up the ring.
    ///
    /// On failure the carved space stays consumed and `signal` is released.
    pub fn open(
        descriptor: ChannelDescriptor,
        region: &mut SharedRegion,
        signal: SignalPath,
    ) -> Result<Self> {
        let geometry = descriptor.geometry;
        let carve = region.carve(&geometry)?;
        let rx = region.host_ptr(carve.rx_offset).ok_or(IpcError::InvalidGeometry)?;
        let tx = region.host_ptr(carve.tx_offset).ok_or(IpcError::InvalidGeometry)?;
        let frame_size = geometry.aligned_frame_size() as u32;

        // SAFETY: the carve is exclusive to this channel, both queues lie
        // inside the region, and the region outlives every channel.
        let ring = unsafe { Ivc::new(rx, tx, geometry.frame_count, frame_size) }?;

        Ok(Self {
            descriptor,
            queue_info: QueueInfo {
                frame_count: geometry.frame_count,
                frame_size,
                rx_addr: region.device_addr(carve.rx_offset),
                tx_addr: region.device_addr(carve.tx_offset),
            },
            signal,
            state: Spinlock::new(ChannelState {
                ring,
                flags: ChannelFlags::INITIALIZED,
                wait: None,
            }),
        })
    }

    pub fn channel_type(&self) -> ChannelType {
        self.descriptor.channel_type
    }

    fn name(&self) -> &'static str {
        self.channel_type().name()
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    pub fn queue_info(&self) -> QueueInfo {
        self.queue_info
    }

    pub fn flags(&self) -> ChannelFlags {
        self.state.lock().flags
    }

    pub fn is_synced(&self) -> bool {
        self.flags().contains(ChannelFlags::SYNCED)
    }

    /// Kind of wait a caller is blocked on, if any.
    pub fn current_wait(&self) -> Option<WaitKind> {
        self.state.lock().wait
    }

    pub fn is_data_available(&self) -> bool {
        self.state.lock().ring.can_read()
    }

    /// Outstanding wait and pending data, read under one lock.
    pub fn signal_snapshot(&self) -> (Option<WaitKind>, bool) {
        let state = self.state.lock();
        (state.wait, state.ring.can_read())
    }

    fn check_ready(&self, state: &ChannelState) -> Result<()> {
        if !state.flags.contains(ChannelFlags::INITIALIZED) {
            return Err(IpcError::NotInitialized(self.channel_type()));
        }
        if !state.flags.contains(ChannelFlags::SYNCED) {
            return Err(IpcError::NotSynced(self.channel_type()));
        }
        Ok(())
    }

    fn ring_error(&self, err: IvcError) -> IpcError {
        match err {
            IvcError::NotEstablished => IpcError::NotSynced(self.channel_type()),
            other => other.into(),
        }
    }

    /// Queue one message for the engine and ring its doorbell.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let max = self.descriptor.max_payload();
        if data.len() > max {
            return Err(IpcError::MessageTooLarge { size: data.len(), max });
        }

        let mut state = self.state.lock();
        self.check_ready(&state)?;

        let mut frame = state.ring.next_write_frame().map_err(|err| self.ring_error(err))?;
        let mut offset = 0;
        if self.descriptor.has_msg_header() {
            let header = MessageHeader::new(data.len() as u32);
            frame.write(0, header.as_bytes())?;
            offset = MessageHeader::SIZE;
        }
        frame.write(offset, data)?;
        frame.commit();
        self.signal.notify();

        trace!("{}: sent {} bytes", self.name(), data.len());
        Ok(())
    }

    /// Take the oldest message from the engine into `out`.
    ///
    /// Returns the message length. Frames of channels without a message
    /// header are always a full frame long. If `out` is too small the message
    /// stays queued.
    pub fn receive(&self, out: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        self.check_ready(&state)?;

        let frame = state.ring.next_read_frame().map_err(|err| self.ring_error(err))?;
        let capacity = frame.capacity();

        let (offset, len) = if self.descriptor.has_msg_header() {
            let mut header = MessageHeader::default();
            frame.read(0, header.as_mut_bytes())?;
            let len = header.length as usize;
            let max = capacity - MessageHeader::SIZE;
            if len > max {
                warn!("{}: dropping frame with bad length {}", self.name(), len);
                if frame.release() {
                    self.signal.notify();
                }
                return Err(IpcError::MessageTooLarge { size: len, max });
            }
            (MessageHeader::SIZE, len)
        } else {
            (0, capacity)
        };

        if out.len() < len {
            return Err(IpcError::BufferTooSmall { needed: len, available: out.len() });
        }
        frame.read(offset, &mut out[..len])?;
        // The engine may be waiting for room.
        if frame.release() {
            self.signal.notify();
        }

        trace!("{}: received {} bytes", self.name(), len);
        Ok(len)
    }

    /// Start the reset handshake: drop sync and tell the engine.
    pub fn begin_reset(&self) {
        let mut state = self.state.lock();
        state.ring.reset();
        state.flags.remove(ChannelFlags::SYNCED | ChannelFlags::RESYNCING);
        self.signal.notify();
    }

    /// Advance the handshake and report whether the engine has acknowledged.
    ///
    /// Rings the engine on every call so a missed doorbell on either side
    /// cannot stall the handshake. A reset started by the engine drops sync
    /// here and restores it once the engine is acknowledged.
    pub fn poll_ready(&self) -> bool {
        let mut state = self.state.lock();
        let ready = !state.ring.is_peer_unacknowledged();
        if !ready && state.flags.contains(ChannelFlags::SYNCED) {
            warn!("{}: engine restarted the handshake", self.name());
            state.flags.remove(ChannelFlags::SYNCED);
            state.flags.insert(ChannelFlags::RESYNCING);
        } else if ready && state.flags.contains(ChannelFlags::RESYNCING) {
            info!("{}: engine handshake acknowledged", self.name());
            state.flags.remove(ChannelFlags::RESYNCING);
            state.flags.insert(ChannelFlags::SYNCED);
        }
        self.signal.notify();
        ready
    }

    pub fn mark_synced(&self) {
        let mut state = self.state.lock();
        state.flags.remove(ChannelFlags::RESYNCING);
        state.flags.insert(ChannelFlags::SYNCED);
    }

    /// Record that a caller is about to block for `kind`.
    ///
    /// Fails if another wait is already outstanding. The returned guard
    /// clears the record when dropped.
    pub fn arm_wait<'a>(&'a self, kind: WaitKind, waits: &WaitConditions) -> Result<WaitGuard<'a>> {
        let mut state = self.state.lock();
        if !state.flags.contains(ChannelFlags::INITIALIZED) {
            return Err(IpcError::NotInitialized(self.channel_type()));
        }
        if let Some(current) = state.wait {
            return Err(IpcError::WaitInProgress(current));
        }
        waits.arm(self.channel_type(), kind);
        state.wait = Some(kind);
        Ok(WaitGuard { channel: self })
    }

    /// Stop signaling and refuse further traffic.
    pub fn close(&self) {
        self.state.lock().flags = ChannelFlags::empty();
        self.signal.unbind();
    }
}

/// Outstanding wait on a channel. Dropping it clears the channel's wait kind.
pub struct WaitGuard<'a> {
    channel: &'a Channel,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.channel.state.lock().wait = None;
    }
}
