//! Framed single-producer/single-consumer queues over shared memory.
//!
//! An [`Ivc`] endpoint owns one receive queue and one transmit queue. The peer
//! processor maps the same two queues with the roles swapped, so our transmit
//! queue is its receive queue and vice versa. Each queue is a fixed header
//! followed by `frame_count` frames of `frame_size` bytes:
//!
//! ```text
//!   0 +-----------------------+
//!     | tx_count | tx_state   |  written by the producer
//!  64 +-----------------------+
//!     | rx_count              |  written by the consumer
//! 128 +-----------------------+
//!     | frame 0               |
//!     | ...                   |
//!     | frame N-1             |
//!     +-----------------------+
//! ```
//!
//! Counters are free-running and compared with wrapping arithmetic, so a queue
//! never needs a separate "full" bit. Before either side may move data the two
//! endpoints agree on empty queues through a three-state handshake, see
//! [`Ivc::reset`] and [`Ivc::is_peer_unacknowledged`].

#![no_std]

#[cfg(test)]
extern crate std;

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, Ordering};

/// Alignment of queue bases and frame sizes, one cache line.
pub const IVC_ALIGN: usize = 64;

/// Size of the header preceding the frames of every queue.
pub const QUEUE_HEADER_SIZE: usize = 2 * IVC_ALIGN;

/// Round `size` up to [`IVC_ALIGN`].
pub const fn align(size: usize) -> usize {
    (size + IVC_ALIGN - 1) & !(IVC_ALIGN - 1)
}

/// Bytes of shared memory one queue of `frame_count` frames occupies.
///
/// `frame_size` should already be aligned with [`align`].
pub const fn total_queue_size(frame_size: usize, frame_count: usize) -> usize {
    align(QUEUE_HEADER_SIZE + frame_size * frame_count)
}

/// Errors returned by queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IvcError {
    /// The peer has not drained enough frames to accept another one.
    #[error("queue is full")]
    Full,
    /// The peer has not produced a frame yet.
    #[error("queue is empty")]
    Empty,
    /// The reset handshake has not completed on this endpoint.
    #[error("queue handshake has not completed")]
    NotEstablished,
    /// An access would run past the end of a frame.
    #[error("{size} bytes do not fit in a {frame_size}-byte frame")]
    FrameTooLarge { size: usize, frame_size: usize },
    /// Zero frames, a zero or unaligned frame size, or a size overflow.
    #[error("invalid queue geometry")]
    InvalidGeometry,
    /// A queue base is not aligned to a cache line.
    #[error("queue base is not 64-byte aligned")]
    Misaligned,
    /// The receive and transmit queues share memory.
    #[error("receive and transmit queues overlap")]
    Overlap,
}

/// Handshake state published by each endpoint in its transmit queue.
///
/// Zeroed memory reads as `Established`, which is why a freshly mapped channel
/// must still be reset before use.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Established = 0,
    Sync = 1,
    Ack = 2,
}

impl HandshakeState {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Established),
            1 => Some(Self::Sync),
            2 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// In-memory layout of a queue header. Producer and consumer fields live on
/// separate cache lines.
#[repr(C, align(64))]
struct QueueHeader {
    tx_count: AtomicU32,
    tx_state: AtomicU32,
    _tx_pad: [u32; 14],
    rx_count: AtomicU32,
    _rx_pad: [u32; 15],
}

const _: () = assert!(core::mem::size_of::<QueueHeader>() == QUEUE_HEADER_SIZE);

#[derive(Clone, Copy)]
struct Queue {
    base: NonNull<u8>,
}

impl Queue {
    fn header(&self) -> &QueueHeader {
        // SAFETY: `Ivc::new` checked alignment and its caller guarantees the
        // memory outlives the endpoint. Only atomics are touched through it.
        unsafe { self.base.cast::<QueueHeader>().as_ref() }
    }

    fn frame(&self, index: u32, frame_size: u32) -> NonNull<u8> {
        let offset = QUEUE_HEADER_SIZE + index as usize * frame_size as usize;
        // SAFETY: `index < frame_count`, so the frame lies inside the queue.
        unsafe { self.base.add(offset) }
    }
}

/// One endpoint of a framed shared-memory channel.
pub struct Ivc {
    rx: Queue,
    tx: Queue,
    /// Index of the next frame to read.
    rx_pos: u32,
    /// Index of the next frame to write.
    tx_pos: u32,
    frame_count: u32,
    frame_size: u32,
}

// SAFETY: the endpoint only refers to shared memory that its creator promised
// stays valid; cross-processor accesses go through the header atomics.
unsafe impl Send for Ivc {}

impl Ivc {
    /// Create an endpoint over two queues of `frame_count` frames each.
    ///
    /// # Safety
    ///
    /// `rx_base` and `tx_base` must each point to at least
    /// `total_queue_size(frame_size, frame_count)` bytes that stay valid for the
    /// lifetime of the endpoint and are accessed by nothing except this
    /// endpoint and its single peer.
    pub unsafe fn new(
        rx_base: NonNull<u8>,
        tx_base: NonNull<u8>,
        frame_count: u32,
        frame_size: u32,
    ) -> Result<Self, IvcError> {
        if frame_count == 0 || frame_size == 0 || frame_size as usize % IVC_ALIGN != 0 {
            return Err(IvcError::InvalidGeometry);
        }
        let queue_size = (frame_size as usize)
            .checked_mul(frame_count as usize)
            .and_then(|bytes| bytes.checked_add(QUEUE_HEADER_SIZE + IVC_ALIGN - 1))
            .map(|end| end & !(IVC_ALIGN - 1))
            .ok_or(IvcError::InvalidGeometry)?;

        let rx = rx_base.as_ptr() as usize;
        let tx = tx_base.as_ptr() as usize;
        if rx % IVC_ALIGN != 0 || tx % IVC_ALIGN != 0 {
            return Err(IvcError::Misaligned);
        }
        if rx < tx.saturating_add(queue_size) && tx < rx.saturating_add(queue_size) {
            return Err(IvcError::Overlap);
        }

        Ok(Self {
            rx: Queue { base: rx_base },
            tx: Queue { base: tx_base },
            rx_pos: 0,
            tx_pos: 0,
            frame_count,
            frame_size,
        })
    }

    /// Number of frames in each direction.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Size of one frame in bytes.
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Our own handshake state.
    pub fn state(&self) -> Option<HandshakeState> {
        HandshakeState::from_raw(self.tx.header().tx_state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: HandshakeState) {
        self.tx.header().tx_state.store(state as u32, Ordering::Release);
    }

    /// Begin the reset handshake.
    ///
    /// Moves this endpoint to `Sync`; data transfer is refused until the peer
    /// acknowledges. The caller is responsible for notifying the peer.
    pub fn reset(&mut self) {
        self.set_state(HandshakeState::Sync);
    }

    /// Advance the reset handshake by one step.
    ///
    /// Returns `true` while this endpoint has not reached `Established`. The
    /// caller should notify the peer after every call so that a missed
    /// notification on the other side cannot stall the handshake.
    pub fn is_peer_unacknowledged(&mut self) -> bool {
        let peer = HandshakeState::from_raw(self.rx.header().tx_state.load(Ordering::Acquire));
        let ours = self.state();

        match (ours, peer) {
            (_, Some(HandshakeState::Sync)) => {
                // Peer restarted; drop whatever we had queued and acknowledge.
                self.clear_counters();
                self.set_state(HandshakeState::Ack);
            }
            (Some(HandshakeState::Sync), Some(HandshakeState::Ack)) => {
                self.clear_counters();
                self.set_state(HandshakeState::Established);
            }
            (Some(HandshakeState::Ack), _) => {
                self.set_state(HandshakeState::Established);
            }
            _ => {}
        }

        self.state() != Some(HandshakeState::Established)
    }

    fn clear_counters(&mut self) {
        self.tx.header().tx_count.store(0, Ordering::Relaxed);
        self.rx.header().rx_count.store(0, Ordering::Relaxed);
        self.tx_pos = 0;
        self.rx_pos = 0;
    }

    fn check_established(&self) -> Result<(), IvcError> {
        if self.state() == Some(HandshakeState::Established) {
            Ok(())
        } else {
            Err(IvcError::NotEstablished)
        }
    }

    /// Frames the peer has produced that we have not consumed yet.
    fn pending_reads(&self) -> u32 {
        let header = self.rx.header();
        let produced = header.tx_count.load(Ordering::Acquire);
        let consumed = header.rx_count.load(Ordering::Relaxed);
        let pending = produced.wrapping_sub(consumed);
        // A corrupt peer counter reads as empty rather than as a huge backlog.
        if pending > self.frame_count { 0 } else { pending }
    }

    /// Frames we have produced that the peer has not consumed yet.
    fn pending_writes(&self) -> u32 {
        let header = self.tx.header();
        let produced = header.tx_count.load(Ordering::Relaxed);
        let consumed = header.rx_count.load(Ordering::Acquire);
        produced.wrapping_sub(consumed)
    }

    /// Whether a frame is waiting to be read.
    pub fn can_read(&self) -> bool {
        self.check_established().is_ok() && self.pending_reads() > 0
    }

    /// Whether a frame can be written without overrunning the peer.
    pub fn can_write(&self) -> bool {
        self.check_established().is_ok() && self.pending_writes() < self.frame_count
    }

    /// Borrow the next frame the peer produced.
    pub fn next_read_frame(&mut self) -> Result<ReadFrame<'_>, IvcError> {
        self.check_established()?;
        if self.pending_reads() == 0 {
            return Err(IvcError::Empty);
        }
        let ptr = self.rx.frame(self.rx_pos, self.frame_size);
        Ok(ReadFrame { ivc: self, ptr })
    }

    /// Borrow the next free frame for writing.
    pub fn next_write_frame(&mut self) -> Result<WriteFrame<'_>, IvcError> {
        self.check_established()?;
        if self.pending_writes() >= self.frame_count {
            return Err(IvcError::Full);
        }
        let ptr = self.tx.frame(self.tx_pos, self.frame_size);
        Ok(WriteFrame { ivc: self, ptr })
    }
}

fn check_bounds(offset: usize, len: usize, frame_size: u32) -> Result<(), IvcError> {
    match offset.checked_add(len) {
        Some(end) if end <= frame_size as usize => Ok(()),
        _ => Err(IvcError::FrameTooLarge {
            size: offset.saturating_add(len),
            frame_size: frame_size as usize,
        }),
    }
}

/// A frame produced by the peer, not yet consumed.
///
/// Dropping it without [`release`](Self::release) leaves the frame at the
/// head of the queue.
pub struct ReadFrame<'a> {
    ivc: &'a mut Ivc,
    ptr: NonNull<u8>,
}

impl ReadFrame<'_> {
    /// Size of the frame in bytes.
    pub fn capacity(&self) -> usize {
        self.ivc.frame_size as usize
    }

    /// Copy `out.len()` bytes starting at `offset` out of the frame.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), IvcError> {
        check_bounds(offset, out.len(), self.ivc.frame_size)?;
        // SAFETY: bounds checked above; the peer does not touch a frame it has
        // published until we release it.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// Hand the frame back to the peer.
    ///
    /// Returns `true` if the queue was full before this release, i.e. the
    /// peer may be waiting for space and should be notified.
    pub fn release(self) -> bool {
        let frame_count = self.ivc.frame_count;
        let header = self.ivc.rx.header();
        let produced = header.tx_count.load(Ordering::Acquire);
        let consumed = header.rx_count.load(Ordering::Relaxed);
        header.rx_count.store(consumed.wrapping_add(1), Ordering::Release);
        self.ivc.rx_pos = (self.ivc.rx_pos + 1) % frame_count;
        produced.wrapping_sub(consumed) == frame_count
    }
}

/// A free frame owned by the producer until committed.
///
/// Dropping it without [`commit`](Self::commit) publishes nothing.
pub struct WriteFrame<'a> {
    ivc: &'a mut Ivc,
    ptr: NonNull<u8>,
}

impl WriteFrame<'_> {
    /// Size of the frame in bytes.
    pub fn capacity(&self) -> usize {
        self.ivc.frame_size as usize
    }

    /// Copy `data` into the frame starting at `offset`.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), IvcError> {
        check_bounds(offset, data.len(), self.ivc.frame_size)?;
        // SAFETY: bounds checked above; the peer does not read a frame before
        // it is committed.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Publish the frame to the peer.
    ///
    /// Returns `true` if the queue was empty before this commit, i.e. the
    /// peer may be idle and should be notified.
    pub fn commit(self) -> bool {
        let frame_count = self.ivc.frame_count;
        let header = self.ivc.tx.header();
        let produced = header.tx_count.load(Ordering::Relaxed);
        let consumed = header.rx_count.load(Ordering::Acquire);
        // Release orders the frame contents before the new count.
        header.tx_count.store(produced.wrapping_add(1), Ordering::Release);
        self.ivc.tx_pos = (self.ivc.tx_pos + 1) % frame_count;
        produced == consumed
    }
}
