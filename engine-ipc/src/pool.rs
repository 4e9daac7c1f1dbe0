//! Pre-allocated message buffers for the clients sharing the admin channel.
//!
//! Each client gets a handful of request/reply buffer pairs up front so the
//! request path never allocates. A slot is in use while its lock is held; the
//! [`ClientBuffer`] handle owns that lock and gives the slot back on drop.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use engine_abi::ClientId;
use log::trace;
use spinning_top::Spinlock;
use spinning_top::guard::SpinlockGuard;

use crate::error::{IpcError, Result};

/// One request/reply buffer pair.
pub struct MessageBuffer {
    tx: Box<[u8]>,
    rx: Box<[u8]>,
}

impl MessageBuffer {
    fn new(size: usize) -> Self {
        Self {
            tx: vec![0u8; size].into_boxed_slice(),
            rx: vec![0u8; size].into_boxed_slice(),
        }
    }
}

/// Buffers owned by one client.
pub struct ClientPool {
    client: ClientId,
    buffer_size: usize,
    slots: Box<[Spinlock<MessageBuffer>]>,
}

impl ClientPool {
    pub fn new(client: ClientId, slots: usize, buffer_size: usize) -> Self {
        let slots: Vec<_> = (0..slots)
            .map(|_| Spinlock::new(MessageBuffer::new(buffer_size)))
            .collect();
        Self {
            client,
            buffer_size,
            slots: slots.into_boxed_slice(),
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first free slot, or fail with `Busy` without blocking.
    pub fn acquire(&self) -> Result<ClientBuffer<'_>> {
        for (slot, buffer) in self.slots.iter().enumerate() {
            if let Some(buffer) = buffer.try_lock() {
                trace!("pool: {:?} took slot {}", self.client, slot);
                return Ok(ClientBuffer {
                    client: self.client,
                    slot,
                    buffer,
                });
            }
        }
        Err(IpcError::Busy(self.client))
    }

    /// Number of slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_locked()).count()
    }
}

/// A claimed buffer pair. Dropping it returns the slot to the pool.
pub struct ClientBuffer<'a> {
    client: ClientId,
    slot: usize,
    buffer: SpinlockGuard<'a, MessageBuffer>,
}

impl ClientBuffer<'_> {
    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn tx(&self) -> &[u8] {
        &self.buffer.tx
    }

    pub fn tx_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.tx
    }

    pub fn rx(&self) -> &[u8] {
        &self.buffer.rx
    }

    pub fn rx_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.rx
    }

    /// Request buffer for reading and reply buffer for writing, at once.
    pub fn split_mut(&mut self) -> (&[u8], &mut [u8]) {
        let buffer = &mut *self.buffer;
        (&buffer.tx[..], &mut buffer.rx[..])
    }

    /// Give the slot back.
    pub fn release(self) {
        trace!("pool: {:?} released slot {}", self.client, self.slot);
    }
}

/// One pool per admin client.
pub struct ClientPools {
    pools: [ClientPool; ClientId::COUNT],
}

impl ClientPools {
    pub fn new(slots: usize, buffer_size: usize) -> Self {
        Self {
            pools: core::array::from_fn(|i| ClientPool::new(ClientId::ALL[i], slots, buffer_size)),
        }
    }

    pub fn get(&self, client: ClientId) -> &ClientPool {
        &self.pools[client.index()]
    }

    pub fn acquire(&self, client: ClientId) -> Result<ClientBuffer<'_>> {
        self.get(client).acquire()
    }
}
