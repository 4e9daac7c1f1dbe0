//! Shared memory region carved into per-channel queue pairs.
//!
//! The region is one physically contiguous block visible to both the host and
//! the engine. Channels take space from it front to back; nothing is ever
//! returned; the whole region is reclaimed only when it is dropped.

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use core::ptr::NonNull;

use log::debug;

use crate::descriptor::QueueGeometry;
use crate::error::{IpcError, Result};

/// Alignment and granularity of owned regions.
pub const PAGE_SIZE: usize = 4096;

enum Backing {
    /// Allocated by us, freed on drop.
    Owned(Layout),
    /// Provided by the platform, e.g. a firmware carve-out.
    Carveout,
}

/// Offsets of one channel's queues inside the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Carve {
    pub rx_offset: u32,
    pub tx_offset: u32,
    /// Size of each of the two queues.
    pub ring_bytes: u32,
}

/// Memory shared with the engine.
pub struct SharedRegion {
    base: NonNull<u8>,
    /// Address of `base` as seen by the engine.
    iova: u64,
    size: u32,
    /// Next free byte. Only grows.
    cursor: u32,
    backing: Backing,
}

// SAFETY: the region is plain memory; concurrent access to the carved queues is
// mediated by the channels that own them.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Allocate a zeroed, page-aligned region of `size` bytes.
    ///
    /// The engine is assumed to share the host's physical view of memory, so
    /// the device address is the host address.
    pub fn allocate(size: u32) -> Result<Self> {
        if size == 0 {
            return Err(IpcError::AllocationFailed);
        }
        let layout =
            Layout::from_size_align(size as usize, PAGE_SIZE).map_err(|_| IpcError::AllocationFailed)?;
        // SAFETY: the layout has a non-zero size.
        let base = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(IpcError::AllocationFailed)?;
        Ok(Self {
            base,
            iova: base.as_ptr() as u64,
            size,
            cursor: 0,
            backing: Backing::Owned(layout),
        })
    }

    /// Wrap memory provided by the platform.
    ///
    /// # Safety
    ///
    /// `base` must point to `size` bytes that are mapped for the lifetime of the
    /// region, are visible to the engine at `iova`, are 64-byte aligned and
    /// zeroed or otherwise in a state the engine expects.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, iova: u64, size: u32) -> Self {
        debug_assert!(base.as_ptr() as usize % ivc::IVC_ALIGN == 0);
        Self {
            base,
            iova,
            size,
            cursor: 0,
            backing: Backing::Carveout,
        }
    }

    /// Engine-visible base address and size.
    pub fn device_address(&self) -> (u64, u32) {
        (self.iova, self.size)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Bytes not yet handed to any channel.
    pub fn remaining(&self) -> usize {
        (self.size - self.cursor) as usize
    }

    /// Reserve a receive and a transmit queue for `geometry`, back to back.
    pub fn carve(&mut self, geometry: &QueueGeometry) -> Result<Carve> {
        if geometry.is_empty() {
            return Err(IpcError::InvalidGeometry);
        }
        let ring_bytes = geometry.ring_bytes();
        let requested = ring_bytes.checked_mul(2).ok_or(IpcError::InvalidGeometry)?;
        let available = self.remaining();
        if requested > available {
            return Err(IpcError::RegionExhausted { requested, available });
        }

        // Both fit in `size`, so neither truncates.
        let ring_bytes = ring_bytes as u32;
        let carve = Carve {
            rx_offset: self.cursor,
            tx_offset: self.cursor + ring_bytes,
            ring_bytes,
        };
        self.cursor += 2 * ring_bytes;
        debug_assert!(self.cursor <= self.size);

        debug!(
            "region: carved {:#x}+{:#x} and {:#x}+{:#x}, {} bytes left",
            carve.rx_offset,
            ring_bytes,
            carve.tx_offset,
            ring_bytes,
            self.remaining()
        );
        Ok(carve)
    }

    /// Engine-visible address of `offset`.
    pub fn device_addr(&self, offset: u32) -> u64 {
        self.iova + u64::from(offset)
    }

    /// Host pointer to `offset`, if it lies inside the region.
    pub fn host_ptr(&self, offset: u32) -> Option<NonNull<u8>> {
        if offset >= self.size {
            return None;
        }
        // SAFETY: `offset` is inside the mapped region.
        Some(unsafe { self.base.add(offset as usize) })
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Backing::Owned(layout) = self.backing {
            // SAFETY: allocated in `allocate` with this layout.
            unsafe { dealloc(self.base.as_ptr(), layout) };
        }
    }
}
