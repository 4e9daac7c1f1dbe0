//! Header prefixed to frames on channels that carry variable-length messages.
//!
//! ```text
//! +-------------+---------------+-------------------+
//! | length(u32) | reserved(u32) | payload[length]   |
//! +-------------+---------------+-------------------+
//! ```
//!
//! Both processors are little-endian, so the header is stored in native order.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MessageHeader {
    /// Payload bytes following the header.
    pub length: u32,
    /// Must be zero.
    pub reserved: u32,
}

impl MessageHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub const fn new(length: u32) -> Self {
        Self { length, reserved: 0 }
    }

    /// Read a header from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes).ok().map(|(header, _)| header)
    }
}
