//! Byte ring over a shared region.
//!
//! Positions are monotonically increasing logical byte counts; the physical
//! offset is `position % capacity`. Records may straddle the end of the
//! region, in which case they are split into two copies.
//!
//! ```text
//!           read                write
//!            v                    v
//! [ free  | hdr | payload | hdr | payload |  free  ]
//!           \_______ unread = write - read ______/
//! ```
//!
//! Invariant: `read <= write` and `write - read <= capacity`.
//!
//! Both positions live in the region's control block so that every opener
//! sees the same ring. Callers hold the control block's ring lock around
//! any use of a `Ring`.

use std::sync::Arc;

use softbus_proto::BusMessageHeader;

use crate::region::{Control, SharedRegion};

pub(crate) struct Ring {
    region: Box<dyn SharedRegion>,
    control: Arc<Control>,
}

impl Ring {
    pub(crate) fn new(region: Box<dyn SharedRegion>) -> Self {
        let control = region.control();
        Self { region, control }
    }

    fn read(&self) -> u64 {
        self.control.read_position()
    }

    fn write(&self) -> u64 {
        self.control.write_position()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.region.len()
    }

    pub(crate) fn unread(&self) -> usize {
        let (read, write) = (self.read(), self.write());
        debug_assert!(write >= read);
        usize::try_from(write.saturating_sub(read)).unwrap_or(usize::MAX)
    }

    pub(crate) fn free(&self) -> usize {
        self.capacity() - self.unread()
    }

    /// Physical offset the next record will be written at.
    pub(crate) fn write_offset(&self) -> usize {
        self.physical(self.write())
    }

    pub(crate) fn read_offset(&self) -> usize {
        self.physical(self.read())
    }

    /// Append a record. Caller has checked `free() >= SIZE + payload.len()`.
    pub(crate) fn push(&mut self, header: &BusMessageHeader, payload: &[u8]) {
        debug_assert!(self.free() >= BusMessageHeader::SIZE + payload.len());

        let write = self.write();
        self.copy_in(write, &header.to_bytes());
        self.copy_in(write + BusMessageHeader::SIZE as u64, payload);
        self.control.set_write_position(write + (BusMessageHeader::SIZE + payload.len()) as u64);

        debug_assert!(self.unread() <= self.capacity());
    }

    /// Copy out the header at the read position without consuming it.
    /// Caller has checked `unread() >= SIZE`.
    pub(crate) fn peek_header(&self) -> [u8; BusMessageHeader::SIZE] {
        let mut raw = [0u8; BusMessageHeader::SIZE];
        self.copy_out(self.read(), &mut raw);
        raw
    }

    /// Consume the header and `len` payload bytes, returning the payload.
    /// Caller has checked `unread() >= SIZE + len`.
    pub(crate) fn pop(&mut self, len: usize) -> Vec<u8> {
        let mut payload = vec![0u8; len];
        self.copy_out(self.read() + BusMessageHeader::SIZE as u64, &mut payload);
        self.advance(BusMessageHeader::SIZE + len);
        payload
    }

    /// Move the read position forward without copying.
    pub(crate) fn advance(&mut self, len: usize) {
        let len = len.min(self.unread());
        self.control.set_read_position(self.read() + len as u64);
    }

    fn physical(&self, position: u64) -> usize {
        (position % self.capacity() as u64) as usize
    }

    fn copy_in(&mut self, position: u64, src: &[u8]) {
        let start = self.physical(position);
        let capacity = self.capacity();
        let first = src.len().min(capacity - start);
        let bytes = self.region.as_mut_slice();
        bytes[start..start + first].copy_from_slice(&src[..first]);
        bytes[..src.len() - first].copy_from_slice(&src[first..]);
    }

    fn copy_out(&self, position: u64, dst: &mut [u8]) {
        let start = self.physical(position);
        let first = dst.len().min(self.capacity() - start);
        let bytes = self.region.as_slice();
        let len = dst.len();
        dst[..first].copy_from_slice(&bytes[start..start + first]);
        dst[first..].copy_from_slice(&bytes[..len - first]);
    }

    #[cfg(test)]
    pub(crate) fn region_mut(&mut self) -> &mut [u8] {
        self.region.as_mut_slice()
    }
}
