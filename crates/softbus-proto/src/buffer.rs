//! Owned byte buffer handed between components.

use bytes::{Bytes, BytesMut};

/// Opaque payload buffer with size and read/write access.
///
/// Components never assume where the bytes came from; they only read,
/// overwrite in place, or copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBuffer {
    data: BytesMut,
}

impl DataBuffer {
    /// Zero-filled buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self { data: BytesMut::zeroed(size) }
    }

    /// Buffer holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { data: BytesMut::from(bytes) }
    }

    /// Length in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// True if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Write access.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Convert into immutable shared bytes.
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }
}

impl From<Vec<u8>> for DataBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self { data: BytesMut::from(&v[..]) }
    }
}

impl From<BytesMut> for DataBuffer {
    fn from(data: BytesMut) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for DataBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from_slice(bytes)
    }
}

impl AsRef<[u8]> for DataBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_zeroed() {
        let buf = DataBuffer::new(8);
        assert_eq!(buf.size(), 8);
        assert!(buf.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn write_through_data_mut() {
        let mut buf = DataBuffer::from_slice(b"abcd");
        buf.data_mut()[0] = b'X';
        assert_eq!(buf.data(), b"Xbcd");
        assert_eq!(&buf.freeze()[..], b"Xbcd");
    }
}
