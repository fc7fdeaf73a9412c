//! A growable byte region with `offset`/`size` cursors, the basic unit
//! exchanged between endpoints and user code.

/// A dynamically sized byte buffer. Data is appended at the end and consumed
/// from the front by advancing the offset cursor; `compact` reclaims the
/// consumed prefix.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    size: usize,
    offset: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: vec![0; capacity],
            size: 0,
            offset: 0,
        }
    }

    /// The number of valid bytes in the buffer.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The allocated capacity of the underlying storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The read cursor: how many valid bytes have been consumed.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns true when no unconsumed bytes remain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offset == self.size
    }

    /// The unconsumed bytes, from the offset cursor to the end of valid data.
    #[inline]
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.offset..self.size]
    }

    /// All valid bytes regardless of the offset cursor.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Advance the offset cursor by `count` consumed bytes.
    #[inline]
    pub fn shift(&mut self, count: usize) {
        debug_assert!(self.offset + count <= self.size);
        self.offset += count;
    }

    /// Forget all contents. Capacity is retained.
    #[inline]
    pub fn clear(&mut self) {
        self.size = 0;
        self.offset = 0;
    }

    /// Ensure at least `additional` writable bytes beyond the current size,
    /// growing geometrically to amortize reallocation.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.size + additional;
        if required > self.data.len() {
            let grown = (self.data.len() * 2).max(required);
            self.data.resize(grown, 0);
        }
    }

    /// Append bytes at the end of the valid region.
    pub fn append(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data[self.size..self.size + bytes.len()].copy_from_slice(bytes);
        self.size += bytes.len();
    }

    /// Drop the consumed prefix, moving the unconsumed bytes to the front.
    pub fn compact(&mut self) {
        if self.offset == 0 {
            return;
        }
        self.data.copy_within(self.offset..self.size, 0);
        self.size -= self.offset;
        self.offset = 0;
    }

    /// A writable slice of `len` bytes starting at the end of the valid
    /// region. Call [`commit`](Buffer::commit) with the number of bytes
    /// actually written.
    pub fn write_slice(&mut self, len: usize) -> &mut [u8] {
        self.reserve(len);
        &mut self.data[self.size..self.size + len]
    }

    /// Mark `count` bytes of the last `write_slice` as valid data.
    #[inline]
    pub fn commit(&mut self, count: usize) {
        debug_assert!(self.size + count <= self.data.len());
        self.size += count;
    }
}

impl std::ops::Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_consume() {
        let mut buffer = Buffer::new();
        buffer.append(b"hello ");
        buffer.append(b"world");

        assert_eq!(buffer.size(), 11);
        assert_eq!(buffer.remaining(), b"hello world");

        buffer.shift(6);
        assert_eq!(buffer.offset(), 6);
        assert_eq!(buffer.remaining(), b"world");
        assert!(!buffer.is_empty());

        buffer.shift(5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn compact_moves_tail_to_front() {
        let mut buffer = Buffer::new();
        buffer.append(b"abcdef");
        buffer.shift(4);
        buffer.compact();

        assert_eq!(buffer.offset(), 0);
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.remaining(), b"ef");
    }

    #[test]
    fn reserve_grows_geometrically() {
        let mut buffer = Buffer::with_capacity(8);
        assert_eq!(buffer.capacity(), 8);
        buffer.append(&[0u8; 9]);
        assert!(buffer.capacity() >= 16);
        assert_eq!(buffer.size(), 9);
    }

    #[test]
    fn write_slice_commit_roundtrip() {
        let mut buffer = Buffer::new();
        let slice = buffer.write_slice(4);
        slice[..3].copy_from_slice(b"xyz");
        buffer.commit(3);

        assert_eq!(buffer.remaining(), b"xyz");
    }

    #[test]
    fn clear_retains_capacity() {
        let mut buffer = Buffer::with_capacity(64);
        buffer.append(b"data");
        buffer.shift(2);
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.offset(), 0);
        assert_eq!(buffer.capacity(), 64);
    }
}
