//! Fixed-capacity byte ring used to accumulate partial network reads
//!
//! The ring keeps independent read and write cursors over one backing
//! allocation. A connection's receive loop writes into the free region
//! (either by copying with [`ByteRing::write`] or by receiving straight into
//! [`ByteRing::writable_slice`] and then calling [`ByteRing::skip_write`]),
//! and the codec scans it with [`ByteRing::peek_byte`] before committing to
//! a [`ByteRing::read`].
//!
//! Requests larger than what is currently free or available are contract
//! violations and fail without touching the cursors.

use crate::error::RingError;

pub struct ByteRing {
    buf: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes written but not yet read
    pub fn available(&self) -> usize {
        self.len
    }

    pub fn free_capacity(&self) -> usize {
        self.capacity() - self.len
    }

    /// Contiguous free bytes starting at the write cursor
    pub fn forward_capacity(&self) -> usize {
        if self.len == self.capacity() {
            0
        } else if self.write_pos >= self.read_pos {
            self.capacity() - self.write_pos
        } else {
            self.read_pos - self.write_pos
        }
    }

    /// Exposes the contiguous free region for zero-copy receive.
    ///
    /// Bytes placed here only become readable after [`ByteRing::skip_write`].
    pub fn writable_slice(&mut self) -> &mut [u8] {
        let end = self.write_pos + self.forward_capacity();
        &mut self.buf[self.write_pos..end]
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), RingError> {
        self.check_free(data.len())?;

        let mut copied = 0;
        while copied < data.len() {
            let chunk = (data.len() - copied).min(self.capacity() - self.write_pos);
            self.buf[self.write_pos..self.write_pos + chunk]
                .copy_from_slice(&data[copied..copied + chunk]);
            self.advance_write(chunk);
            copied += chunk;
        }
        Ok(())
    }

    /// Fills `out` from the read cursor and consumes those bytes
    pub fn read(&mut self, out: &mut [u8]) -> Result<(), RingError> {
        self.check_available(out.len())?;

        let mut copied = 0;
        while copied < out.len() {
            let chunk = (out.len() - copied).min(self.capacity() - self.read_pos);
            out[copied..copied + chunk]
                .copy_from_slice(&self.buf[self.read_pos..self.read_pos + chunk]);
            self.advance_read(chunk);
            copied += chunk;
        }
        Ok(())
    }

    pub fn read_vec(&mut self, count: usize) -> Result<Vec<u8>, RingError> {
        let mut out = vec![0u8; count];
        self.read(&mut out)?;
        Ok(out)
    }

    /// Byte `offset` positions past the read cursor, without consuming it
    pub fn peek_byte(&self, offset: usize) -> Result<u8, RingError> {
        if offset >= self.len {
            return Err(RingError::InsufficientData {
                requested: offset + 1,
                available: self.len,
            });
        }
        Ok(self.buf[(self.read_pos + offset) % self.capacity()])
    }

    /// Marks `count` bytes as written after they were placed through
    /// [`ByteRing::writable_slice`]
    pub fn skip_write(&mut self, count: usize) -> Result<(), RingError> {
        self.check_free(count)?;
        self.advance_write(count);
        Ok(())
    }

    pub fn skip_read(&mut self, count: usize) -> Result<(), RingError> {
        self.check_available(count)?;
        self.advance_read(count);
        Ok(())
    }

    fn check_free(&self, requested: usize) -> Result<(), RingError> {
        if requested > self.free_capacity() {
            return Err(RingError::CapacityExceeded {
                requested,
                free: self.free_capacity(),
            });
        }
        Ok(())
    }

    fn check_available(&self, requested: usize) -> Result<(), RingError> {
        if requested > self.len {
            return Err(RingError::InsufficientData {
                requested,
                available: self.len,
            });
        }
        Ok(())
    }

    fn advance_write(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.write_pos = (self.write_pos + count) % self.capacity();
        self.len += count;
    }

    fn advance_read(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.read_pos = (self.read_pos + count) % self.capacity();
        self.len -= count;
    }
}
