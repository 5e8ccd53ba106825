//! Growable byte FIFO used for read/write staging buffers (§4.2), following
//! the shape of the teacher's `neutronium::net::buffer::Buffer`.

use slice_deque::SliceDeque;
use std::io;

/// A FIFO byte queue: bytes are appended at the tail and consumed from the head.
pub struct Buffer {
    data: SliceDeque<u8>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            data: SliceDeque::new(),
        }
    }

    pub fn with_capacity(cap: usize) -> Buffer {
        let mut data = SliceDeque::new();
        data.reserve(cap);
        Buffer { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Drop `count` bytes from the head (already-written or already-consumed data).
    pub fn consume(&mut self, count: usize) {
        unsafe { self.data.move_head(count as isize) };
    }

    /// Write as much of the buffer as possible to `writer` without blocking,
    /// removing written bytes from the head. Returns the number of bytes written.
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let mut written = 0;
        while !self.data.is_empty() {
            match writer.write(self.data.as_slice()) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.consume(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_and_consume_round_trip() {
        let mut buf = Buffer::new();
        buf.extend(&[1, 2, 3, 4]);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        buf.consume(2);
        assert_eq!(buf.as_slice(), &[3, 4]);
    }

    #[test]
    fn egress_drains_into_writer() {
        let mut buf = Buffer::new();
        buf.extend(&[9, 8, 7]);
        let mut out = Vec::new();
        let written = buf.egress(&mut out).unwrap();
        assert_eq!(written, 3);
        assert_eq!(out, vec![9, 8, 7]);
        assert!(buf.is_empty());
    }
}
