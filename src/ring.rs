//! Fixed-capacity byte ring buffer with span based access.
//!
//! Every access is satisfied by at most two contiguous spans, one up to the end of the
//! backing storage and one from its start. Callers obtain a span, copy into or out of it,
//! then advance by no more than the span length.
use std::mem::size_of;

use once_cell::sync::Lazy;

const SAMPLE_BYTES: usize = size_of::<i64>();

/// Circular byte buffer holding a read cursor and the count of unread bytes.
#[derive(Debug, Default)]
pub struct RingBuffer {
    data: Box<[u8]>,
    read_pos: usize,
    unread: usize,
}

impl RingBuffer {
    /// Allocate a zeroed ring of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            unread: 0,
        }
    }

    /// Release the backing storage. The ring behaves as zero capacity afterwards.
    pub fn free(&mut self) {
        *self = Self::default();
    }

    /// Drop all unread data.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.unread = 0;
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes available to read.
    pub fn total_unread(&self) -> usize {
        self.unread
    }

    /// Bytes that can be written before the ring is full.
    pub fn total_free(&self) -> usize {
        self.capacity() - self.unread
    }

    fn write_pos(&self) -> usize {
        let cap = self.capacity();
        if cap == 0 {
            return 0;
        }
        (self.read_pos + self.unread) % cap
    }

    /// Next contiguous readable region. Never crosses the wrap point.
    pub fn read_span(&self) -> &[u8] {
        let len = self.unread.min(self.capacity() - self.read_pos);
        &self.data[self.read_pos..self.read_pos + len]
    }

    /// Next contiguous writable region. Never crosses the wrap point.
    pub fn write_span(&mut self) -> &mut [u8] {
        let start = self.write_pos();
        let len = self.total_free().min(self.capacity() - start);
        &mut self.data[start..start + len]
    }

    /// Consume `n` bytes from the front. Clamped to the current read span; returns bytes consumed.
    pub fn advance_read(&mut self, n: usize) -> usize {
        let span = self.read_span().len();
        debug_assert!(n <= span, "advance_read({n}) beyond span {span}");
        let n = n.min(span);
        if n == 0 {
            return 0;
        }
        self.read_pos = (self.read_pos + n) % self.capacity();
        self.unread -= n;
        n
    }

    /// Commit `n` bytes written into the last write span. Clamped like
    /// [`advance_read`](Self::advance_read).
    pub fn advance_write(&mut self, n: usize) -> usize {
        let cap = self.capacity();
        let span = self.total_free().min(cap - self.write_pos());
        debug_assert!(n <= span, "advance_write({n}) beyond span {span}");
        let n = n.min(span);
        self.unread += n;
        n
    }

    /// Copy as much of `src` as fits, returning bytes written.
    pub fn write_linear(&mut self, src: &[u8]) -> usize {
        let mut written = 0;
        while written < src.len() {
            let span = self.write_span();
            if span.is_empty() {
                break;
            }
            let n = span.len().min(src.len() - written);
            span[..n].copy_from_slice(&src[written..written + n]);
            self.advance_write(n);
            written += n;
        }
        written
    }

    /// Append up to `len` zero bytes, returning bytes written.
    pub fn write_zero(&mut self, len: usize) -> usize {
        let mut written = 0;
        while written < len {
            let span = self.write_span();
            if span.is_empty() {
                break;
            }
            let n = span.len().min(len - written);
            span[..n].fill(0);
            self.advance_write(n);
            written += n;
        }
        written
    }

    /// Move up to `dst.len()` unread bytes out of the ring.
    pub fn read_linear(&mut self, dst: &mut [u8]) -> usize {
        let mut read = 0;
        while read < dst.len() {
            let span = self.read_span();
            if span.is_empty() {
                break;
            }
            let n = span.len().min(dst.len() - read);
            dst[read..read + n].copy_from_slice(&span[..n]);
            self.advance_read(n);
            read += n;
        }
        read
    }

    /// Copy up to `dst.len()` unread bytes without consuming them.
    pub fn peek_linear(&self, dst: &mut [u8]) -> usize {
        let cap = self.capacity();
        let n = dst.len().min(self.unread);
        if n == 0 {
            return 0;
        }
        let first = n.min(cap - self.read_pos);
        dst[..first].copy_from_slice(&self.data[self.read_pos..self.read_pos + first]);
        dst[first..n].copy_from_slice(&self.data[..n - first]);
        n
    }

    /// Drop up to `n` unread bytes without copying.
    pub fn discard(&mut self, n: usize) -> usize {
        let mut dropped = 0;
        while dropped < n {
            let span = self.read_span().len().min(n - dropped);
            if span == 0 {
                break;
            }
            self.advance_read(span);
            dropped += span;
        }
        dropped
    }

    /// Whole canonical samples available to read.
    pub fn unread_samples(&self) -> usize {
        self.unread / SAMPLE_BYTES
    }

    /// Whole canonical samples that fit.
    pub fn free_samples(&self) -> usize {
        self.total_free() / SAMPLE_BYTES
    }

    /// Append whole canonical samples in native byte order. Returns samples written.
    pub fn write_samples(&mut self, src: &[i64]) -> usize {
        let count = src.len().min(self.free_samples());
        for sample in &src[..count] {
            self.write_linear(&sample.to_ne_bytes());
        }
        count
    }

    /// Pop whole canonical samples. Returns samples read.
    pub fn read_samples(&mut self, dst: &mut [i64]) -> usize {
        let count = dst.len().min(self.unread_samples());
        let mut bytes = [0u8; SAMPLE_BYTES];
        for sample in &mut dst[..count] {
            self.read_linear(&mut bytes);
            *sample = i64::from_ne_bytes(bytes);
        }
        count
    }

    /// Copy whole canonical samples from the front without consuming them.
    pub fn peek_samples(&self, dst: &mut [i64]) -> usize {
        let count = dst.len().min(self.unread_samples());
        let cap = self.capacity();
        let mut bytes = [0u8; SAMPLE_BYTES];
        for (index, sample) in dst[..count].iter_mut().enumerate() {
            let base = self.read_pos + index * SAMPLE_BYTES;
            for (offset, byte) in bytes.iter_mut().enumerate() {
                *byte = self.data[(base + offset) % cap];
            }
            *sample = i64::from_ne_bytes(bytes);
        }
        count
    }
}

/// Monotonic timestamp in nanoseconds since the first call in this process.
pub fn monotonic_timestamp_ns() -> u64 {
    static START: Lazy<std::time::Instant> = Lazy::new(std::time::Instant::now);
    let elapsed = START.elapsed();
    (elapsed.as_secs() * 1_000_000_000) + elapsed.subsec_nanos() as u64
}
