//! `Data`: a chunked, reference-counted byte buffer.
//!
//! A `Data` is conceptually a deque of shared, immutable [`Bytes`] segments.
//! Splitting (`shift`) and appending (`push`) never copy an existing
//! segment's backing storage; they only move or slice `Bytes` handles, which
//! is a refcount bump. A copy only happens when the caller asks for a
//! contiguous view that spans more than one segment (`Reader::read` into a
//! plain `&mut [u8]`).
//!
//! Every `Data` is produced by exactly one [`Producer`] (thread affinity is
//! a property the caller upholds; nothing here is `Send`-restricted because
//! `Bytes` itself is freely shareable, but the pipeline runtime never moves
//! a `Data` across worker threads).

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

use crate::config::CHUNK_SIZE;

/// A chunked, reference-counted byte buffer.
#[derive(Debug, Default, Clone)]
pub struct Data {
    segs: VecDeque<Bytes>,
    len: usize,
}

impl Data {
    /// An empty `Data`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segs: VecDeque::new(),
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all segments.
    pub fn clear(&mut self) {
        self.segs.clear();
        self.len = 0;
    }

    /// Append one already-framed segment. Zero-copy: only a refcount bump.
    pub fn push_bytes(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segs.push_back(bytes);
    }

    /// Append raw bytes, copying them into a fresh segment.
    pub fn push_slice(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.push_bytes(Bytes::copy_from_slice(bytes));
    }

    /// Append `src`'s segments to this `Data`'s tail, transferring
    /// ownership. `src` becomes empty. Zero-copy.
    pub fn push(&mut self, mut src: Data) {
        self.len += src.len;
        self.segs.append(&mut src.segs);
        src.len = 0;
    }

    /// Remove and return the first `min(n, size())` bytes as a new `Data`.
    /// The remainder stays in `self`. Zero-copy: no segment's backing
    /// storage is duplicated, only sliced.
    #[must_use]
    pub fn shift(&mut self, n: usize) -> Data {
        let n = n.min(self.len);
        let mut out = Data::new();
        let mut remaining = n;

        while remaining > 0 {
            let Some(mut front) = self.segs.pop_front() else {
                break;
            };
            if front.len() <= remaining {
                remaining -= front.len();
                self.len -= front.len();
                out.push_bytes(front);
            } else {
                let tail = front.split_off(remaining);
                self.len -= remaining;
                out.push_bytes(front);
                self.segs.push_front(tail);
                remaining = 0;
            }
        }

        out
    }

    /// Remove the last `n` bytes (or all bytes, if `n >= size()`).
    pub fn pop(&mut self, n: usize) {
        let mut remaining = n.min(self.len);
        self.len -= remaining;
        while remaining > 0 {
            let Some(back) = self.segs.pop_back() else {
                break;
            };
            if back.len() <= remaining {
                remaining -= back.len();
            } else {
                let keep = back.len() - remaining;
                let mut kept = back;
                kept.truncate(keep);
                self.segs.push_back(kept);
                remaining = 0;
            }
        }
    }

    /// Copy the whole buffer into one contiguous `Vec<u8>`. Used by tests
    /// and by encoders finalizing a scratch buffer into wire bytes.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for seg in &self.segs {
            out.extend_from_slice(seg);
        }
        out
    }

    #[must_use]
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(self)
    }
}

impl From<&[u8]> for Data {
    fn from(bytes: &[u8]) -> Self {
        let mut d = Data::new();
        d.push_slice(bytes);
        d
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Self {
        let mut d = Data::new();
        d.push_bytes(Bytes::from(bytes));
        d
    }
}

/// Sequential reader over a `Data`'s segments. Does not consume the
/// underlying `Data` (unlike `shift`); it tracks its own cursor.
pub struct Reader<'a> {
    segs: &'a VecDeque<Bytes>,
    seg_idx: usize,
    seg_off: usize,
    remaining: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a Data) -> Self {
        Self {
            segs: &data.segs,
            seg_idx: 0,
            seg_off: 0,
            remaining: data.len,
        }
    }

    #[must_use]
    pub const fn eof(&self) -> bool {
        self.remaining == 0
    }

    /// Read the next byte, or `-1` on EOF.
    pub fn get(&mut self) -> i32 {
        let mut buf = [0u8; 1];
        if self.read(1, &mut buf[..]) == 1 {
            i32::from(buf[0])
        } else {
            -1
        }
    }

    /// Copy up to `n` bytes into `dst`, returning the actual count copied
    /// (short on EOF, never an error).
    pub fn read(&mut self, n: usize, dst: &mut [u8]) -> usize {
        let want = n.min(dst.len()).min(self.remaining);
        let mut copied = 0;
        while copied < want {
            let Some(seg) = self.segs.get(self.seg_idx) else {
                break;
            };
            let avail = seg.len() - self.seg_off;
            if avail == 0 {
                self.seg_idx += 1;
                self.seg_off = 0;
                continue;
            }
            let take = (want - copied).min(avail);
            dst[copied..copied + take]
                .copy_from_slice(&seg[self.seg_off..self.seg_off + take]);
            copied += take;
            self.seg_off += take;
            if self.seg_off == seg.len() {
                self.seg_idx += 1;
                self.seg_off = 0;
            }
        }
        self.remaining -= copied;
        copied
    }

    /// Read exactly `n` bytes into a new `Data`, zero-copy where a run of
    /// whole segments is consumed. Returns the number of bytes actually
    /// captured (short on EOF).
    pub fn read_data(&mut self, n: usize, out: &mut Data) -> usize {
        let want = n.min(self.remaining);
        let mut copied = 0;
        while copied < want {
            let Some(seg) = self.segs.get(self.seg_idx) else {
                break;
            };
            let avail = seg.len() - self.seg_off;
            if avail == 0 {
                self.seg_idx += 1;
                self.seg_off = 0;
                continue;
            }
            let take = (want - copied).min(avail);
            out.push_bytes(seg.slice(self.seg_off..self.seg_off + take));
            copied += take;
            self.seg_off += take;
            if self.seg_off == seg.len() {
                self.seg_idx += 1;
                self.seg_off = 0;
            }
        }
        self.remaining -= copied;
        copied
    }
}

/// Per-thread allocator owning the staging chunk a [`Builder`] fills before
/// handing it off to a target `Data`. Every `Data` produced by pushes that
/// flow through a `Builder` is associated with exactly one `Producer` (the
/// thread-affinity property `Data` itself assumes but does not enforce).
pub struct Producer {
    name: &'static str,
    staging: BytesMut,
}

impl Producer {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            staging: BytesMut::with_capacity(CHUNK_SIZE),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Batches small pushes into the owning `Producer`'s staging chunk, flushed
/// into the target `Data` when full or on explicit `flush()`. All writes
/// are append-only.
pub struct Builder<'a> {
    target: &'a mut Data,
    producer: &'a mut Producer,
}

impl<'a> Builder<'a> {
    pub fn new(target: &'a mut Data, producer: &'a mut Producer) -> Self {
        Self { target, producer }
    }

    /// Append one byte to the staging buffer, flushing it first if full.
    pub fn push(&mut self, byte: u8) {
        if self.producer.staging.len() >= CHUNK_SIZE {
            self.flush();
        }
        self.producer.staging.extend_from_slice(&[byte]);
    }

    /// Append raw bytes to the staging buffer.
    pub fn push_slice(&mut self, bytes: &[u8]) {
        if self.producer.staging.len() + bytes.len() > CHUNK_SIZE && !self.producer.staging.is_empty() {
            self.flush();
        }
        if bytes.len() >= CHUNK_SIZE {
            self.flush();
            self.target.push_slice(bytes);
            return;
        }
        self.producer.staging.extend_from_slice(bytes);
    }

    /// Append another `Data`'s segments directly, bypassing staging.
    pub fn push_data(&mut self, data: Data) {
        self.flush();
        self.target.push(data);
    }

    /// Flush any staged bytes into the target `Data`.
    pub fn flush(&mut self) {
        if !self.producer.staging.is_empty() {
            let bytes = std::mem::replace(&mut self.producer.staging, BytesMut::with_capacity(CHUNK_SIZE));
            self.target.push_bytes(bytes.freeze());
        }
    }
}

impl Drop for Builder<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
