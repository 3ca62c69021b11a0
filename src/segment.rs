//! Packed sorted segments.
//!
//! A segment stores its records in two regions: a dense array of
//! fixed-size descriptors ([`KvMeta`]) and one contiguous byte buffer
//! holding every key and value back to back. The packed layout keeps
//! allocator traffic to one buffer per segment and makes a frozen segment
//! trivially shareable across threads behind an `Arc`.
//!
//! Segments have a two-phase lifecycle: a [`SegmentBuilder`] accepts
//! appends in arbitrary order while a batch is being assembled, and
//! [`SegmentBuilder::freeze`] sorts the descriptors by key and produces an
//! immutable [`Segment`]. Only `freeze` can construct a `Segment`, so a
//! published segment is sorted by construction.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// The kind of mutation a record carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    /// Upsert key to value.
    Set,
    /// Tombstone for key.
    Del,
    /// Append a merge operand for key, resolved by the merge operator.
    Merge,
}

/// Descriptor for one record: the operation tag plus offset/length pairs
/// into the segment buffer. Offsets are u32, capping a single segment's
/// buffer at 4 GiB.
#[derive(Clone, Copy, Debug)]
struct KvMeta {
    op: Operation,
    key_pos: u32,
    key_len: u32,
    val_pos: u32,
    val_len: u32,
}

impl KvMeta {
    fn key_range(&self) -> std::ops::Range<usize> {
        let pos = self.key_pos as usize;
        pos..pos + self.key_len as usize
    }

    fn val_range(&self) -> std::ops::Range<usize> {
        let pos = self.val_pos as usize;
        pos..pos + self.val_len as usize
    }
}

/// An immutable, key-sorted array of records.
///
/// Duplicate keys within one segment are forbidden by the writer contract:
/// a batch must not repeat a key.
#[derive(Debug)]
pub(crate) struct Segment {
    kvs: Vec<KvMeta>,
    buf: Bytes,
}

impl Segment {
    pub(crate) fn len(&self) -> usize {
        self.kvs.len()
    }

    /// Total bytes held by the key/value buffer, used to presize merge
    /// output buffers.
    pub(crate) fn buf_len(&self) -> usize {
        self.buf.len()
    }

    /// Returns the record at index `i` as `(op, key, val)`.
    pub(crate) fn kv(&self, i: usize) -> (Operation, &[u8], &[u8]) {
        let meta = &self.kvs[i];
        (meta.op, &self.buf[meta.key_range()], &self.buf[meta.val_range()])
    }

    pub(crate) fn op(&self, i: usize) -> Operation {
        self.kvs[i].op
    }

    pub(crate) fn key(&self, i: usize) -> &[u8] {
        &self.buf[self.kvs[i].key_range()]
    }

    /// Returns the value at index `i` as a zero-copy slice of the segment
    /// buffer.
    pub(crate) fn val_bytes(&self, i: usize) -> Bytes {
        self.buf.slice(self.kvs[i].val_range())
    }

    /// Returns the key at index `i` as a zero-copy slice of the segment
    /// buffer.
    pub(crate) fn key_bytes(&self, i: usize) -> Bytes {
        self.buf.slice(self.kvs[i].key_range())
    }

    /// Returns the smallest index whose key is >= `key`, or `len()` if
    /// none. The empty key is the minimum, so it always maps to index 0.
    pub(crate) fn find_start(&self, key: &[u8]) -> usize {
        self.kvs
            .partition_point(|meta| &self.buf[meta.key_range()] < key)
    }

    /// Binary search for an exact key.
    pub(crate) fn find_exact(&self, key: &[u8]) -> Option<usize> {
        let i = self.find_start(key);
        if i < self.len() && self.key(i) == key {
            Some(i)
        } else {
            None
        }
    }
}

/// A segment under construction: appends preserve insertion order and copy
/// key/value bytes into the shared buffer. `freeze` sorts and seals it.
#[derive(Debug)]
pub(crate) struct SegmentBuilder {
    kvs: Vec<KvMeta>,
    buf: BytesMut,
    /// Byte budget for the zero-copy alloc family; the budget is the byte
    /// hint given at construction. Plain appends may grow past it.
    alloc_budget: usize,
}

impl SegmentBuilder {
    /// Creates a builder presized for `total_ops` records and `total_bytes`
    /// of key/value data. Zero hints mean "unknown".
    pub(crate) fn with_capacity(total_ops: usize, total_bytes: usize) -> Self {
        Self {
            kvs: Vec::with_capacity(total_ops),
            buf: BytesMut::with_capacity(total_bytes),
            alloc_budget: total_bytes,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.kvs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.kvs.is_empty()
    }

    /// Appends a record, copying `key` and `val` into the buffer.
    pub(crate) fn push(&mut self, op: Operation, key: &[u8], val: &[u8]) {
        let key_pos = self.buf.len() as u32;
        self.buf.extend_from_slice(key);
        let val_pos = self.buf.len() as u32;
        self.buf.extend_from_slice(val);
        self.kvs.push(KvMeta {
            op,
            key_pos,
            key_len: key.len() as u32,
            val_pos,
            val_len: val.len() as u32,
        });
    }

    /// Appends a record with zeroed key/value regions of the given lengths
    /// and returns mutable windows over them for the caller to fill. Draws
    /// from the byte budget declared at construction; exceeding it fails
    /// with [`Error::AllocTooLarge`].
    pub(crate) fn push_uninit(
        &mut self,
        op: Operation,
        key_len: usize,
        val_len: usize,
    ) -> Result<(&mut [u8], &mut [u8])> {
        if self.buf.len() + key_len + val_len > self.alloc_budget {
            return Err(Error::AllocTooLarge);
        }
        let key_pos = self.buf.len();
        self.buf.resize(key_pos + key_len + val_len, 0);
        self.kvs.push(KvMeta {
            op,
            key_pos: key_pos as u32,
            key_len: key_len as u32,
            val_pos: (key_pos + key_len) as u32,
            val_len: val_len as u32,
        });
        let (key, val) = self.buf[key_pos..].split_at_mut(key_len);
        Ok((key, val))
    }

    /// Returns the record at index `i` in insertion order.
    pub(crate) fn kv(&self, i: usize) -> (Operation, &[u8], &[u8]) {
        let meta = &self.kvs[i];
        (meta.op, &self.buf[meta.key_range()], &self.buf[meta.val_range()])
    }

    /// Sorts the descriptors by key (stable, ascending) and seals the
    /// segment. The buffer itself is not rewritten; only the index moves.
    pub(crate) fn freeze(self) -> Segment {
        let mut kvs = self.kvs;
        let buf = self.buf.freeze();
        kvs.sort_by(|a, b| buf[a.key_range()].cmp(&buf[b.key_range()]));
        Segment { kvs, buf }
    }
}
