//! Atomic units of mutation.
//!
//! A [`Batch`] is a segment under construction: `set`/`del`/`merge` copy
//! key and value bytes into the batch's buffer in call order, and
//! `Collection::execute_batch` sorts the records and publishes the frozen
//! segment atomically. A batch is single-owner; `execute_batch` consumes
//! it, so reuse after execution is unrepresentable.

use crate::error::{Error, Result};
use crate::segment::{Operation, Segment, SegmentBuilder};

/// Ceiling on the byte preallocation a single batch may request.
pub(crate) const MAX_PREALLOC_BYTES: usize = 1 << 30;
/// Ceiling on the record-count hint a single batch may request.
pub(crate) const MAX_PREALLOC_OPS: usize = 1 << 24;

/// A set of mutations applied atomically to a collection.
///
/// Keys must be unique within one batch (writer contract; violations are
/// not detected). Dropping an unexecuted batch discards it and releases
/// its buffer.
#[derive(Debug)]
pub struct Batch {
    builder: SegmentBuilder,
}

impl Batch {
    /// Creates a batch presized for `total_ops` records and `total_bytes`
    /// of key/value data. Zero hints mean "unknown". The byte hint doubles
    /// as the budget for the zero-copy `alloc_*` family. Hints beyond the
    /// implementation ceiling fail with [`Error::AllocTooLarge`].
    pub(crate) fn new(total_ops: usize, total_bytes: usize) -> Result<Self> {
        if total_ops > MAX_PREALLOC_OPS || total_bytes > MAX_PREALLOC_BYTES {
            return Err(Error::AllocTooLarge);
        }
        Ok(Self {
            builder: SegmentBuilder::with_capacity(total_ops, total_bytes),
        })
    }

    /// Creates or updates a key-value entry. Key and value bytes are
    /// copied, so the caller may reuse its buffers.
    pub fn set(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        self.builder.push(Operation::Set, key, val);
        Ok(())
    }

    /// Deletes the entry for `key`. Deleting a non-existent key is not an
    /// error; the tombstone shadows whatever lies below.
    pub fn del(&mut self, key: &[u8]) -> Result<()> {
        self.builder.push(Operation::Del, key, b"");
        Ok(())
    }

    /// Records a merge operand for `key`, to be resolved by the
    /// collection's merge operator on reads and merges.
    pub fn merge(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        self.builder.push(Operation::Merge, key, val);
        Ok(())
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.builder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// Unsupported. A free-standing scratch slice cannot alias the batch
    /// buffer while the batch stays usable; use [`Batch::alloc_set`],
    /// [`Batch::alloc_del`], or [`Batch::alloc_merge`], which hand out the
    /// record's own key/value windows instead.
    pub fn alloc(&mut self, _num_bytes: usize) -> Result<&mut [u8]> {
        Err(Error::Unimplemented)
    }

    /// Zero-copy `set`: appends a record with uninitialized key/value
    /// regions of the given lengths and returns mutable windows over them
    /// for the caller to fill in place. Draws from the byte budget given
    /// to `new_batch`; exceeding it fails with [`Error::AllocTooLarge`].
    ///
    /// The windows are only valid until the next call on this batch.
    pub fn alloc_set(&mut self, key_len: usize, val_len: usize) -> Result<(&mut [u8], &mut [u8])> {
        self.builder.push_uninit(Operation::Set, key_len, val_len)
    }

    /// Zero-copy `del`; see [`Batch::alloc_set`].
    pub fn alloc_del(&mut self, key_len: usize) -> Result<&mut [u8]> {
        self.builder
            .push_uninit(Operation::Del, key_len, 0)
            .map(|(key, _)| key)
    }

    /// Zero-copy `merge`; see [`Batch::alloc_set`].
    pub fn alloc_merge(&mut self, key_len: usize, val_len: usize) -> Result<(&mut [u8], &mut [u8])> {
        self.builder.push_uninit(Operation::Merge, key_len, val_len)
    }

    /// Sorts the records and seals them into an immutable segment.
    /// `None` for an empty batch.
    pub(crate) fn into_segment(self) -> Option<Segment> {
        if self.builder.is_empty() {
            return None;
        }
        Some(self.builder.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_flow_through_sorted() {
        let mut b = Batch::new(0, 0).unwrap();
        b.set(b"f", b"F").unwrap();
        b.del(b"d").unwrap();
        b.merge(b"m", b"M").unwrap();
        assert_eq!(b.len(), 3);
        assert!(!b.is_empty());

        let seg = b.into_segment().unwrap();
        assert_eq!(seg.kv(0), (Operation::Del, &b"d"[..], &b""[..]));
        assert_eq!(seg.kv(1), (Operation::Set, &b"f"[..], &b"F"[..]));
        assert_eq!(seg.kv(2), (Operation::Merge, &b"m"[..], &b"M"[..]));
    }

    #[test]
    fn empty_batch_produces_no_segment() {
        let b = Batch::new(0, 0).unwrap();
        assert!(b.is_empty());
        assert!(b.into_segment().is_none());
    }

    #[test]
    fn oversized_hints_are_rejected() {
        assert_eq!(
            Batch::new(MAX_PREALLOC_OPS + 1, 0).unwrap_err(),
            Error::AllocTooLarge
        );
        assert_eq!(
            Batch::new(0, MAX_PREALLOC_BYTES + 1).unwrap_err(),
            Error::AllocTooLarge
        );
    }

    #[test]
    fn alloc_is_unimplemented() {
        let mut b = Batch::new(0, 64).unwrap();
        assert_eq!(b.alloc(16).unwrap_err(), Error::Unimplemented);
    }

    #[test]
    fn alloc_family_writes_in_place() {
        let mut b = Batch::new(3, 32).unwrap();
        {
            let (k, v) = b.alloc_set(1, 1).unwrap();
            k.copy_from_slice(b"a");
            v.copy_from_slice(b"A");
        }
        {
            let k = b.alloc_del(1).unwrap();
            k.copy_from_slice(b"b");
        }
        {
            let (k, v) = b.alloc_merge(1, 2).unwrap();
            k.copy_from_slice(b"c");
            v.copy_from_slice(b"CC");
        }

        let seg = b.into_segment().unwrap();
        assert_eq!(seg.kv(0), (Operation::Set, &b"a"[..], &b"A"[..]));
        assert_eq!(seg.kv(1), (Operation::Del, &b"b"[..], &b""[..]));
        assert_eq!(seg.kv(2), (Operation::Merge, &b"c"[..], &b"CC"[..]));
    }

    #[test]
    fn alloc_family_respects_byte_budget() {
        let mut b = Batch::new(0, 4).unwrap();
        let (k, v) = b.alloc_set(2, 2).unwrap();
        k.copy_from_slice(b"ab");
        v.copy_from_slice(b"cd");
        assert_eq!(b.alloc_del(1).unwrap_err(), Error::AllocTooLarge);

        // Plain appends are not limited by the budget.
        b.set(b"more", b"data").unwrap();
        assert_eq!(b.len(), 2);
    }
}
