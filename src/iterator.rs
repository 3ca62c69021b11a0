//! N-way merge iteration over a segment stack.
//!
//! One [`Cursor`] tracks a position inside each segment; a min-heap keyed
//! by (current key ascending, stack index descending) always exposes the
//! smallest pending key, with the newest segment winning ties. Advancing
//! past a key advances every cursor positioned on that key, which is what
//! collapses shadowed duplicates across segments.
//!
//! The iterator has two visibility modes. The raw mode yields records
//! exactly as stored, including Del tombstones and unresolved Merge
//! operands; it is what segment merging is built on. The resolved mode is
//! the public view: Del records are skipped transparently and Merge chains
//! are resolved through the configured merge operator, so `current` only
//! ever yields live key-value pairs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::merge::MergeOperator;
use crate::segment::{Operation, Segment};
use crate::stack::SegmentStack;

/// Per-segment iteration state: the segment, the current record index, and
/// the segment's position in the stack (higher = newer).
#[derive(Debug)]
pub(crate) struct Cursor {
    segment: Arc<Segment>,
    stack_idx: usize,
    idx: usize,
}

impl Cursor {
    /// The key under the cursor, or `None` when the cursor has run off the
    /// segment or past the end-exclusive bound.
    fn current_key<'a>(&'a self, end_exclusive: Option<&[u8]>) -> Option<&'a [u8]> {
        if self.idx >= self.segment.len() {
            return None;
        }
        let key = self.segment.key(self.idx);
        match end_exclusive {
            Some(end) if key >= end => None,
            _ => Some(key),
        }
    }
}

/// A pending key from one cursor, ordered for min-heap use: smaller keys
/// first, and for equal keys the higher stack index (newer segment) first.
#[derive(Debug)]
struct HeapEntry {
    key: Bytes,
    stack_idx: usize,
    cursor: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.stack_idx == other.stack_idx
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the key comparison so the
        // smallest key surfaces first. On equal keys the higher stack
        // index must surface first, so that comparison stays forward.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.stack_idx.cmp(&other.stack_idx))
    }
}

/// Record visibility for a [`ScanIterator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Yield records as stored, including Del and Merge records.
    Raw,
    /// Skip Del records and resolve Merge chains; the public view.
    Resolved,
}

/// Ordered enumeration over a snapshot of the segment stack.
///
/// The start bound is inclusive, the end bound exclusive; `None` means
/// unbounded. Keys yielded by successive `next` calls are strictly
/// ascending. Cursors hold `Arc` references to their segments, so an
/// iterator stays valid regardless of concurrent batches and merges.
pub struct ScanIterator {
    cursors: Vec<Cursor>,
    heap: BinaryHeap<HeapEntry>,
    end_exclusive: Option<Bytes>,
    operator: Option<Arc<dyn MergeOperator>>,
    mode: Mode,
    /// Resolved (key, value) cache for a Merge chain at the current
    /// position; cleared on every advance.
    resolved: Option<(Bytes, Bytes)>,
}

impl std::fmt::Debug for ScanIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanIterator")
            .field("cursors", &self.cursors)
            .field("heap", &self.heap)
            .field("end_exclusive", &self.end_exclusive)
            .field("has_operator", &self.operator.is_some())
            .field("mode", &self.mode)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl ScanIterator {
    pub(crate) fn new(
        stack: &SegmentStack,
        start_inclusive: Option<&[u8]>,
        end_exclusive: Option<&[u8]>,
        operator: Option<Arc<dyn MergeOperator>>,
        mode: Mode,
    ) -> Result<Self> {
        let start = start_inclusive.unwrap_or(b"");
        let end = end_exclusive.map(Bytes::copy_from_slice);

        let mut cursors = Vec::with_capacity(stack.height());
        let mut heap = BinaryHeap::with_capacity(stack.height());
        for (stack_idx, segment) in stack.segments().iter().enumerate() {
            let cursor = Cursor {
                segment: Arc::clone(segment),
                stack_idx,
                idx: segment.find_start(start),
            };
            if cursor.current_key(end.as_deref()).is_some() {
                heap.push(HeapEntry {
                    key: cursor.segment.key_bytes(cursor.idx),
                    stack_idx,
                    cursor: cursors.len(),
                });
            }
            cursors.push(cursor);
        }

        let mut iter = Self {
            cursors,
            heap,
            end_exclusive: end,
            operator,
            mode,
            resolved: None,
        };
        if iter.mode == Mode::Resolved {
            iter.position()?;
        }
        Ok(iter)
    }

    /// Moves past the current key and re-positions. All cursors whose
    /// current key equals the heap top's key advance together, collapsing
    /// shadowed duplicates. Returns [`Error::IteratorDone`] when the range
    /// is exhausted.
    pub fn next(&mut self) -> Result<()> {
        self.advance_past_top_key();
        if self.mode == Mode::Resolved {
            self.position()?;
        }
        if self.heap.is_empty() {
            return Err(Error::IteratorDone);
        }
        Ok(())
    }

    /// The current key-value entry in the resolved view: Del records are
    /// never seen here and Merge chains arrive fully resolved. The slices
    /// stay valid until the next call to `next`. Returns
    /// [`Error::IteratorDone`] when the range is exhausted.
    pub fn current(&self) -> Result<(&[u8], &[u8])> {
        debug_assert!(self.mode == Mode::Resolved);
        if let Some((key, val)) = &self.resolved {
            return Ok((key.as_ref(), val.as_ref()));
        }
        let Some(top) = self.heap.peek() else {
            return Err(Error::IteratorDone);
        };
        let cursor = &self.cursors[top.cursor];
        let (op, key, val) = cursor.segment.kv(cursor.idx);
        debug_assert!(op == Operation::Set);
        Ok((key, val))
    }

    /// The current record as stored, including Del and Merge records. The
    /// heap tie-break makes this the newest record for the current key.
    pub(crate) fn current_raw(&self) -> Result<(Operation, &[u8], &[u8])> {
        let Some(top) = self.heap.peek() else {
            return Err(Error::IteratorDone);
        };
        let cursor = &self.cursors[top.cursor];
        Ok(cursor.segment.kv(cursor.idx))
    }

    /// Every record for the current key across cursors, newest first.
    /// Empty when the iterator is done. Does not advance.
    pub(crate) fn current_key_group(&self) -> Vec<(Operation, Bytes)> {
        let Some(top) = self.heap.peek() else {
            return Vec::new();
        };
        let key = top.key.clone();
        let mut group: Vec<(usize, Operation, Bytes)> = Vec::new();
        for cursor in &self.cursors {
            if cursor.current_key(self.end_exclusive.as_deref()) == Some(key.as_ref()) {
                group.push((
                    cursor.stack_idx,
                    cursor.segment.op(cursor.idx),
                    cursor.segment.val_bytes(cursor.idx),
                ));
            }
        }
        group.sort_by(|a, b| b.0.cmp(&a.0));
        group.into_iter().map(|(_, op, val)| (op, val)).collect()
    }

    /// Pops the heap top and advances every cursor positioned on the same
    /// key, refilling the heap as cursors move.
    fn advance_past_top_key(&mut self) {
        self.resolved = None;
        let Some(top) = self.heap.pop() else {
            return;
        };
        let key = top.key.clone();
        self.advance_cursor(top.cursor);
        while let Some(peek) = self.heap.peek() {
            if peek.key != key {
                break;
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };
            self.advance_cursor(entry.cursor);
        }
    }

    fn advance_cursor(&mut self, cursor_idx: usize) {
        let cursor = &mut self.cursors[cursor_idx];
        cursor.idx += 1;
        if cursor.current_key(self.end_exclusive.as_deref()).is_some() {
            self.heap.push(HeapEntry {
                key: cursor.segment.key_bytes(cursor.idx),
                stack_idx: cursor.stack_idx,
                cursor: cursor_idx,
            });
        }
    }

    /// Establishes the resolved-mode invariant: the heap top is a Set
    /// record or a Merge chain cached in `resolved`, or the heap is empty.
    fn position(&mut self) -> Result<()> {
        self.resolved = None;
        loop {
            let op = match self.heap.peek() {
                None => return Ok(()),
                Some(top) => {
                    let cursor = &self.cursors[top.cursor];
                    cursor.segment.op(cursor.idx)
                }
            };
            match op {
                Operation::Set => return Ok(()),
                Operation::Del => self.advance_past_top_key(),
                Operation::Merge => return self.resolve_merge_chain(),
            }
        }
    }

    /// Resolves the Merge chain at the current key without advancing:
    /// operands are gathered newest-to-oldest across cursors until a Set
    /// (base value), a Del (base is nothing), or the bottom of the stack,
    /// partially merged pairwise where the operator allows, and finished
    /// with a full merge.
    fn resolve_merge_chain(&mut self) -> Result<()> {
        let Some(top) = self.heap.peek() else {
            return Ok(());
        };
        let key = top.key.clone();

        let mut operands: Vec<Bytes> = Vec::new();
        let mut existing: Option<Bytes> = None;
        for (op, val) in self.current_key_group() {
            match op {
                Operation::Merge => operands.push(val),
                Operation::Set => {
                    existing = Some(val);
                    break;
                }
                Operation::Del => break,
            }
        }
        operands.reverse();

        let Some(operator) = self.operator.as_deref() else {
            return Err(Error::MergeOperatorNil);
        };

        let mut reduced: Vec<Vec<u8>> = Vec::with_capacity(operands.len());
        for operand in &operands {
            if let Some(last) = reduced.last_mut() {
                if let Some(combined) = operator.partial_merge(&key, last.as_slice(), operand) {
                    *last = combined;
                    continue;
                }
            }
            reduced.push(operand.to_vec());
        }

        let operand_refs: Vec<&[u8]> = reduced.iter().map(|v| v.as_slice()).collect();
        let val = operator
            .full_merge(&key, existing.as_deref(), &operand_refs)
            .ok_or(Error::MergeOperatorFullMergeFailed)?;
        self.resolved = Some((key, Bytes::from(val)));
        Ok(())
    }
}
