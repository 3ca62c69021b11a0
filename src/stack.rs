//! Copy-on-write stacks of immutable segments.
//!
//! A [`SegmentStack`] is an ordered sequence of segment references, index 0
//! at the bottom and the newest segment on top. Records in a higher
//! segment shadow records for the same key in lower segments. Stacks are
//! never mutated once published: pushing a batch or substituting a merged
//! range produces a new stack that shares every untouched segment with its
//! predecessor, so snapshots keep reading their stack while the collection
//! moves on.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::iterator::{Mode, ScanIterator};
use crate::merge::MergeOperator;
use crate::segment::{Operation, Segment, SegmentBuilder};

#[derive(Debug)]
pub(crate) struct SegmentStack {
    segments: Vec<Arc<Segment>>,
}

impl SegmentStack {
    pub(crate) fn empty() -> Self {
        Self { segments: Vec::new() }
    }

    pub(crate) fn from_segments(segments: Vec<Arc<Segment>>) -> Self {
        Self { segments }
    }

    pub(crate) fn height(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    /// Returns a new stack with `segment` pushed on top.
    pub(crate) fn push(&self, segment: Arc<Segment>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment);
        Self { segments }
    }

    /// Returns a new stack where segments `[lo, hi)` are replaced by
    /// `merged`. Segments outside the range are shared with `self`, and
    /// their relative order is preserved.
    pub(crate) fn splice(&self, lo: usize, hi: usize, merged: Arc<Segment>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() - (hi - lo) + 1);
        segments.extend(self.segments[..lo].iter().cloned());
        segments.push(merged);
        segments.extend(self.segments[hi..].iter().cloned());
        Self { segments }
    }

    /// Point lookup: probes segments top-down and resolves the first
    /// record found. A Set yields its value, a Del yields nothing, and a
    /// Merge starts an operand chain that continues downward until a Set,
    /// a Del, or the stack bottom supplies the base for a full merge.
    pub(crate) fn get(
        &self,
        key: &[u8],
        operator: Option<&dyn MergeOperator>,
    ) -> Result<Option<Bytes>> {
        let mut operands: Vec<Bytes> = Vec::new();
        for segment in self.segments.iter().rev() {
            let Some(i) = segment.find_exact(key) else {
                continue;
            };
            match segment.op(i) {
                Operation::Set => {
                    let val = segment.val_bytes(i);
                    if operands.is_empty() {
                        return Ok(Some(val));
                    }
                    return full_merge(operator, key, Some(val.as_ref()), operands).map(Some);
                }
                Operation::Del => {
                    if operands.is_empty() {
                        return Ok(None);
                    }
                    return full_merge(operator, key, None, operands).map(Some);
                }
                Operation::Merge => operands.push(segment.val_bytes(i)),
            }
        }
        if operands.is_empty() {
            return Ok(None);
        }
        full_merge(operator, key, None, operands).map(Some)
    }

    /// N-way merges segments `[lo, height)` into a single sorted segment,
    /// resolving shadowing and collapsing Merge chains. The merge is
    /// driven by a raw-mode [`ScanIterator`] over the range, whose heap
    /// surfaces the newest record per key; the output holds at most one
    /// record per key.
    ///
    /// Del records are dropped only when the range includes the stack
    /// bottom (`lo == 0`); otherwise they must survive to keep shadowing
    /// whatever lies below. A Merge chain with no terminal record inside
    /// the range is reduced with partial merges; when the operator defers
    /// and the chain cannot collapse to one record, `Ok(None)` is returned
    /// and the caller must retry with the bottom included, where a full
    /// merge always resolves.
    pub(crate) fn collapse(
        &self,
        lo: usize,
        operator: Option<&dyn MergeOperator>,
    ) -> Result<Option<Segment>> {
        let segs = &self.segments[lo..];
        let include_bottom = lo == 0;

        let total_ops = segs.iter().map(|s| s.len()).sum();
        let total_bytes = segs.iter().map(|s| s.buf_len()).sum();
        let mut out = SegmentBuilder::with_capacity(total_ops, total_bytes);

        let range = SegmentStack::from_segments(segs.to_vec());
        let mut iter = ScanIterator::new(&range, None, None, None, Mode::Raw)?;
        loop {
            match iter.current_raw() {
                Err(Error::IteratorDone) => break,
                Err(error) => return Err(error),
                Ok((op, key, val)) => match op {
                    Operation::Set => out.push(Operation::Set, key, val),
                    Operation::Del => {
                        if !include_bottom {
                            out.push(Operation::Del, key, b"");
                        }
                    }
                    Operation::Merge => {
                        let mut operands: Vec<Bytes> = Vec::new();
                        let mut terminal: Option<Option<Bytes>> = None;
                        for (op, val) in iter.current_key_group() {
                            match op {
                                Operation::Merge => operands.push(val),
                                Operation::Set => {
                                    terminal = Some(Some(val));
                                    break;
                                }
                                Operation::Del => {
                                    terminal = Some(None);
                                    break;
                                }
                            }
                        }

                        if terminal.is_some() || include_bottom {
                            let existing = terminal.flatten();
                            let resolved =
                                full_merge(operator, key, existing.as_deref(), operands)?;
                            out.push(Operation::Set, key, &resolved);
                        } else if operands.len() == 1 {
                            // A lone operand needs no operator; carry it along.
                            out.push(Operation::Merge, key, &operands[0]);
                        } else {
                            let Some(operator) = operator else {
                                return Err(Error::MergeOperatorNil);
                            };
                            operands.reverse();
                            let mut acc = operands[0].to_vec();
                            let mut collapsed = true;
                            for operand in &operands[1..] {
                                match operator.partial_merge(key, &acc, operand) {
                                    Some(combined) => acc = combined,
                                    None => {
                                        collapsed = false;
                                        break;
                                    }
                                }
                            }
                            if !collapsed {
                                return Ok(None);
                            }
                            out.push(Operation::Merge, key, &acc);
                        }
                    }
                },
            }
            match iter.next() {
                Ok(()) => {}
                Err(Error::IteratorDone) => break,
                Err(error) => return Err(error),
            }
        }

        Ok(Some(out.freeze()))
    }
}

/// Resolves an operand chain gathered newest-first against `existing`.
fn full_merge(
    operator: Option<&dyn MergeOperator>,
    key: &[u8],
    existing: Option<&[u8]>,
    mut operands_newest_first: Vec<Bytes>,
) -> Result<Bytes> {
    let Some(operator) = operator else {
        return Err(Error::MergeOperatorNil);
    };
    operands_newest_first.reverse();
    let operand_refs: Vec<&[u8]> = operands_newest_first.iter().map(|b| b.as_ref()).collect();
    let val = operator
        .full_merge(key, existing, &operand_refs)
        .ok_or(Error::MergeOperatorFullMergeFailed)?;
    Ok(Bytes::from(val))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::AppendOperator;

    fn segment(records: &[(Operation, &[u8], &[u8])]) -> Arc<Segment> {
        let mut b = SegmentBuilder::with_capacity(0, 0);
        for (op, key, val) in records {
            b.push(*op, key, val);
        }
        Arc::new(b.freeze())
    }

    fn records(seg: &Segment) -> Vec<(Operation, Vec<u8>, Vec<u8>)> {
        (0..seg.len())
            .map(|i| {
                let (op, k, v) = seg.kv(i);
                (op, k.to_vec(), v.to_vec())
            })
            .collect()
    }

    #[test]
    fn get_probes_top_down() {
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"a", b"old"), (Operation::Set, b"b", b"B")]),
            segment(&[(Operation::Set, b"a", b"new")]),
        ]);
        assert_eq!(stack.get(b"a", None).unwrap().unwrap().as_ref(), b"new");
        assert_eq!(stack.get(b"b", None).unwrap().unwrap().as_ref(), b"B");
        assert_eq!(stack.get(b"c", None).unwrap(), None);
    }

    #[test]
    fn get_honors_tombstones() {
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"a", b"A")]),
            segment(&[(Operation::Del, b"a", b"")]),
        ]);
        assert_eq!(stack.get(b"a", None).unwrap(), None);
    }

    #[test]
    fn get_resolves_merge_chains() {
        let operator = AppendOperator::default();

        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Merge, b"m", b"M")]),
            segment(&[(Operation::Merge, b"m", b"N")]),
            segment(&[(Operation::Merge, b"m", b"O")]),
        ]);
        assert_eq!(
            stack.get(b"m", Some(&operator)).unwrap().unwrap().as_ref(),
            b":M:N:O"
        );

        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"m", b"V")]),
            segment(&[(Operation::Merge, b"m", b"M")]),
        ]);
        assert_eq!(
            stack.get(b"m", Some(&operator)).unwrap().unwrap().as_ref(),
            b"V:M"
        );

        // Del below the chain is a terminal base of nothing.
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"m", b"V")]),
            segment(&[(Operation::Del, b"m", b"")]),
            segment(&[(Operation::Merge, b"m", b"M")]),
        ]);
        assert_eq!(
            stack.get(b"m", Some(&operator)).unwrap().unwrap().as_ref(),
            b":M"
        );
    }

    #[test]
    fn get_merge_without_operator_fails() {
        let stack =
            SegmentStack::from_segments(vec![segment(&[(Operation::Merge, b"m", b"M")])]);
        assert_eq!(stack.get(b"m", None).unwrap_err(), Error::MergeOperatorNil);
    }

    #[test]
    fn collapse_deduplicates_shadowed_keys() {
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"a", b"1"), (Operation::Set, b"b", b"1")]),
            segment(&[(Operation::Set, b"b", b"2"), (Operation::Set, b"c", b"2")]),
        ]);
        let merged = stack.collapse(0, None).unwrap().unwrap();
        assert_eq!(
            records(&merged),
            vec![
                (Operation::Set, b"a".to_vec(), b"1".to_vec()),
                (Operation::Set, b"b".to_vec(), b"2".to_vec()),
                (Operation::Set, b"c".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn collapse_drops_tombstones_only_at_the_bottom() {
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"a", b"A")]),
            segment(&[(Operation::Del, b"a", b"")]),
        ]);

        // Bottom included: the tombstone has nothing left to shadow.
        let merged = stack.collapse(0, None).unwrap().unwrap();
        assert!(records(&merged).is_empty());

        // Mid-stack: the tombstone must keep shadowing segment 0.
        let merged = stack.collapse(1, None).unwrap().unwrap();
        assert_eq!(
            records(&merged),
            vec![(Operation::Del, b"a".to_vec(), b"".to_vec())]
        );
        let spliced = stack.splice(1, 2, Arc::new(merged));
        assert_eq!(spliced.height(), 2);
        assert_eq!(spliced.get(b"a", None).unwrap(), None);
    }

    #[test]
    fn collapse_resolves_chains_with_a_base() {
        let operator = AppendOperator::default();
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"m", b"V")]),
            segment(&[(Operation::Merge, b"m", b"M")]),
            segment(&[(Operation::Merge, b"m", b"N")]),
        ]);
        let merged = stack.collapse(0, Some(&operator)).unwrap().unwrap();
        assert_eq!(
            records(&merged),
            vec![(Operation::Set, b"m".to_vec(), b"V:M:N".to_vec())]
        );
    }

    #[test]
    fn collapse_full_merges_bottomless_chains_at_the_bottom() {
        let operator = AppendOperator::default();
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Merge, b"m", b"M")]),
            segment(&[(Operation::Merge, b"m", b"N")]),
        ]);
        let merged = stack.collapse(0, Some(&operator)).unwrap().unwrap();
        assert_eq!(
            records(&merged),
            vec![(Operation::Set, b"m".to_vec(), b":M:N".to_vec())]
        );
    }

    #[test]
    fn collapse_keeps_midstack_chains_as_merge_records() {
        let operator = AppendOperator::default();
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"m", b"V")]),
            segment(&[(Operation::Merge, b"m", b"M")]),
            segment(&[(Operation::Merge, b"m", b"N")]),
        ]);

        // Merging only the operand segments must not bake in a base that
        // still lives below the range.
        let merged = stack.collapse(1, Some(&operator)).unwrap().unwrap();
        assert_eq!(
            records(&merged),
            vec![(Operation::Merge, b"m".to_vec(), b"M:N".to_vec())]
        );
        assert!(operator.num_partial.load(std::sync::atomic::Ordering::SeqCst) > 0);

        let spliced = stack.splice(1, 3, Arc::new(merged));
        assert_eq!(
            spliced.get(b"m", Some(&operator)).unwrap().unwrap().as_ref(),
            b"V:M:N"
        );
    }

    #[test]
    fn collapse_preserves_a_lone_midstack_operand_without_an_operator() {
        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"m", b"V")]),
            segment(&[(Operation::Merge, b"m", b"M"), (Operation::Set, b"z", b"Z")]),
            segment(&[(Operation::Set, b"z", b"ZZ")]),
        ]);
        let merged = stack.collapse(1, None).unwrap().unwrap();
        assert_eq!(
            records(&merged),
            vec![
                (Operation::Merge, b"m".to_vec(), b"M".to_vec()),
                (Operation::Set, b"z".to_vec(), b"ZZ".to_vec()),
            ]
        );
    }

    #[test]
    fn collapse_reports_deferred_midstack_chains() {
        struct Deferring;
        impl MergeOperator for Deferring {
            fn name(&self) -> &str {
                "deferring"
            }
            fn full_merge(
                &self,
                _key: &[u8],
                existing: Option<&[u8]>,
                operands: &[&[u8]],
            ) -> Option<Vec<u8>> {
                let mut out = existing.unwrap_or_default().to_vec();
                for operand in operands {
                    out.extend_from_slice(operand);
                }
                Some(out)
            }
            fn partial_merge(&self, _key: &[u8], _left: &[u8], _right: &[u8]) -> Option<Vec<u8>> {
                None
            }
        }

        let stack = SegmentStack::from_segments(vec![
            segment(&[(Operation::Set, b"m", b"V")]),
            segment(&[(Operation::Merge, b"m", b"M")]),
            segment(&[(Operation::Merge, b"m", b"N")]),
        ]);
        assert!(stack.collapse(1, Some(&Deferring)).unwrap().is_none());

        // Including the bottom resolves through full merge instead.
        let merged = stack.collapse(0, Some(&Deferring)).unwrap().unwrap();
        assert_eq!(
            records(&merged),
            vec![(Operation::Set, b"m".to_vec(), b"VMN".to_vec())]
        );
    }

    #[test]
    fn splice_composes_with_segments_pushed_during_a_merge() {
        let bottom = segment(&[(Operation::Set, b"a", b"A")]);
        let mid1 = segment(&[(Operation::Set, b"b", b"B")]);
        let mid2 = segment(&[(Operation::Set, b"c", b"C")]);
        let captured = SegmentStack::from_segments(vec![
            Arc::clone(&bottom),
            mid1,
            mid2,
        ]);

        // Collapse the captured suffix [1, 3) while a new batch lands on top.
        let merged = captured.collapse(1, None).unwrap().unwrap();
        let top = segment(&[(Operation::Set, b"d", b"D")]);
        let grown = captured.push(Arc::clone(&top));

        let spliced = grown.splice(1, 3, Arc::new(merged));
        assert_eq!(spliced.height(), 3);
        assert!(Arc::ptr_eq(&spliced.segments()[0], &bottom));
        assert!(Arc::ptr_eq(&spliced.segments()[2], &top));
        for key in [b"a", b"b", b"c", b"d"] {
            assert!(spliced.get(key, None).unwrap().is_some());
        }
    }
}
