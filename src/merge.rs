//! Application-supplied merge operator.
//!
//! A merge operator lets applications express read-modify-write updates
//! (counters, appends, set unions) as a single Merge record instead of a
//! get-then-set round trip. The engine stores the operands and resolves
//! them lazily: on reads (`Snapshot::get`, iterator `current`) and when the
//! merger collapses segments.

/// Resolves Merge operands into concrete values.
///
/// Implementations must be deterministic: the engine may resolve the same
/// operand chain more than once (once per read, and again during a merge)
/// and the results must agree.
pub trait MergeOperator: Send + Sync {
    /// An identifier for this operator, used for logging.
    fn name(&self) -> &str;

    /// Merges the full sequence of operands on top of `existing`, which is
    /// `None` when no value currently exists for the key. Operands are
    /// ordered oldest to newest. Returns `None` when a full merge cannot
    /// be performed; the engine surfaces that as
    /// [`Error::MergeOperatorFullMergeFailed`](crate::Error).
    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[&[u8]])
        -> Option<Vec<u8>>;

    /// Combines two adjacent operands (`left` older, `right` newer) without
    /// a base value. Returns `None` to defer: the engine keeps both
    /// operands for a later `full_merge`.
    fn partial_merge(&self, key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>>;
}
