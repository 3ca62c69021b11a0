//! Stable read views.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::iterator::{Mode, ScanIterator};
use crate::merge::MergeOperator;
use crate::stack::SegmentStack;

/// A stable view of the collection, isolated from concurrent mutation.
///
/// A snapshot pins the segment stack that was published when it was taken;
/// later batches and merges act on fresh copy-on-write stacks and are
/// never observed. The pinned segments are released when the snapshot and
/// every iterator started from it have been dropped.
pub struct Snapshot {
    stack: Arc<SegmentStack>,
    operator: Option<Arc<dyn MergeOperator>>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("stack", &self.stack)
            .field("has_operator", &self.operator.is_some())
            .finish()
    }
}

impl Snapshot {
    pub(crate) fn new(
        stack: Arc<SegmentStack>,
        operator: Option<Arc<dyn MergeOperator>>,
    ) -> Self {
        Self { stack, operator }
    }

    /// Retrieves the value for `key`, or `None` if the key is absent or
    /// deleted. Merge chains are resolved through the configured operator;
    /// the returned bytes share the segment buffer where possible.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.stack.get(key, self.operator.as_deref())
    }

    /// Starts an ordered iterator over `[start_inclusive, end_exclusive)`,
    /// where `None` bounds mean unbounded. The iterator yields the
    /// resolved view: deleted keys are skipped and merge chains applied.
    pub fn start_iterator(
        &self,
        start_inclusive: Option<&[u8]>,
        end_exclusive: Option<&[u8]>,
    ) -> Result<ScanIterator> {
        ScanIterator::new(
            &self.stack,
            start_inclusive,
            end_exclusive,
            self.operator.clone(),
            Mode::Resolved,
        )
    }
}
