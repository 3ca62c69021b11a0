//! Shared test fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::merge::MergeOperator;

/// Colon-joining append operator: a full merge yields
/// `existing + ":" + operands.join(":")` with a missing base treated as
/// empty, and a partial merge yields `left + ":" + right`. Invocations are
/// counted so tests can observe which path resolved a chain.
#[derive(Default)]
pub(crate) struct AppendOperator {
    pub(crate) num_full: AtomicUsize,
    pub(crate) num_partial: AtomicUsize,
}

impl MergeOperator for AppendOperator {
    fn name(&self) -> &str {
        "test-append"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        self.num_full.fetch_add(1, Ordering::SeqCst);
        let mut out = existing.unwrap_or_default().to_vec();
        for operand in operands {
            out.push(b':');
            out.extend_from_slice(operand);
        }
        Some(out)
    }

    fn partial_merge(&self, _key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
        self.num_partial.fetch_add(1, Ordering::SeqCst);
        let mut out = left.to_vec();
        out.push(b':');
        out.extend_from_slice(right);
        Some(out)
    }
}
