use std::sync::Arc;

use crate::merge::MergeOperator;
use crate::persist::Persister;

/// Configuration for a [`Collection`](crate::Collection).
#[derive(Clone)]
pub struct CollectionConfig {
    /// Optional merge operator; required if and only if batches produce
    /// Merge records.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,

    /// The merger absorbs the next-lower segment only while that lower
    /// segment is not much bigger than the one above it: segment `i` is
    /// merged downward only when `len(i) >= min_merge_percentage * len(i-1)`.
    /// In `[0, 1]` (default: 0.8).
    pub min_merge_percentage: f64,

    /// Maximum height of the stack of to-be-merged segments before
    /// `execute_batch` blocks to let the merger catch up (default: 10).
    pub max_stack_open_height: usize,

    /// Optional persister; when set, the merger hands each merged result
    /// to a dedicated persister worker.
    pub persister: Option<Arc<dyn Persister>>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            merge_operator: None,
            min_merge_percentage: 0.8,
            max_stack_open_height: 10,
            persister: None,
        }
    }
}

impl CollectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the merge operator.
    pub fn merge_operator(mut self, operator: Arc<dyn MergeOperator>) -> Self {
        self.merge_operator = Some(operator);
        self
    }

    /// Set the minimum merge percentage.
    pub fn min_merge_percentage(mut self, percentage: f64) -> Self {
        self.min_merge_percentage = percentage;
        self
    }

    /// Set the maximum open stack height.
    pub fn max_stack_open_height(mut self, height: usize) -> Self {
        self.max_stack_open_height = height;
        self
    }

    /// Set the persister.
    pub fn persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }
}

impl std::fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionConfig")
            .field(
                "merge_operator",
                &self.merge_operator.as_ref().map(|op| op.name().to_string()),
            )
            .field("min_merge_percentage", &self.min_merge_percentage)
            .field("max_stack_open_height", &self.max_stack_open_height)
            .field("persister", &self.persister.is_some())
            .finish()
    }
}
