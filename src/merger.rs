//! Background merger.
//!
//! A single worker thread keeps the segment stack short. Writers ping the
//! wake channel after every publish; the channel's small buffer coalesces
//! bursts into one run. On each wake the merger captures the current
//! stack, picks a suffix to merge under the size-ratio policy, collapses
//! it into one segment off-lock, and splices the result back into whatever
//! stack is current by then — publication only ever appends on top, so the
//! captured indices still name the same segments.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{select, Receiver, Sender};

use crate::collection::{Lifecycle, Shared};
use crate::merge::MergeOperator;
use crate::snapshot::Snapshot;

pub(crate) struct MergerContext {
    pub(crate) shared: Arc<Shared>,
    pub(crate) operator: Option<Arc<dyn MergeOperator>>,
    pub(crate) min_merge_percentage: f64,
    pub(crate) max_stack_open_height: usize,
    pub(crate) wake: Receiver<()>,
    pub(crate) stop: Receiver<()>,
    pub(crate) persist_handoff: Option<Sender<Snapshot>>,
}

pub(crate) fn run(ctx: MergerContext) {
    tracing::debug!("merger started");
    loop {
        select! {
            recv(ctx.stop) -> _ => break,
            recv(ctx.wake) -> msg => {
                if msg.is_err() {
                    break;
                }
            }
        }
        // Coalesce any pings that queued up while we were busy.
        while ctx.wake.try_recv().is_ok() {}
        ctx.shared
            .stats
            .tot_merger_wakeups
            .fetch_add(1, Ordering::SeqCst);
        merge_once(&ctx);
    }
    tracing::debug!("merger stopped");
}

fn merge_once(ctx: &MergerContext) {
    let stack = Arc::clone(&ctx.shared.state.lock().stack);
    let height = stack.height();
    if height <= 1 {
        return;
    }

    let sizes: Vec<usize> = stack.segments().iter().map(|s| s.len()).collect();
    let mut lo = pick_merge_start(&sizes, ctx.min_merge_percentage);
    if lo == height - 1 {
        // The policy picked only the top segment. Leave the stack alone
        // unless writers are about to hit the gate, in which case merge
        // everything.
        if height < ctx.max_stack_open_height {
            return;
        }
        lo = 0;
    }

    let operator = ctx.operator.as_deref();
    let merged = match stack.collapse(lo, operator) {
        Ok(Some(segment)) => segment,
        Ok(None) => {
            // A merge chain in the range could not be reduced without its
            // base; retry against the whole stack, where the bottom always
            // supplies one.
            lo = 0;
            match stack.collapse(0, operator) {
                Ok(Some(segment)) => segment,
                Ok(None) => return,
                Err(error) => {
                    tracing::error!(%error, "merge failed");
                    return;
                }
            }
        }
        Err(error) => {
            tracing::error!(%error, "merge failed");
            return;
        }
    };

    let records = merged.len();
    let published = {
        let mut state = ctx.shared.state.lock();
        if state.lifecycle != Lifecycle::Running {
            return;
        }
        state.stack = Arc::new(state.stack.splice(lo, height, Arc::new(merged)));
        ctx.shared.stats.tot_merges.fetch_add(1, Ordering::SeqCst);
        ctx.shared.stack_open.notify_all();
        Arc::clone(&state.stack)
    };
    tracing::debug!(
        merged_segments = height - lo,
        records,
        height = published.height(),
        "merged segment stack"
    );

    if let Some(handoff) = &ctx.persist_handoff {
        let snapshot = Snapshot::new(published, ctx.operator.clone());
        // Never block the merger on the persister; skipped publications
        // are superseded by later, more merged ones.
        if handoff.try_send(snapshot).is_ok() {
            ctx.shared
                .stats
                .tot_persist_handoffs
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Picks the start of the merge suffix `[lo, height)`: walking down from
/// the top, the next-lower segment is absorbed while the segment above it
/// holds at least `min_merge_percentage` of its size. Returns
/// `height - 1` when nothing below the top qualifies.
pub(crate) fn pick_merge_start(sizes: &[usize], min_merge_percentage: f64) -> usize {
    let mut lo = sizes.len() - 1;
    while lo > 0 && sizes[lo] as f64 >= min_merge_percentage * sizes[lo - 1] as f64 {
        lo -= 1;
    }
    lo
}
