//! Persistence seam.
//!
//! Durable storage is not part of the core engine. What the core provides
//! is a handoff: after the merger publishes a merged stack it offers a
//! [`Snapshot`] of the result to an application-supplied [`Persister`] on
//! a small buffered channel. The handoff never blocks the merger; when the
//! persister falls behind, intermediate results are simply skipped and a
//! later, more merged snapshot is offered instead.

use crossbeam_channel::{select, Receiver};

use crate::error::Result;
use crate::snapshot::Snapshot;

/// Writes snapshots to durable storage, outside the core's concern.
///
/// `persist` is called from a dedicated worker thread, one snapshot at a
/// time, in publication order (with gaps when the engine outpaces the
/// persister). Errors are logged and the worker moves on.
pub trait Persister: Send + Sync {
    fn persist(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Persister worker loop: forwards handed-off snapshots to the persister
/// until shutdown, then drains whatever is still queued before exiting.
pub(crate) fn run(persister: &dyn Persister, handoff: Receiver<Snapshot>, stop: Receiver<()>) {
    tracing::debug!("persister started");
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(handoff) -> msg => match msg {
                Ok(snapshot) => persist_one(persister, &snapshot),
                Err(_) => break,
            },
        }
    }
    while let Ok(snapshot) = handoff.try_recv() {
        persist_one(persister, &snapshot);
    }
    tracing::debug!("persister stopped");
}

fn persist_one(persister: &dyn Persister, snapshot: &Snapshot) {
    if let Err(error) = persister.persist(snapshot) {
        tracing::error!(%error, "persist failed");
    }
}
