//! Stratadb: an in-memory ordered key-value store built from stacked
//! immutable sorted segments.
//!
//! The design is a much simplified LSM tree that never leaves memory.
//! Mutations arrive in atomic [`Batch`]es; executing a batch sorts its
//! records into an immutable sorted segment and pushes that
//! segment onto a copy-on-write stack, where higher segments shadow lower
//! ones. A background merger continuously N-way merges the top of the
//! stack back down so point lookups and scans stay cheap.
//!
//! # Architecture
//!
//! ```text
//! Writer                      Collection                     Merger
//!   │                             │                            │
//!   │ new_batch / set / del /     │                            │
//!   │ merge                       │                            │
//!   ├──── execute_batch ─────────►│ sort + push segment        │
//!   │                             │ (atomic stack swap) ──ping─►│
//!   │                             │                            │ pick suffix by
//!   │                             │                            │ size ratio,
//!   │                             │◄─── splice merged segment ─┤ N-way merge
//!   │                             │                            │
//! Reader                          │                         Persister
//!   ├──── snapshot ──────────────►│ clone stack reference      │
//!   │  get / start_iterator       │         (handoff) ────────►│ optional
//! ```
//!
//! # Concurrency
//!
//! Stacks and segments are immutable once published; the only shared
//! mutable state is the current-stack reference. Readers therefore never
//! block writers and vice versa: a [`Snapshot`] pins the stack it was
//! taken from and stays stable for its whole lifetime, while batches and
//! merges publish fresh stacks beside it. The one place writers wait is
//! the stack-open gate: when the stack reaches
//! `max_stack_open_height`, `execute_batch` blocks until the merger
//! catches up.
//!
//! # Example
//!
//! ```
//! use stratadb::{Collection, CollectionConfig};
//!
//! let collection = Collection::new(CollectionConfig::default());
//! collection.start()?;
//!
//! let mut batch = collection.new_batch(2, 0)?;
//! batch.set(b"hello", b"world")?;
//! batch.set(b"good", b"day")?;
//! collection.execute_batch(batch)?;
//!
//! let snapshot = collection.snapshot()?;
//! assert_eq!(snapshot.get(b"hello")?.as_deref(), Some(&b"world"[..]));
//!
//! collection.close()?;
//! # Ok::<(), stratadb::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod merge;
pub mod persist;

mod batch;
mod collection;
mod iterator;
mod merger;
mod segment;
mod snapshot;
mod stack;
#[cfg(test)]
mod testutil;

pub use batch::Batch;
pub use collection::{Collection, CollectionStats};
pub use config::CollectionConfig;
pub use error::{Error, Result};
pub use iterator::ScanIterator;
pub use merge::MergeOperator;
pub use persist::Persister;
pub use snapshot::Snapshot;
