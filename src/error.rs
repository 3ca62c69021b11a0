use std::fmt::Display;

/// Stratadb errors.
///
/// The enumeration is sealed: every failure the engine can surface is one
/// of these kinds. `IteratorDone` is a signal rather than a failure and is
/// returned by iterator positioning methods when the range is exhausted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A batch preallocation or zero-copy allocation request exceeded the
    /// batch's byte budget or the implementation ceiling.
    AllocTooLarge,
    /// The iterator has no current entry; enumeration is complete.
    IteratorDone,
    /// A Merge record was encountered but no merge operator is configured.
    MergeOperatorNil,
    /// The configured merge operator's full merge reported failure. The
    /// engine does not retry.
    MergeOperatorFullMergeFailed,
    /// The requested code path is intentionally unsupported.
    Unimplemented,
    /// The collection has been closed; mutations and new snapshots are
    /// rejected. Snapshots and iterators taken earlier remain valid.
    Closed,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::AllocTooLarge => write!(f, "alloc-too-large"),
            Error::IteratorDone => write!(f, "iterator-done"),
            Error::MergeOperatorNil => write!(f, "merge-operator-nil"),
            Error::MergeOperatorFullMergeFailed => {
                write!(f, "merge-operator-full-merge-failed")
            }
            Error::Unimplemented => write!(f, "unimplemented"),
            Error::Closed => write!(f, "collection-closed"),
        }
    }
}

/// A stratadb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;
