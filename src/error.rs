//! Error types shared by every collector.

use crate::gc::Ref;

/// Errors reported by heap operations.
///
/// Configuration and capacity errors are unrecoverable for the heap that
/// produced them; the caller decides whether to abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GcError {
    /// The requested collector name is not registered.
    #[error("unknown collector `{0}`")]
    UnknownCollector(String),

    /// Invalid heap configuration.
    #[error("invalid heap configuration: {0}")]
    Config(String),

    /// Root stack is full.
    #[error("root stack overflow (capacity {0})")]
    StackOverflow(usize),

    /// Root stack is empty (or holds fewer entries than an operation needs).
    #[error("root stack underflow")]
    StackUnderflow,

    /// The arena cannot satisfy an allocation even after a collection.
    #[error("out of memory: requested {requested} bytes, arena holds {capacity} bytes")]
    OutOfMemory { requested: usize, capacity: usize },

    /// The reference names an object that has been reclaimed.
    #[error("dangling reference {0}")]
    DanglingRef(Ref),

    /// A pair operation was applied to a scalar.
    #[error("{0} is not a pair")]
    NotAPair(Ref),

    /// A scalar operation was applied to a pair.
    #[error("{0} is not a scalar")]
    NotAScalar(Ref),
}

/// Result alias used throughout the crate.
pub type GcResult<T> = Result<T, GcError>;
