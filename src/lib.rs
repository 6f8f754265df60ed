//! Njord - a pluggable garbage collection framework
//!
//! A [`Heap`] holds scalar and pair objects reachable from a root stack and
//! delegates memory management to one of several interchangeable
//! collectors: reference counting variants, mark-sweep, semispace copying,
//! mark-compaction and lazy sweeping. Every collector is driven through the
//! same mutator API, so programs can be replayed against each of them.

pub mod collectors;
pub mod config;
pub mod error;
pub mod gc;
pub mod heap;

// Re-export commonly used types
pub use collectors::CollectorKind;
pub use config::HeapConfig;
pub use error::{GcError, GcResult};
pub use gc::{GcStats, HeapObject, ObjectKind, Ref};
pub use heap::Heap;
