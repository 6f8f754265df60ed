//! Heap infrastructure shared by every collector.

pub mod arena;
pub mod handles;
pub mod object;
pub mod policy;
pub mod roots;
pub mod space;
pub mod stats;

pub use arena::{Arena, WORD};
pub use handles::HandleTable;
pub use object::{Addr, HeapObject, NULL, ObjectKind, Ref};
pub use policy::GrowthPolicy;
pub use roots::RootStack;
pub use space::ObjectSpace;
pub use stats::GcStats;
