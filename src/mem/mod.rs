//! Memory management
//!
//! The deterministic heap backing kernel allocations, the fixed-block
//! object pool, and the bounded ring buffer used for queue storage.

pub mod heap;
pub mod pool;
pub mod ring;

pub use heap::{Heap, HeapStats};
pub use pool::MemoryPool;
pub use ring::BoundedRing;
