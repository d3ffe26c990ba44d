//! Concurrency primitives (spec §4.A): the counted IRQ-disabling spinlock,
//! the sleepable mutex, the wait-queue, an ID allocator, a fixed-capacity
//! ring buffer, and an ordered-map standing in for the red-black tree.
//!
//! Mutual exclusion on this single-CPU target is obtained by disabling
//! interrupts around critical sections (spec §1); there is no true SMP
//! spinlock here, only the IRQ-nesting discipline described in §4.D/§5.

pub mod idalloc;
pub mod mutex;
pub mod ordered_map;
pub mod ring;
pub mod spinlock;
pub mod waitqueue;

pub use idalloc::IdAllocator;
pub use mutex::Mutex;
pub use ordered_map::OrderedMap;
pub use ring::RingBuffer;
pub use spinlock::IrqSpinlock;
pub use waitqueue::WaitQueue;
