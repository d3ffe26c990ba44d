//! Architecture glue: port I/O, the 8259 PIC, the IDT and the per-vector
//! interrupt dispatcher (spec §4.B), and the raw interrupt-enable/disable
//! primitives the counted spinlock (§4.A) is built from.

pub mod gdt;
pub mod idt;
pub mod irq;
pub mod pic;
pub mod port;

pub use irq::{disable_interrupts, enable_interrupts, interrupts_enabled};
