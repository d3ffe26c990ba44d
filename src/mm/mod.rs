//! Virtual memory (spec §4.E): per-task address spaces, fork-time page
//! table cloning, the page-fault handler, and user-pointer validation with
//! fault-restart.

pub mod address_space;
pub mod pagefault;
pub mod user_ptr;
