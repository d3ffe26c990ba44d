//! Boot-time UEFI helpers used only by `main` before handing off to the
//! library crate's subsystems.

pub mod memory;
