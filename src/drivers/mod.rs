//! Device drivers (spec §4.J: "this component generalises: other device
//! drivers hang off the same interrupt-dispatch, block-cache, and
//! block-device abstractions").

pub mod ata;
pub mod block_device;
