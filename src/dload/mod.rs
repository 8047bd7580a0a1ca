//! Streaming DLOAD: Qualcomm's secondary download protocol, HDLC-framed,
//! used for flash operations, security mode, and partition-table writes.
//! See SPEC_FULL §4.4.

pub mod engine;
pub mod wire;

pub use engine::{DeviceState, DloadEngine};
pub use wire::{CommandId, HelloInfo};
