//! Sahara: Qualcomm's primary boot loader dialog for image upload, memory
//! debug, and client commands. See SPEC_FULL §4.3–§4.6.

pub mod engine;
pub mod wire;
pub mod workers;

pub use engine::{DeviceState, EngineMode, SaharaEngine, SaharaEvent};
pub use wire::{ClientCommand, CommandId, MemoryTableEntry, Mode};
pub use workers::{
    build_batch_requests, read_raw_table, CancelFlag, ImageTransferRequest, ImageTransferWorker,
    MemoryReadQueue, MemoryReadRequest, MemoryReadWorker,
};
