//! Long-running transfer workers layered on top of [`super::engine::SaharaEngine`].
//!
//! Each worker owns its engine exclusively for the duration of one operation,
//! runs on a dedicated thread, and emits [`WorkerEvent`]s over an ordered
//! `mpsc` channel. The only state shared with the foreground besides the
//! channel is the cancel flag.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::adapter::WorkerEvent;
use crate::config::DEFAULT_BULK_TIMEOUT;
use crate::error::{Error, Result};
use crate::transport::Transport;

use super::engine::{EngineMode, SaharaEngine, SaharaEvent};
use super::wire::MemoryTableEntry;

/// Shared cooperative cancel flag. Cloned (via `Arc`) between the foreground
/// and a worker thread; the worker only observes it at chunk boundaries.
pub type CancelFlag = Arc<AtomicBool>;

/// One memory-read request, as described in SPEC_FULL §3/§4.5.
#[derive(Debug, Clone)]
pub struct MemoryReadRequest {
    pub address: u32,
    pub size: u64,
    pub step_size: u32,
    pub out_file_path: PathBuf,
}

/// Runs one [`MemoryReadRequest`] to completion, cancellation, or error.
///
/// `max_command_packet_size` is the device-advertised ceiling from the
/// negotiated `DeviceState`; the worker, not the engine, is responsible for
/// splitting a request larger than either `step_size` or this ceiling.
pub struct MemoryReadWorker;

impl MemoryReadWorker {
    pub fn run(
        engine: &mut SaharaEngine,
        transport: &mut dyn Transport,
        request: &MemoryReadRequest,
        max_command_packet_size: u32,
        cancel: &CancelFlag,
        events: &Sender<WorkerEvent>,
    ) -> Result<()> {
        if engine.mode != EngineMode::MemoryDebug {
            let err = Error::Protocol("memory read requested outside MEMORY_DEBUG".into());
            let _ = events.send(WorkerEvent::Error { message: err.to_string() });
            return Err(err);
        }

        let mut file = match File::create(&request.out_file_path) {
            Ok(f) => f,
            Err(e) => {
                let err = Error::LocalIo(format!("creating {:?}: {e}", request.out_file_path));
                let _ = events.send(WorkerEvent::Error { message: err.to_string() });
                return Err(err);
            }
        };

        let step = request.step_size.min(max_command_packet_size).max(1);
        let mut address = request.address;
        let mut remaining = request.size;
        let mut out_size: u64 = 0;

        while remaining > 0 {
            if cancel.load(Ordering::SeqCst) {
                drop(file);
                let _ = events.send(WorkerEvent::Cancelled);
                return Err(Error::Cancelled);
            }

            let this_chunk = remaining.min(step as u64) as u32;
            if let Err(e) = engine.request_memory_read(transport, address, this_chunk) {
                drop(file);
                let _ = events.send(WorkerEvent::Error { message: e.to_string() });
                return Err(e);
            }

            let chunk = match engine.read_raw(transport, this_chunk as usize, DEFAULT_BULK_TIMEOUT) {
                Ok(c) => c,
                Err(e) => {
                    drop(file);
                    let _ = events.send(WorkerEvent::Error { message: e.to_string() });
                    return Err(e);
                }
            };

            if cancel.load(Ordering::SeqCst) {
                // The chunk already arrived; writing it keeps the file and the
                // engine's byte accounting consistent before we stop.
                let _ = file.write_all(&chunk);
                drop(file);
                let _ = events.send(WorkerEvent::Cancelled);
                return Err(Error::Cancelled);
            }

            if let Err(e) = file.write_all(&chunk) {
                drop(file);
                let err = Error::LocalIo(format!("writing memory dump: {e}"));
                let _ = events.send(WorkerEvent::Error { message: err.to_string() });
                return Err(err);
            }

            out_size += chunk.len() as u64;
            address = address.wrapping_add(chunk.len() as u32);
            remaining -= chunk.len() as u64;

            let _ = events.send(WorkerEvent::ChunkReady {
                last_chunk_size: chunk.len(),
                cumulative: out_size,
            });
        }

        let _ = events.send(WorkerEvent::Complete { out_size });
        info!("memory read complete: {out_size} bytes to {:?}", request.out_file_path);
        Ok(())
    }
}

/// Read the raw `table_length` bytes of the memory table at `table_address`
/// into memory, chunked at `max_command_packet_size` like any other
/// memory-debug read. This is the "raw table dump" bytes of SPEC_FULL §6 —
/// callers wanting the parsed view should pass the result to
/// [`crate::sahara::wire::parse_table`].
pub fn read_raw_table(
    engine: &mut SaharaEngine,
    transport: &mut dyn Transport,
    table_address: u32,
    table_length: u32,
    max_command_packet_size: u32,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(table_length as usize);
    let mut address = table_address;
    let mut remaining = table_length;
    let step = max_command_packet_size.max(1);
    while remaining > 0 {
        let this_chunk = remaining.min(step);
        engine.request_memory_read(transport, address, this_chunk)?;
        let chunk = engine.read_raw(transport, this_chunk as usize, DEFAULT_BULK_TIMEOUT)?;
        address = address.wrapping_add(this_chunk);
        remaining -= this_chunk;
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Build the batch of [`MemoryReadRequest`]s for a memory-table dump: one
/// entry per table row, writing to `out_dir` joined with the entry's
/// `filename`. Zero-size entries are skipped here (but remain present in the
/// raw table bytes saved separately), per SPEC_FULL §4.3's tie-break rule.
pub fn build_batch_requests(
    entries: &[MemoryTableEntry],
    out_dir: &std::path::Path,
    step_size: u32,
) -> Vec<MemoryReadRequest> {
    entries
        .iter()
        .filter(|e| e.size > 0)
        .map(|e| MemoryReadRequest {
            address: e.address,
            size: e.size as u64,
            step_size,
            out_file_path: out_dir.join(e.filename_str()),
        })
        .collect()
}

/// A FIFO queue of pending memory-read requests, owned by the foreground.
/// Workers never touch it directly.
#[derive(Debug, Default)]
pub struct MemoryReadQueue {
    pending: std::collections::VecDeque<MemoryReadRequest>,
}

impl MemoryReadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a batch dump request at the back of the queue.
    pub fn push_back(&mut self, request: MemoryReadRequest) {
        self.pending.push_back(request);
    }

    /// Enqueue a manual single read ahead of any queued batch work.
    pub fn push_front(&mut self, request: MemoryReadRequest) {
        self.pending.push_front(request);
    }

    /// Dequeue the next request to run, if any.
    pub fn pop_next(&mut self) -> Option<MemoryReadRequest> {
        self.pending.pop_front()
    }

    /// Drop all not-yet-started entries. The entry currently running (if
    /// any) is not tracked here and is cancelled separately via the shared
    /// [`CancelFlag`].
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// One image-transfer request, as described in SPEC_FULL §3/§4.6.
#[derive(Debug, Clone)]
pub struct ImageTransferRequest {
    pub image_type: u32,
    pub image_path: PathBuf,
    pub file_size: u64,
}

/// Runs one image transfer to completion, cancellation, or error, driving
/// the engine's `IMAGE_TX_PENDING` loop until `END_IMAGE_TX`.
///
/// Cancellation observed mid-chunk does not abandon the in-flight
/// `READ_DATA`: the worker always finishes answering it before returning
/// `Cancelled`, so the device is never left waiting and the engine is never
/// poisoned by a cancel.
pub struct ImageTransferWorker;

impl ImageTransferWorker {
    pub fn run(
        engine: &mut SaharaEngine,
        transport: &mut dyn Transport,
        request: &ImageTransferRequest,
        cancel: &CancelFlag,
        events: &Sender<WorkerEvent>,
    ) -> Result<()> {
        let mut file = match OpenOptions::new().read(true).open(&request.image_path) {
            Ok(f) => f,
            Err(e) => {
                let err = Error::LocalIo(format!("opening {:?}: {e}", request.image_path));
                let _ = events.send(WorkerEvent::Error { message: err.to_string() });
                return Err(err);
            }
        };

        let mut bytes_transferred: u64 = 0;

        loop {
            if cancel.load(Ordering::SeqCst) {
                let _ = events.send(WorkerEvent::Cancelled);
                return Err(Error::Cancelled);
            }

            let event = match engine.next_event(transport) {
                Ok(e) => e,
                Err(e) => {
                    let _ = events.send(WorkerEvent::Error { message: e.to_string() });
                    return Err(e);
                }
            };

            match event {
                SaharaEvent::ReadData { offset, size, .. } => {
                    let data = read_image_slice(&mut file, offset as u64, size as usize)?;

                    if cancel.load(Ordering::SeqCst) {
                        // The device is already blocked on this READ_DATA;
                        // answer it before honoring the cancel so the engine
                        // is never left desynchronized.
                        if let Err(e) = engine.send_image_chunk(transport, &data, size as usize) {
                            let _ = events.send(WorkerEvent::Error { message: e.to_string() });
                            return Err(e);
                        }
                        bytes_transferred += size as u64;
                        let _ = events.send(WorkerEvent::ChunkReady {
                            last_chunk_size: size as usize,
                            cumulative: bytes_transferred,
                        });
                        let _ = events.send(WorkerEvent::Cancelled);
                        return Err(Error::Cancelled);
                    }

                    if let Err(e) = engine.send_image_chunk(transport, &data, size as usize) {
                        let _ = events.send(WorkerEvent::Error { message: e.to_string() });
                        return Err(e);
                    }
                    bytes_transferred += size as u64;
                    let _ = events.send(WorkerEvent::ChunkReady {
                        last_chunk_size: size as usize,
                        cumulative: bytes_transferred,
                    });
                }
                SaharaEvent::EndImageTx { status, .. } => {
                    if status != 0 {
                        let err = Error::DeviceReported(format!("END_IMAGE_TX status {status}"));
                        let _ = events.send(WorkerEvent::Error { message: err.to_string() });
                        return Err(err);
                    }
                    let _ = events.send(WorkerEvent::Complete { out_size: bytes_transferred });
                    info!("image transfer complete: {bytes_transferred} bytes");
                    return Ok(());
                }
                other => {
                    let err = Error::Protocol(format!("unexpected event during image transfer: {other:?}"));
                    let _ = events.send(WorkerEvent::Error { message: err.to_string() });
                    return Err(err);
                }
            }
        }
    }
}

/// Read `size` bytes at `offset` from `file`, zero-padding on a short read
/// and warning rather than truncating the response the device expects.
fn read_image_slice(file: &mut File, offset: u64, size: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::LocalIo(format!("seeking to {offset}: {e}")))?;
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    loop {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(Error::LocalIo(format!("reading image: {e}"))),
        }
        if filled == size {
            break;
        }
    }
    if filled < size {
        warn!("image file shorter than requested chunk ({filled} < {size}); zero-padding");
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sahara::wire::{CommandId, EndImageTxPacket, ReadDataPacket};
    use crate::test_helpers::temp::TestContext;
    use crate::transport::ChannelTransport;
    use std::sync::mpsc;
    use zerocopy::AsBytes;

    fn push_read_data(t: &mut ChannelTransport, image_id: u32, offset: u32, size: u32) {
        let p = ReadDataPacket {
            command: CommandId::ReadData as u32,
            length: ReadDataPacket::WIRE_LEN as u32,
            image_id,
            offset,
            size,
        };
        t.push_inbound(p.as_bytes());
    }

    fn push_end_image_tx(t: &mut ChannelTransport, image_id: u32, status: u32) {
        let p = EndImageTxPacket {
            command: CommandId::EndImageTx as u32,
            length: EndImageTxPacket::WIRE_LEN as u32,
            image_id,
            status,
        };
        t.push_inbound(p.as_bytes());
    }

    #[test]
    fn image_transfer_three_chunks_then_complete() {
        let ctx = TestContext::new();
        let image_path = ctx.create_image("image.mbn", 100, 0xAB);

        let mut t = ChannelTransport::new();
        push_read_data(&mut t, 0x0D, 0, 40);
        push_read_data(&mut t, 0x0D, 40, 40);
        push_read_data(&mut t, 0x0D, 80, 20);
        push_end_image_tx(&mut t, 0x0D, 0);

        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::ImageTxPending;
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let request = ImageTransferRequest {
            image_type: 0x0D,
            image_path,
            file_size: 100,
        };

        ImageTransferWorker::run(&mut engine, &mut t, &request, &cancel, &tx).unwrap();

        let received: Vec<_> = rx.try_iter().collect();
        let total: usize = received
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::ChunkReady { last_chunk_size, .. } => Some(*last_chunk_size),
                _ => None,
            })
            .sum();
        assert_eq!(total, 100);
        assert!(matches!(received.last(), Some(WorkerEvent::Complete { out_size: 100 })));
        // Image bytes were written verbatim, no framing.
        assert_eq!(t.outbound, vec![0xABu8; 100]);
    }

    #[test]
    fn image_transfer_nonzero_status_is_error() {
        let ctx = TestContext::new();
        let image_path = ctx.create_image("image.mbn", 10, 0x11);

        let mut t = ChannelTransport::new();
        push_read_data(&mut t, 0x0D, 0, 10);
        push_end_image_tx(&mut t, 0x0D, 7);

        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::ImageTxPending;
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let request = ImageTransferRequest { image_type: 0x0D, image_path, file_size: 10 };

        let err = ImageTransferWorker::run(&mut engine, &mut t, &request, &cancel, &tx).unwrap_err();
        assert!(matches!(err, Error::DeviceReported(_)));
        let received: Vec<_> = rx.try_iter().collect();
        assert!(matches!(received.last(), Some(WorkerEvent::Error { .. })));
    }

    #[test]
    fn memory_read_chunked_matches_scenario_three() {
        let ctx = TestContext::new();
        let out_path = ctx.path("dump.bin");

        let mut t = ChannelTransport::new();
        // Two chunks of data the "device" will return for the two
        // MEMORY_READ requests the worker is expected to issue: a full
        // 4096-byte step, then the 904-byte remainder.
        t.push_inbound(&vec![0x11u8; 4096]);
        t.push_inbound(&vec![0x33u8; 904]);

        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::MemoryDebug;
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let request = MemoryReadRequest {
            address: 0x1000_0000,
            size: 5000,
            step_size: 0x1000,
            out_file_path: out_path.clone(),
        };

        MemoryReadWorker::run(&mut engine, &mut t, &request, 0x1000, &cancel, &tx).unwrap();

        let received: Vec<_> = rx.try_iter().collect();
        let sizes: Vec<usize> = received
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::ChunkReady { last_chunk_size, .. } => Some(*last_chunk_size),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![4096, 904]);
        let out_size = std::fs::metadata(&out_path).unwrap().len();
        assert_eq!(out_size, 5000);
    }

    #[test]
    fn memory_read_cancelled_stops_before_completion() {
        let ctx = TestContext::new();
        let out_path = ctx.path("dump.bin");

        let mut t = ChannelTransport::new();
        t.push_inbound(&vec![0x11u8; 0x1000]);

        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::MemoryDebug;
        let cancel = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let request = MemoryReadRequest {
            address: 0x1000_0000,
            size: 10 * 1024 * 1024,
            step_size: 0x1000,
            out_file_path: out_path,
        };

        let err = MemoryReadWorker::run(&mut engine, &mut t, &request, 0x1000, &cancel, &tx).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        let received: Vec<_> = rx.try_iter().collect();
        assert!(matches!(received.last(), Some(WorkerEvent::Cancelled)));
    }

    #[test]
    fn queue_discipline_fifo_and_cancel_clears() {
        let mut queue = MemoryReadQueue::new();
        queue.push_back(MemoryReadRequest {
            address: 1,
            size: 1,
            step_size: 1,
            out_file_path: "a".into(),
        });
        queue.push_back(MemoryReadRequest {
            address: 2,
            size: 1,
            step_size: 1,
            out_file_path: "b".into(),
        });
        queue.push_front(MemoryReadRequest {
            address: 0,
            size: 1,
            step_size: 1,
            out_file_path: "manual".into(),
        });
        assert_eq!(queue.len(), 3);
        let first = queue.pop_next().unwrap();
        assert_eq!(first.address, 0);
        queue.cancel_all();
        assert!(queue.is_empty());
    }

    fn table_entry(name: &str, filename: &str, address: u32, size: u32) -> MemoryTableEntry {
        let mut name_field = [0u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN];
        name_field[..name.len()].copy_from_slice(name.as_bytes());
        let mut filename_field = [0u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN];
        filename_field[..filename.len()].copy_from_slice(filename.as_bytes());
        MemoryTableEntry { name: name_field, filename: filename_field, address, size }
    }

    #[test]
    fn read_raw_table_chunks_at_max_command_packet_size() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&[0x11u8; 16]);
        t.push_inbound(&[0x22u8; 8]);

        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::MemoryDebug;
        let raw = read_raw_table(&mut engine, &mut t, 0x2000_0000, 24, 16).unwrap();
        assert_eq!(raw.len(), 24);
        assert_eq!(&raw[..16], &[0x11u8; 16][..]);
        assert_eq!(&raw[16..], &[0x22u8; 8][..]);
    }

    #[test]
    fn build_batch_requests_skips_zero_size_entries() {
        let entries = vec![
            table_entry("DDR", "ddr.bin", 0x1000, 256),
            table_entry("QPST", "qpst.bin", 0x2000, 0),
            table_entry("MISC", "misc.bin", 0x3000, 512),
        ];
        let ctx = TestContext::new();
        let requests = build_batch_requests(&entries, ctx.root(), 0x1000);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].out_file_path, ctx.root().join("ddr.bin"));
        assert_eq!(requests[1].size, 512);
    }
}
