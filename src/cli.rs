//! Thin CLI driver: a stdio [`FrontendAdapter`] plus `clap` subcommands that
//! wire straight into the protocol engines and workers. No protocol logic
//! lives here — this module only reads files, opens the transport, and
//! translates terminal [`WorkerEvent`]s into the exit codes from SPEC_FULL §6.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};

use crate::adapter::{FrontendAdapter, LogLevel, PathKind, WorkerEvent};
use crate::config::{DEFAULT_BAUD_RATE, DLOAD_HELLO_MAGIC, DLOAD_PARTITION_TABLE_SIZE};
use crate::dload::DloadEngine;
use crate::error::{Error, Result};
use crate::sahara::{
    ClientCommand, ImageTransferRequest, ImageTransferWorker, MemoryReadRequest, MemoryReadWorker,
    Mode, SaharaEngine,
};
use crate::transport::{SerialTransport, Transport};

#[derive(Parser, Debug)]
#[command(name = "sahara-rs", about = "Qualcomm Sahara / Streaming DLOAD host driver")]
pub struct Cli {
    /// Serial port to open (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, global = true)]
    pub port: Option<String>,

    /// Baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, global = true)]
    pub baud: u32,

    #[command(subcommand)]
    pub command: TopCommand,
}

#[derive(Subcommand, Debug)]
pub enum TopCommand {
    /// Sahara protocol operations.
    Sahara {
        #[command(subcommand)]
        command: SaharaCommand,
    },
    /// Streaming DLOAD protocol operations.
    Dload {
        #[command(subcommand)]
        command: DloadCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum SaharaCommand {
    /// Wait for the device HELLO and negotiate into `--mode`.
    Hello {
        #[arg(long, value_enum, default_value_t = CliMode::Command)]
        mode: CliMode,
    },
    /// Negotiate IMAGE_TX_PENDING and stream `--image-path` to the device.
    SendImage {
        #[arg(long)]
        image_path: PathBuf,
        #[arg(long, default_value_t = 0)]
        image_type: u32,
    },
    /// Negotiate MEMORY_DEBUG and dump `--size` bytes from `--address`.
    ReadMemory {
        #[arg(long, value_parser = parse_u32)]
        address: u32,
        #[arg(long)]
        size: u64,
        #[arg(long, default_value_t = 0x1000)]
        step: u32,
        #[arg(long)]
        out_path: PathBuf,
    },
    /// Negotiate COMMAND mode and execute one client command.
    Exec {
        #[arg(long, value_enum)]
        command: CliClientCommand,
    },
    /// Negotiate MEMORY_DEBUG, read the device's memory table, and optionally
    /// pull every file region it references into `--out-dir`.
    DumpTable {
        #[arg(long)]
        out_dir: PathBuf,
        /// Also save the raw, unparsed memory-table bytes to this path.
        #[arg(long)]
        raw_table_path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DloadCommand {
    /// Send the Streaming DLOAD hello.
    Hello {
        #[arg(long, default_value_t = DLOAD_HELLO_MAGIC.to_string())]
        magic: String,
        #[arg(long, default_value_t = 1)]
        version: u8,
        #[arg(long, default_value_t = 1)]
        compatible_version: u8,
        #[arg(long, default_value_t = 0)]
        feature_bits: u32,
    },
    /// Read `--length` bytes at `--address` and hex-dump them to the log.
    ReadAddress {
        #[arg(long, value_parser = parse_u32)]
        address: u32,
        #[arg(long)]
        length: u32,
    },
    /// Write a 512-byte partition table image to the device.
    WritePartitionTable {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse::<u32>().map_err(|e| e.to_string())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum CliMode {
    ImageTx,
    ImageTxComplete,
    MemoryDebug,
    Command,
}

impl From<CliMode> for Mode {
    fn from(m: CliMode) -> Self {
        match m {
            CliMode::ImageTx => Mode::ImageTxPending,
            CliMode::ImageTxComplete => Mode::ImageTxComplete,
            CliMode::MemoryDebug => Mode::MemoryDebug,
            CliMode::Command => Mode::Command,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum CliClientCommand {
    Nop,
    ReadSerialNum,
    ReadMsmHwId,
    ReadOemPkHash,
    SwitchToDmssDload,
    SwitchToStreamingDload,
    ReadDebugData,
    ReadSblVersion,
}

impl From<CliClientCommand> for ClientCommand {
    fn from(c: CliClientCommand) -> Self {
        match c {
            CliClientCommand::Nop => ClientCommand::Nop,
            CliClientCommand::ReadSerialNum => ClientCommand::ReadSerialNum,
            CliClientCommand::ReadMsmHwId => ClientCommand::ReadMsmHwId,
            CliClientCommand::ReadOemPkHash => ClientCommand::ReadOemPkHash,
            CliClientCommand::SwitchToDmssDload => ClientCommand::SwitchToDmssDload,
            CliClientCommand::SwitchToStreamingDload => ClientCommand::SwitchToStreamingDload,
            CliClientCommand::ReadDebugData => ClientCommand::ReadDebugData,
            CliClientCommand::ReadSblVersion => ClientCommand::ReadSblVersion,
        }
    }
}

/// Implements [`FrontendAdapter`] over stdio: logs go through the `log`
/// facade (so they share `env_logger`'s filter and formatting), progress is
/// printed as an overwriting `\r` line, and `confirm`/`select_path` read a
/// line from stdin.
pub struct StdioAdapter;

impl FrontendAdapter for StdioAdapter {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => log::trace!("{message}"),
            LogLevel::Debug => log::debug!("{message}"),
            LogLevel::Info => log::info!("{message}"),
            LogLevel::Warn => log::warn!("{message}"),
            LogLevel::Error => log::error!("{message}"),
        }
    }

    fn progress(&self, current: u64, total: u64, label: &str) {
        if total > 0 {
            eprint!("\r{label}: {current}/{total} bytes");
        } else {
            eprint!("\r{label}: {current} bytes");
        }
        let _ = io::stderr().flush();
    }

    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{prompt} [y/N] ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }

    fn select_path(&self, kind: PathKind, _filters: &[&str]) -> Option<PathBuf> {
        eprint!("path for {kind:?}: ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        io::stdin().read_line(&mut line).ok()?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

/// Collapse an `anyhow` chain (used for host-side file access, where
/// `.context(...)` gives a more readable error than a bare `io::Error`) into
/// this crate's error taxonomy.
fn local_io<T>(r: anyhow::Result<T>) -> Result<T> {
    r.map_err(|e| Error::LocalIo(format!("{e:#}")))
}

fn open_transport(cli: &Cli) -> Result<SerialTransport> {
    let port = cli.port.as_deref().ok_or_else(|| {
        Error::LocalIo("--port is required".into())
    })?;
    SerialTransport::open(port, cli.baud)
}

/// Run the parsed CLI, returning the [`Error`] (if any) the caller should
/// map to an exit code via [`Error::exit_code`].
pub fn run(cli: Cli, adapter: &dyn FrontendAdapter) -> Result<()> {
    match &cli.command {
        TopCommand::Sahara { command } => run_sahara(&cli, command, adapter),
        TopCommand::Dload { command } => run_dload(&cli, command, adapter),
    }
}

/// Per SPEC_FULL §7's propagation policy: on any non-recoverable error the
/// foreground forces the transport closed rather than leaving it open for a
/// caller to reuse by mistake.
fn close_on_poison(transport: &mut dyn Transport, err: Error) -> Error {
    if !err.is_recoverable() {
        let _ = transport.close();
    }
    err
}

fn run_sahara(cli: &Cli, command: &SaharaCommand, adapter: &dyn FrontendAdapter) -> Result<()> {
    let mut transport = open_transport(cli)?;
    let mut engine = SaharaEngine::new();

    let outcome: Result<()> = (|| match command {
        SaharaCommand::Hello { mode } => {
            engine.wait_hello(&mut transport)?;
            engine.send_hello_response(&mut transport, (*mode).into())?;
            adapter.log(
                LogLevel::Info,
                &format!("negotiated version {}, mode {:?}", engine.device.version, engine.mode),
            );
            Ok(())
        }
        SaharaCommand::SendImage { image_path, image_type } => {
            engine.wait_hello(&mut transport)?;
            engine.send_hello_response(&mut transport, Mode::ImageTxPending)?;
            let file_size = local_io(
                std::fs::metadata(image_path)
                    .with_context(|| format!("statting image {image_path:?}")),
            )?
            .len();
            let request = ImageTransferRequest {
                image_type: *image_type,
                image_path: image_path.clone(),
                file_size,
            };
            let cancel = Arc::new(AtomicBool::new(false));
            let (tx, rx) = mpsc::channel();
            let result = run_with_progress(adapter, "image transfer", file_size, rx, || {
                ImageTransferWorker::run(&mut engine, &mut transport, &request, &cancel, &tx)
            });
            if result.is_ok() && adapter.confirm("image transfer complete; send DONE now?") {
                engine.send_done(&mut transport)?;
                engine.next_event(&mut transport)?;
            }
            result
        }
        SaharaCommand::ReadMemory { address, size, step, out_path } => {
            engine.wait_hello(&mut transport)?;
            engine.send_hello_response(&mut transport, Mode::MemoryDebug)?;
            let event = engine.next_event(&mut transport)?;
            if let crate::sahara::SaharaEvent::MemoryDebug { table_address, table_length } = event {
                adapter.log(
                    LogLevel::Info,
                    &format!("MEMORY_DEBUG table at 0x{table_address:08x} len {table_length}"),
                );
            }
            if *size > 1024 * 1024 && !adapter.confirm(&format!("pull {size} bytes from the device?")) {
                return Err(Error::Cancelled);
            }
            let request = MemoryReadRequest {
                address: *address,
                size: *size,
                step_size: *step,
                out_file_path: out_path.clone(),
            };
            let max_pkt = engine.device.max_command_packet_size;
            let cancel = Arc::new(AtomicBool::new(false));
            let (tx, rx) = mpsc::channel();
            run_with_progress(adapter, "memory read", *size, rx, || {
                MemoryReadWorker::run(&mut engine, &mut transport, &request, max_pkt, &cancel, &tx)
            })
        }
        SaharaCommand::Exec { command } => {
            engine.wait_hello(&mut transport)?;
            engine.send_hello_response(&mut transport, Mode::Command)?;
            engine.next_event(&mut transport)?; // CmdReady
            let client_command: ClientCommand = (*command).into();
            engine.cmd_exec(&mut transport, client_command)?;
            let event = engine.next_event(&mut transport)?;
            let data_length = match event {
                crate::sahara::SaharaEvent::CmdExecResponse { data_length, .. } => data_length,
                other => return Err(Error::Protocol(format!("unexpected event: {other:?}"))),
            };
            let data = engine.cmd_exec_data(&mut transport, client_command, data_length)?;
            adapter.log(LogLevel::Info, &format!("response:\n{}", crate::hexdump::hexdump(&data)));
            Ok(())
        }
        SaharaCommand::DumpTable { out_dir, raw_table_path } => {
            engine.wait_hello(&mut transport)?;
            engine.send_hello_response(&mut transport, Mode::MemoryDebug)?;
            let event = engine.next_event(&mut transport)?;
            let (table_address, table_length) = match event {
                crate::sahara::SaharaEvent::MemoryDebug { table_address, table_length } => {
                    (table_address, table_length)
                }
                other => return Err(Error::Protocol(format!("unexpected event: {other:?}"))),
            };
            adapter.log(
                LogLevel::Info,
                &format!("memory table at 0x{table_address:08x}, {table_length} bytes"),
            );

            let max_pkt = engine.device.max_command_packet_size;
            let raw_table = crate::sahara::read_raw_table(
                &mut engine,
                &mut transport,
                table_address,
                table_length,
                max_pkt,
            )?;
            let entries = crate::sahara::wire::parse_table(&raw_table);
            adapter.log(LogLevel::Info, &format!("memory table references {} locations", entries.len()));
            for entry in &entries {
                adapter.log(
                    LogLevel::Info,
                    &format!(
                        "{} ({}) - address 0x{:08x} size {}",
                        entry.name_str(),
                        entry.filename_str(),
                        entry.address,
                        entry.size
                    ),
                );
            }

            if let Some(path) = raw_table_path {
                if adapter.confirm("save the raw memory table to a file?") {
                    local_io(std::fs::write(path, &raw_table).with_context(|| format!("writing raw table to {path:?}")))?;
                }
            }

            if !adapter.confirm(&format!("pull all {} files referenced in the memory table?", entries.len())) {
                return Ok(());
            }

            let mut queue = crate::sahara::MemoryReadQueue::new();
            for request in crate::sahara::build_batch_requests(&entries, out_dir, max_pkt) {
                if request.size >= crate::config::SAHARA_LARGE_FILE_CONFIRM_THRESHOLD
                    && !adapter.confirm(&format!(
                        "pull large file {:?} ({} bytes), or skip it?",
                        request.out_file_path, request.size
                    ))
                {
                    adapter.log(LogLevel::Info, &format!("skipping {:?}", request.out_file_path));
                    continue;
                }
                queue.push_back(request);
            }

            let cancel = Arc::new(AtomicBool::new(false));
            while let Some(request) = queue.pop_next() {
                let (tx, rx) = mpsc::channel();
                let size = request.size;
                run_with_progress(adapter, "memory table dump", size, rx, || {
                    MemoryReadWorker::run(&mut engine, &mut transport, &request, max_pkt, &cancel, &tx)
                })?;
            }
            Ok(())
        }
    })();

    outcome.map_err(|e| close_on_poison(&mut transport, e))
}

fn run_dload(cli: &Cli, command: &DloadCommand, adapter: &dyn FrontendAdapter) -> Result<()> {
    let mut transport = open_transport(cli)?;
    let mut engine = DloadEngine::new();

    let outcome: Result<()> = (|| match command {
        DloadCommand::Hello { magic, version, compatible_version, feature_bits } => {
            engine.send_hello(&mut transport, magic, *version, *compatible_version, *feature_bits)?;
            let hello = engine.device.hello.as_ref().unwrap();
            adapter.log(
                LogLevel::Info,
                &format!(
                    "flash_id=0x{:x} window={} max_block={}",
                    hello.flash_id, hello.window_size, hello.max_preferred_block_size
                ),
            );
            Ok(())
        }
        DloadCommand::ReadAddress { address, length } => {
            let data = engine.read_address(&mut transport, *address, *length)?;
            adapter.log(LogLevel::Info, &format!("read {} bytes:\n{}", data.len(), crate::hexdump::hexdump(&data)));
            Ok(())
        }
        DloadCommand::WritePartitionTable { path, overwrite } => {
            let table = local_io(std::fs::read(path).with_context(|| format!("reading partition table {path:?}")))?;
            if table.len() != DLOAD_PARTITION_TABLE_SIZE {
                return Err(Error::LocalIo(format!(
                    "{path:?} is {} bytes, expected {DLOAD_PARTITION_TABLE_SIZE}",
                    table.len()
                )));
            }
            let status = engine.write_partition_table(&mut transport, &table, *overwrite)?;
            adapter.log(LogLevel::Info, &format!("write_partition_table status={status}"));
            if status != 0 {
                return Err(Error::DeviceReported(format!("partition table write status {status}")));
            }
            Ok(())
        }
    })();

    outcome.map_err(|e| close_on_poison(&mut transport, e))
}

/// Runs `op` (a worker's `run`, invoked directly rather than on a spawned
/// thread, since it borrows the engine and transport for its lifetime) and
/// then drains `rx`, forwarding each [`WorkerEvent`] to the adapter's
/// progress/log surface.
fn run_with_progress<F>(adapter: &dyn FrontendAdapter, label: &str, total: u64, rx: mpsc::Receiver<WorkerEvent>, op: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let outcome = op();
    for event in rx.try_iter() {
        match event {
            WorkerEvent::ChunkReady { cumulative, .. } => adapter.progress(cumulative, total, label),
            WorkerEvent::Complete { out_size } => {
                adapter.progress(out_size, total, label);
                info!("{label} complete: {out_size} bytes");
            }
            WorkerEvent::Error { message } => error!("{label} failed: {message}"),
            WorkerEvent::Cancelled => adapter.log(LogLevel::Warn, &format!("{label} cancelled")),
        }
    }
    outcome
}
