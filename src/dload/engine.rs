//! Streaming DLOAD protocol engine.
//!
//! Every operation is one HDLC-framed command, zero or more framed
//! continuations, and one framed response (SPEC_FULL §4.4). A response
//! beginning with the `ERROR` or `LOG` command ID is intercepted here and
//! never reaches the caller as a successful payload.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{DEFAULT_BULK_TIMEOUT, DEFAULT_CONTROL_TIMEOUT, DLOAD_PARTITION_TABLE_SIZE};
use crate::error::{Error, Result};
use crate::hdlc::{self, HdlcDecoder};
use crate::transport::Transport;

use super::wire::{self, CommandId, HelloInfo};

/// Streaming DLOAD device-side session state (SPEC_FULL §3).
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub hello: Option<HelloInfo>,
    pub open_mode: Option<u8>,
    pub open_multi_mode: Option<u8>,
    pub last_error: Option<String>,
    pub last_log: Option<String>,
}

/// Drives one Streaming DLOAD session over a [`Transport`].
pub struct DloadEngine {
    pub device: DeviceState,
}

impl DloadEngine {
    pub fn new() -> Self {
        Self { device: DeviceState::default() }
    }

    /// `send_hello(magic, version, compatible_version, feature_bits)`.
    pub fn send_hello(
        &mut self,
        transport: &mut dyn Transport,
        magic: &str,
        version: u8,
        compatible_version: u8,
        feature_bits: u32,
    ) -> Result<()> {
        let req = wire::encode_hello_request(magic, version, compatible_version, feature_bits);
        let body = self.exchange(transport, &req, CommandId::HelloResp, DEFAULT_CONTROL_TIMEOUT)?;
        let hello = wire::parse_hello_response(&body)?;
        info!(
            "dload HELLO: version={} compat={} flash_id=0x{:x} max_block={}",
            hello.version, hello.compatible_version, hello.flash_id, hello.max_preferred_block_size
        );
        self.device.hello = Some(hello);
        Ok(())
    }

    pub fn send_unlock(&mut self, transport: &mut dyn Transport, code: [u8; 8]) -> Result<()> {
        let req = wire::encode_unlock_request(code);
        self.exchange(transport, &req, CommandId::UnlockResp, DEFAULT_CONTROL_TIMEOUT)?;
        Ok(())
    }

    pub fn set_security_mode(&mut self, transport: &mut dyn Transport, mode: u8) -> Result<()> {
        let req = wire::encode_security_mode_request(mode);
        self.exchange(transport, &req, CommandId::SecurityModeResp, DEFAULT_CONTROL_TIMEOUT)?;
        Ok(())
    }

    pub fn send_nop(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let req = wire::encode_simple_request(CommandId::NopReq);
        self.exchange(transport, &req, CommandId::NopResp, DEFAULT_CONTROL_TIMEOUT)?;
        Ok(())
    }

    pub fn send_reset(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let req = wire::encode_simple_request(CommandId::ResetReq);
        self.exchange(transport, &req, CommandId::ResetResp, DEFAULT_CONTROL_TIMEOUT)?;
        Ok(())
    }

    pub fn send_power_off(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let req = wire::encode_simple_request(CommandId::PowerOffReq);
        self.exchange(transport, &req, CommandId::PowerOffResp, DEFAULT_CONTROL_TIMEOUT)?;
        Ok(())
    }

    pub fn read_ecc(&mut self, transport: &mut dyn Transport) -> Result<u8> {
        let req = wire::encode_read_ecc_request();
        let body = self.exchange(transport, &req, CommandId::ReadEccResp, DEFAULT_CONTROL_TIMEOUT)?;
        body.first().copied().ok_or_else(|| Error::Protocol("READ_ECC response empty".into()))
    }

    pub fn set_ecc(&mut self, transport: &mut dyn Transport, status: u8) -> Result<()> {
        let req = wire::encode_set_ecc_request(status);
        self.exchange(transport, &req, CommandId::SetEccResp, DEFAULT_CONTROL_TIMEOUT)?;
        Ok(())
    }

    pub fn open_mode(&mut self, transport: &mut dyn Transport, mode: u8) -> Result<()> {
        let req = wire::encode_open_request(mode);
        self.exchange(transport, &req, CommandId::OpenResp, DEFAULT_CONTROL_TIMEOUT)?;
        self.device.open_mode = Some(mode);
        Ok(())
    }

    pub fn close_mode(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let req = wire::encode_close_request();
        self.exchange(transport, &req, CommandId::CloseResp, DEFAULT_CONTROL_TIMEOUT)?;
        self.device.open_mode = None;
        Ok(())
    }

    pub fn open_multi_image(&mut self, transport: &mut dyn Transport, image_type: u8) -> Result<()> {
        let req = wire::encode_open_multi_request(image_type);
        self.exchange(transport, &req, CommandId::OpenMultiResp, DEFAULT_CONTROL_TIMEOUT)?;
        self.device.open_multi_mode = Some(image_type);
        Ok(())
    }

    /// `read_address(addr, length)`, chunked internally at
    /// `hello.max_preferred_block_size` if the device has said hello.
    pub fn read_address(&mut self, transport: &mut dyn Transport, address: u32, length: u32) -> Result<Vec<u8>> {
        let chunk_cap = self
            .device
            .hello
            .as_ref()
            .map(|h| h.max_preferred_block_size)
            .filter(|&sz| sz > 0)
            .unwrap_or(length.max(1));

        let mut out = Vec::with_capacity(length as usize);
        let mut addr = address;
        let mut remaining = length;
        while remaining > 0 {
            let this_len = remaining.min(chunk_cap);
            let req = wire::encode_read_address_request(addr, this_len);
            let body = self.exchange(transport, &req, CommandId::ReadAddrResp, DEFAULT_BULK_TIMEOUT)?;
            if body.len() < this_len as usize {
                return Err(Error::Protocol(format!(
                    "READ_ADDR_RESP shorter than requested: {} < {this_len}",
                    body.len()
                )));
            }
            out.extend_from_slice(&body[..this_len as usize]);
            addr = addr.wrapping_add(this_len);
            remaining -= this_len;
        }
        Ok(out)
    }

    /// Single 4-byte QFPROM row read.
    pub fn read_qfprom(&mut self, transport: &mut dyn Transport, row_address: u32, address_type: u32) -> Result<u32> {
        let req = wire::encode_read_qfprom_request(row_address, address_type);
        let body = self.exchange(transport, &req, CommandId::ReadQfpromResp, DEFAULT_CONTROL_TIMEOUT)?;
        if body.len() < 4 {
            return Err(Error::Protocol("READ_QFPROM_RESP shorter than 4 bytes".into()));
        }
        Ok(u32::from_le_bytes(body[0..4].try_into().unwrap()))
    }

    /// Sends the header with the overwrite flag, then the 512-byte table as
    /// a framed continuation, then reads the single-byte status.
    pub fn write_partition_table(&mut self, transport: &mut dyn Transport, table: &[u8], overwrite: bool) -> Result<u8> {
        if table.len() != DLOAD_PARTITION_TABLE_SIZE {
            return Err(Error::LocalIo(format!(
                "partition table must be exactly {DLOAD_PARTITION_TABLE_SIZE} bytes, got {}",
                table.len()
            )));
        }
        let header = wire::encode_write_partition_table_request(overwrite);
        transport.write(&hdlc::encode(&header))?;
        transport.write(&hdlc::encode(table))?;

        let body = self.read_response(transport, CommandId::WritePartitionTableResp, DEFAULT_BULK_TIMEOUT)?;
        let status = body.first().copied().ok_or_else(|| {
            Error::Protocol("WRITE_PARTITION_TABLE_RESP missing status byte".into())
        })?;
        if status != 0 {
            warn!("write_partition_table returned nonzero status {status}");
        }
        Ok(status)
    }

    /// Encode, frame, and transmit `request`, then read and dispatch exactly
    /// one response frame. `LOG`/`ERROR` responses are intercepted and
    /// bubble up as `device_reported_error`/a captured log line; any other
    /// mismatch against `expected` is a `protocol_error`.
    fn exchange(
        &mut self,
        transport: &mut dyn Transport,
        request: &[u8],
        expected: CommandId,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        transport.write(&hdlc::encode(request))?;
        self.read_response(transport, expected, timeout)
    }

    fn read_response(&mut self, transport: &mut dyn Transport, expected: CommandId, timeout: Duration) -> Result<Vec<u8>> {
        let payload = read_frame(transport, timeout)?;
        let Some(&id_byte) = payload.first() else {
            return Err(Error::Protocol("empty Streaming DLOAD response payload".into()));
        };
        let body = payload[1..].to_vec();

        if id_byte == CommandId::Error as u8 {
            let message = String::from_utf8_lossy(&body).into_owned();
            self.device.last_error = Some(message.clone());
            return Err(Error::DeviceReported(message));
        }
        if id_byte == CommandId::Log as u8 {
            let message = String::from_utf8_lossy(&body).into_owned();
            debug!("dload LOG: {message}");
            self.device.last_log = Some(message.clone());
            return Err(Error::DeviceReported(format!("unexpected LOG frame: {message}")));
        }
        if id_byte != expected as u8 {
            return Err(Error::Protocol(format!(
                "expected response 0x{:02x}, got 0x{id_byte:02x}",
                expected as u8
            )));
        }
        Ok(body)
    }
}

impl Default for DloadEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Read one HDLC frame byte-at-a-time off the transport within `timeout`,
/// returning the decoded (unescaped, CRC-verified) payload.
fn read_frame(transport: &mut dyn Transport, timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut decoder = HdlcDecoder::new();
    let mut byte = [0u8; 1];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout(1));
        }
        let n = transport.read(&mut byte, remaining)?;
        if n == 0 {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(1));
            }
            continue;
        }
        if let Some(result) = decoder.feed(byte[0]) {
            return result;
        }
    }
}
