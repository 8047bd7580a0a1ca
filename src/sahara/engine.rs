//! The Sahara protocol state machine.
//!
//! Sahara is not HDLC-framed: every packet is `{command: u32_le, length:
//! u32_le}` followed by command-specific fixed fields, and the "raw" phases
//! (image data, memory-read payload, command-exec payload) are unframed byte
//! runs whose length was given by the most recent control packet.
//!
//! The engine never prompts the user and never spawns threads; it is driven
//! one call at a time by either the foreground or a worker (see
//! `sahara::workers`), which is the only thing allowed to hold it across a
//! blocking operation.

use std::time::Duration;

use log::{debug, info, warn};
use zerocopy::{AsBytes, FromBytes};

use crate::config::{DEFAULT_CONTROL_TIMEOUT, SAHARA_DEFAULT_MAX_PACKET_SIZE, SAHARA_HOST_MAX_VERSION};
use crate::error::{Error, Result};
use crate::transport::Transport;

use super::wire::{
    CmdExecDataPacket, CmdExecPacket, CmdExecResponsePacket, CmdSwitchModePacket, ClientCommand,
    CommandId, DoneResponsePacket, EndImageTxPacket, HelloPacket, HelloResponsePacket,
    MemoryDebugPacket, MemoryReadPacket, Mode, ReadDataPacket, HEADER_LEN,
};

/// Negotiated session parameters, filled in once the device's `HELLO`
/// arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceState {
    pub version: u32,
    pub min_version: u32,
    pub max_command_packet_size: u32,
}

/// Events the device can push at us; which ones are legal depends on the
/// engine's current mode (enforced by [`SaharaEngine::next_event`]).
#[derive(Debug, Clone)]
pub enum SaharaEvent {
    ReadData { image_id: u32, offset: u32, size: u32 },
    EndImageTx { image_id: u32, status: u32 },
    MemoryDebug { table_address: u32, table_length: u32 },
    CmdReady,
    DoneResponse { status: u32 },
    ResetResponse,
    CmdExecResponse { client_command: u32, data_length: u32 },
}

/// The engine's current mode. `WaitHello` and `Done`/`ResetIssued` are not
/// part of the device-advertised mode set; they bracket the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    WaitHello,
    ImageTxPending,
    ImageTxComplete,
    MemoryDebug,
    Command,
    Done,
    ResetIssued,
}

/// Drives one Sahara session over a [`Transport`].
///
/// Any error returned poisons the engine (per the poisoning rules) except
/// `Error::DeviceReported`, which only fails the operation in progress.
pub struct SaharaEngine {
    pub mode: EngineMode,
    pub device: DeviceState,
    host_max_version: u32,
}

impl SaharaEngine {
    pub fn new() -> Self {
        Self {
            mode: EngineMode::WaitHello,
            device: DeviceState::default(),
            host_max_version: SAHARA_HOST_MAX_VERSION,
        }
    }

    /// Block for the device's unsolicited `HELLO` and populate `device`.
    pub fn wait_hello(&mut self, transport: &mut dyn Transport) -> Result<Mode> {
        if self.mode != EngineMode::WaitHello {
            return Err(Error::Protocol("wait_hello called outside WAIT_HELLO".into()));
        }
        let mut buf = [0u8; HelloPacket::WIRE_LEN];
        transport.read_exact(&mut buf, DEFAULT_CONTROL_TIMEOUT)?;
        let hello = HelloPacket::read_from(&buf[..])
            .ok_or_else(|| Error::Protocol("malformed HELLO".into()))?;
        if hello.command != CommandId::Hello as u32 {
            return Err(Error::Protocol(format!(
                "expected HELLO, got command 0x{:02x}",
                hello.command
            )));
        }
        let device_mode = Mode::from_u32(hello.mode)
            .ok_or_else(|| Error::Protocol(format!("unknown device mode 0x{:02x}", hello.mode)))?;
        let max_pkt = if hello.max_command_packet_size == 0 {
            SAHARA_DEFAULT_MAX_PACKET_SIZE
        } else {
            hello.max_command_packet_size
        };
        self.device = DeviceState {
            version: hello.version,
            min_version: hello.version_min,
            max_command_packet_size: max_pkt,
        };
        info!(
            "sahara HELLO: device version={} min={} max_pkt={} mode={:?}",
            hello.version, hello.version_min, max_pkt, device_mode
        );
        Ok(device_mode)
    }

    /// Negotiate version and send `HELLO_RESPONSE`, switching to
    /// `chosen_mode`. Fails with `version_unsupported` if the negotiated
    /// version falls below the device's stated minimum.
    pub fn send_hello_response(
        &mut self,
        transport: &mut dyn Transport,
        chosen_mode: Mode,
    ) -> Result<()> {
        let negotiated = self.device.version.min(self.host_max_version);
        if negotiated < self.device.min_version {
            return Err(Error::VersionUnsupported {
                device_min: self.device.min_version,
                host_max: self.host_max_version,
            });
        }
        let packet = HelloResponsePacket::new(negotiated, self.device.min_version, chosen_mode);
        transport.write(packet.as_bytes())?;
        self.mode = match chosen_mode {
            Mode::ImageTxPending => EngineMode::ImageTxPending,
            Mode::ImageTxComplete => EngineMode::ImageTxComplete,
            Mode::MemoryDebug => EngineMode::MemoryDebug,
            Mode::Command => EngineMode::Command,
        };
        info!("sahara negotiated version={negotiated}, mode={:?}", self.mode);
        Ok(())
    }

    /// Block for the next device-sent packet and classify it against the
    /// current mode. Returns `protocol_error` for a command that is legal on
    /// the wire in general but not expected in the current mode.
    pub fn next_event(&mut self, transport: &mut dyn Transport) -> Result<SaharaEvent> {
        let mut header_buf = [0u8; HEADER_LEN];
        transport.read_exact(&mut header_buf, DEFAULT_CONTROL_TIMEOUT)?;
        let command = u32::from_le_bytes(header_buf[0..4].try_into().unwrap());
        let length = u32::from_le_bytes(header_buf[4..8].try_into().unwrap()) as usize;
        let Some(id) = CommandId::from_u32(command) else {
            return Err(Error::Protocol(format!("unknown command 0x{command:02x}")));
        };
        if length < HEADER_LEN {
            return Err(Error::Protocol(format!("packet length {length} shorter than header")));
        }
        let mut rest = vec![0u8; length - HEADER_LEN];
        transport.read_exact(&mut rest, DEFAULT_CONTROL_TIMEOUT)?;
        let mut full = Vec::with_capacity(length);
        full.extend_from_slice(&header_buf);
        full.extend_from_slice(&rest);

        match (id, self.mode) {
            (CommandId::ReadData, EngineMode::ImageTxPending) => {
                let p = ReadDataPacket::read_from(&full[..])
                    .ok_or_else(|| Error::Protocol("malformed READ_DATA".into()))?;
                Ok(SaharaEvent::ReadData {
                    image_id: p.image_id,
                    offset: p.offset,
                    size: p.size,
                })
            }
            (CommandId::EndImageTx, EngineMode::ImageTxPending) => {
                let p = EndImageTxPacket::read_from(&full[..])
                    .ok_or_else(|| Error::Protocol("malformed END_IMAGE_TX".into()))?;
                self.mode = EngineMode::ImageTxComplete;
                if p.status != 0 {
                    warn!("END_IMAGE_TX reported nonzero status {}", p.status);
                }
                Ok(SaharaEvent::EndImageTx {
                    image_id: p.image_id,
                    status: p.status,
                })
            }
            (CommandId::MemoryDebug, EngineMode::MemoryDebug) => {
                let p = MemoryDebugPacket::read_from(&full[..])
                    .ok_or_else(|| Error::Protocol("malformed MEMORY_DEBUG".into()))?;
                Ok(SaharaEvent::MemoryDebug {
                    table_address: p.memory_table_address,
                    table_length: p.memory_table_length,
                })
            }
            (CommandId::CmdReady, EngineMode::Command) => Ok(SaharaEvent::CmdReady),
            (CommandId::CmdExecResponse, EngineMode::Command) => {
                let p = CmdExecResponsePacket::read_from(&full[..])
                    .ok_or_else(|| Error::Protocol("malformed CMD_EXEC_RESPONSE".into()))?;
                Ok(SaharaEvent::CmdExecResponse {
                    client_command: p.client_command,
                    data_length: p.data_length,
                })
            }
            (CommandId::DoneResponse, _) => {
                let p = DoneResponsePacket::read_from(&full[..])
                    .ok_or_else(|| Error::Protocol("malformed DONE_RESPONSE".into()))?;
                self.mode = EngineMode::Done;
                Ok(SaharaEvent::DoneResponse { status: p.status })
            }
            (CommandId::ResetResponse, _) => {
                self.mode = EngineMode::ResetIssued;
                Ok(SaharaEvent::ResetResponse)
            }
            (other, mode) => Err(Error::Protocol(format!(
                "unexpected command {other:?} in mode {mode:?}"
            ))),
        }
    }

    /// Write exactly `size` bytes of image data in response to a `READ_DATA`
    /// request, zero-padding `data` if it is shorter than `size` (short
    /// source file).
    pub fn send_image_chunk(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
        size: usize,
    ) -> Result<()> {
        if self.mode != EngineMode::ImageTxPending {
            return Err(Error::Protocol("send_image_chunk outside IMAGE_TX_PENDING".into()));
        }
        if data.len() >= size {
            transport.write(&data[..size])?;
        } else {
            warn!(
                "image source shorter than requested chunk ({} < {size}); zero-padding",
                data.len()
            );
            transport.write(data)?;
            let pad = vec![0u8; size - data.len()];
            transport.write(&pad)?;
        }
        Ok(())
    }

    /// Issue `MEMORY_READ{address, length}`. `length` is capped by the
    /// caller at `device.max_command_packet_size`; the engine enforces it is
    /// not exceeded but never splits the request itself.
    pub fn request_memory_read(
        &mut self,
        transport: &mut dyn Transport,
        address: u32,
        length: u32,
    ) -> Result<()> {
        if self.mode != EngineMode::MemoryDebug {
            return Err(Error::Protocol("request_memory_read outside MEMORY_DEBUG".into()));
        }
        if length > self.device.max_command_packet_size {
            return Err(Error::Protocol(format!(
                "memory read length {length} exceeds max_command_packet_size {}",
                self.device.max_command_packet_size
            )));
        }
        let packet = MemoryReadPacket::new(address, length);
        transport.write(packet.as_bytes())
    }

    /// Read exactly `len` unframed bytes following a control packet that
    /// announced them (memory-read payload, command-exec payload).
    pub fn read_raw(
        &mut self,
        transport: &mut dyn Transport,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        transport.read_exact(&mut buf, timeout)?;
        debug!("read {len} raw bytes");
        Ok(buf)
    }

    /// Request a mode switch while in `COMMAND` mode. Rejected locally with
    /// `protocol_error` while `mode == ImageTxPending`: the device must
    /// finish or fail the in-flight image transfer first.
    pub fn cmd_switch_mode(&mut self, transport: &mut dyn Transport, mode: Mode) -> Result<()> {
        if self.mode == EngineMode::ImageTxPending {
            return Err(Error::Protocol(
                "refusing CMD_SWITCH_MODE while an image transfer is pending".into(),
            ));
        }
        let packet = CmdSwitchModePacket::new(mode);
        transport.write(packet.as_bytes())
    }

    /// Issue `CMD_EXEC{client_command}`. Caller must follow with
    /// [`SaharaEngine::next_event`] for the `CmdExecResponse`, then
    /// [`SaharaEngine::cmd_exec_data`] to fetch the payload.
    pub fn cmd_exec(&mut self, transport: &mut dyn Transport, client_command: ClientCommand) -> Result<()> {
        if self.mode != EngineMode::Command {
            return Err(Error::Protocol("cmd_exec outside COMMAND mode".into()));
        }
        let packet = CmdExecPacket::new(client_command);
        transport.write(packet.as_bytes())
    }

    /// Issue `CMD_EXEC_DATA{client_command}` and read the `data_length`
    /// bytes of response payload.
    pub fn cmd_exec_data(
        &mut self,
        transport: &mut dyn Transport,
        client_command: ClientCommand,
        data_length: u32,
    ) -> Result<Vec<u8>> {
        let packet = CmdExecDataPacket::new(client_command);
        transport.write(packet.as_bytes())?;
        self.read_raw(transport, data_length as usize, DEFAULT_CONTROL_TIMEOUT)
    }

    /// Send `DONE`. Caller must follow with `next_event` for `DoneResponse`.
    pub fn send_done(&mut self, transport: &mut dyn Transport) -> Result<()> {
        transport.write(&super::wire::done_packet())
    }

    /// Send `RESET`. Caller must follow with `next_event` for `ResetResponse`.
    pub fn send_reset(&mut self, transport: &mut dyn Transport) -> Result<()> {
        transport.write(&super::wire::reset_packet())
    }
}

impl Default for SaharaEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sahara::wire::HelloResponsePacket;
    use crate::transport::ChannelTransport;

    fn device_hello_bytes(version: u32, min: u32, max_pkt: u32, mode: Mode) -> Vec<u8> {
        let p = HelloPacket {
            command: CommandId::Hello as u32,
            length: HelloPacket::WIRE_LEN as u32,
            version,
            version_min: min,
            max_command_packet_size: max_pkt,
            mode: mode as u32,
            reserved: [0; 6],
        };
        p.as_bytes().to_vec()
    }

    #[test]
    fn hello_and_switch_to_command_mode() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&device_hello_bytes(2, 1, 0x1000, Mode::ImageTxPending));
        let mut engine = SaharaEngine::new();

        let device_mode = engine.wait_hello(&mut t).unwrap();
        assert_eq!(device_mode, Mode::ImageTxPending);
        assert_eq!(engine.device.max_command_packet_size, 0x1000);

        engine.send_hello_response(&mut t, Mode::Command).unwrap();
        assert_eq!(engine.mode, EngineMode::Command);
        let resp = HelloResponsePacket::read_from(&t.outbound[..]).unwrap();
        assert_eq!(resp.mode, Mode::Command as u32);

        t.push_inbound(&{
            let header = crate::sahara::wire::PacketHeader {
                command: CommandId::CmdReady as u32,
                length: HEADER_LEN as u32,
            };
            header.to_bytes().to_vec()
        });
        let event = engine.next_event(&mut t).unwrap();
        assert!(matches!(event, SaharaEvent::CmdReady));
    }

    #[test]
    fn max_command_packet_size_zero_uses_default() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&device_hello_bytes(2, 1, 0, Mode::Command));
        let mut engine = SaharaEngine::new();
        engine.wait_hello(&mut t).unwrap();
        assert_eq!(engine.device.max_command_packet_size, SAHARA_DEFAULT_MAX_PACKET_SIZE);
    }

    #[test]
    fn version_downgrade_below_device_minimum_is_unsupported() {
        let mut t = ChannelTransport::new();
        t.push_inbound(&device_hello_bytes(9, 8, 0x1000, Mode::Command));
        let mut engine = SaharaEngine::new();
        engine.wait_hello(&mut t).unwrap();
        let err = engine.send_hello_response(&mut t, Mode::Command).unwrap_err();
        assert!(matches!(err, Error::VersionUnsupported { .. }));
    }

    #[test]
    fn image_transfer_pads_short_source_data() {
        let mut t = ChannelTransport::new();
        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::ImageTxPending;
        engine.send_image_chunk(&mut t, &[1, 2, 3], 6).unwrap();
        assert_eq!(t.outbound, vec![1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn cmd_switch_mode_rejected_mid_image_transfer() {
        let mut t = ChannelTransport::new();
        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::ImageTxPending;
        let err = engine.cmd_switch_mode(&mut t, Mode::Command).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(t.outbound.is_empty());
    }

    #[test]
    fn unexpected_command_in_mode_is_protocol_error() {
        let mut t = ChannelTransport::new();
        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::Command;
        // READ_DATA is only legal in ImageTxPending.
        let bytes = ReadDataPacket {
            command: CommandId::ReadData as u32,
            length: ReadDataPacket::WIRE_LEN as u32,
            image_id: 0,
            offset: 0,
            size: 10,
        };
        t.push_inbound(bytes.as_bytes());
        let err = engine.next_event(&mut t).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn read_oem_pk_hash_client_command_round_trip() {
        let mut t = ChannelTransport::new();
        let mut engine = SaharaEngine::new();
        engine.mode = EngineMode::Command;

        engine.cmd_exec(&mut t, ClientCommand::ReadOemPkHash).unwrap();
        let exec_resp = CmdExecResponsePacket {
            command: CommandId::CmdExecResponse as u32,
            length: CmdExecResponsePacket::WIRE_LEN as u32,
            client_command: ClientCommand::ReadOemPkHash as u32,
            data_length: 32,
        };
        t.push_inbound(exec_resp.as_bytes());
        let event = engine.next_event(&mut t).unwrap();
        let data_length = match event {
            SaharaEvent::CmdExecResponse { data_length, .. } => data_length,
            _ => panic!("expected CmdExecResponse"),
        };
        t.push_inbound(&[0xAAu8; 32]);
        let hash = engine
            .cmd_exec_data(&mut t, ClientCommand::ReadOemPkHash, data_length)
            .unwrap();
        assert_eq!(hash, vec![0xAAu8; 32]);
    }
}
