//! Sahara packet layouts: bit-exact wire structs, command IDs, mode IDs, and
//! client-command IDs.
//!
//! All integers are little-endian, as required by the protocol and
//! guaranteed here by the host toolchain (Sahara devices are little-endian
//! ARM targets) plus explicit `to_le_bytes`/`from_le_bytes` at the one spot
//! (the header) that is hand-parsed rather than transmuted.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Error, Result};

/// Size in bytes of the fixed `{command, length}` header present on every
/// Sahara packet.
pub const HEADER_LEN: usize = 8;

/// Sahara command IDs, per the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandId {
    Hello = 0x01,
    HelloResponse = 0x02,
    ReadData = 0x03,
    EndImageTx = 0x04,
    Done = 0x05,
    DoneResponse = 0x06,
    Reset = 0x07,
    ResetResponse = 0x08,
    MemoryDebug = 0x09,
    MemoryRead = 0x0A,
    CmdReady = 0x0B,
    CmdSwitchMode = 0x0C,
    CmdExec = 0x0D,
    CmdExecResponse = 0x0E,
    CmdExecData = 0x0F,
}

impl CommandId {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x01 => Self::Hello,
            0x02 => Self::HelloResponse,
            0x03 => Self::ReadData,
            0x04 => Self::EndImageTx,
            0x05 => Self::Done,
            0x06 => Self::DoneResponse,
            0x07 => Self::Reset,
            0x08 => Self::ResetResponse,
            0x09 => Self::MemoryDebug,
            0x0A => Self::MemoryRead,
            0x0B => Self::CmdReady,
            0x0C => Self::CmdSwitchMode,
            0x0D => Self::CmdExec,
            0x0E => Self::CmdExecResponse,
            0x0F => Self::CmdExecData,
            _ => return None,
        })
    }
}

/// Sahara operating modes, carried in `HELLO`/`HELLO_RESPONSE` and
/// `CMD_SWITCH_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Mode {
    ImageTxPending = 0x0,
    ImageTxComplete = 0x1,
    MemoryDebug = 0x2,
    Command = 0x3,
}

impl Mode {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x0 => Self::ImageTxPending,
            0x1 => Self::ImageTxComplete,
            0x2 => Self::MemoryDebug,
            0x3 => Self::Command,
            _ => return None,
        })
    }
}

/// Client commands recognized in `COMMAND` mode, issued via `CMD_EXEC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClientCommand {
    Nop = 0x00,
    ReadSerialNum = 0x01,
    ReadMsmHwId = 0x02,
    ReadOemPkHash = 0x03,
    SwitchToDmssDload = 0x04,
    SwitchToStreamingDload = 0x05,
    ReadDebugData = 0x06,
    ReadSblVersion = 0x07,
}

/// The fixed 8-byte header present on every Sahara packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub command: u32,
    /// Total packet size including this 8-byte header.
    pub length: u32,
}

impl PacketHeader {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.command.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Protocol("packet shorter than header".into()));
        }
        Ok(Self {
            command: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            length: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        })
    }
}

/// `HELLO` (device -> host). 0x30 bytes total: header + 4 fields + 6
/// reserved u32s, matching the device's fixed-size hello packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct HelloPacket {
    pub command: u32,
    pub length: u32,
    pub version: u32,
    pub version_min: u32,
    pub max_command_packet_size: u32,
    pub mode: u32,
    pub reserved: [u32; 6],
}

impl HelloPacket {
    pub const WIRE_LEN: usize = 0x30;
}

/// `HELLO_RESPONSE` (host -> device). Same fixed size as `HELLO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct HelloResponsePacket {
    pub command: u32,
    pub length: u32,
    pub version: u32,
    pub version_min: u32,
    pub status: u32,
    pub mode: u32,
    pub reserved: [u32; 6],
}

impl HelloResponsePacket {
    pub const WIRE_LEN: usize = 0x30;

    pub fn new(version: u32, version_min: u32, mode: Mode) -> Self {
        Self {
            command: CommandId::HelloResponse as u32,
            length: Self::WIRE_LEN as u32,
            version,
            version_min,
            status: 0,
            mode: mode as u32,
            reserved: [1, 2, 3, 4, 5, 6],
        }
    }
}

/// `READ_DATA` (device -> host): the device is requesting `size` bytes of
/// the image at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct ReadDataPacket {
    pub command: u32,
    pub length: u32,
    pub image_id: u32,
    pub offset: u32,
    pub size: u32,
}

impl ReadDataPacket {
    pub const WIRE_LEN: usize = 0x14;
}

/// `END_IMAGE_TX` (device -> host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct EndImageTxPacket {
    pub command: u32,
    pub length: u32,
    pub image_id: u32,
    pub status: u32,
}

impl EndImageTxPacket {
    pub const WIRE_LEN: usize = 0x10;
}

/// `DONE` (host -> device): header only.
pub fn done_packet() -> [u8; HEADER_LEN] {
    PacketHeader {
        command: CommandId::Done as u32,
        length: HEADER_LEN as u32,
    }
    .to_bytes()
}

/// `DONE_RESPONSE` (device -> host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct DoneResponsePacket {
    pub command: u32,
    pub length: u32,
    pub status: u32,
}

impl DoneResponsePacket {
    pub const WIRE_LEN: usize = 0x0C;
}

/// `RESET` (host -> device): header only.
pub fn reset_packet() -> [u8; HEADER_LEN] {
    PacketHeader {
        command: CommandId::Reset as u32,
        length: HEADER_LEN as u32,
    }
    .to_bytes()
}

/// `MEMORY_DEBUG` (device -> host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct MemoryDebugPacket {
    pub command: u32,
    pub length: u32,
    pub memory_table_address: u32,
    pub memory_table_length: u32,
}

impl MemoryDebugPacket {
    pub const WIRE_LEN: usize = 0x10;
}

/// `MEMORY_READ` (host -> device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct MemoryReadPacket {
    pub command: u32,
    pub length: u32,
    pub address: u32,
    pub size: u32,
}

impl MemoryReadPacket {
    pub const WIRE_LEN: usize = 0x10;

    pub fn new(address: u32, size: u32) -> Self {
        Self {
            command: CommandId::MemoryRead as u32,
            length: Self::WIRE_LEN as u32,
            address,
            size,
        }
    }
}

/// A fixed-layout memory-table entry as read from device memory at
/// `memory_table_address`. `name`/`filename` are null-padded ASCII.
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct MemoryTableEntry {
    pub name: [u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN],
    pub filename: [u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN],
    pub address: u32,
    pub size: u32,
}

impl MemoryTableEntry {
    pub const WIRE_LEN: usize = crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN * 2 + 8;

    /// Decode the null-padded ASCII `name` field, trimming trailing NULs.
    pub fn name_str(&self) -> String {
        trim_nul_ascii(&self.name)
    }

    /// Decode the null-padded ASCII `filename` field, trimming trailing NULs.
    pub fn filename_str(&self) -> String {
        trim_nul_ascii(&self.filename)
    }
}

fn trim_nul_ascii(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Parse a raw memory-table dump (as read verbatim off the device) into its
/// fixed-layout entries. Trailing bytes that do not form a complete entry are
/// dropped; the raw bytes themselves (not this parsed view) are what gets
/// saved as the "raw table dump" per SPEC_FULL §6.
pub fn parse_table(bytes: &[u8]) -> Vec<MemoryTableEntry> {
    bytes
        .chunks_exact(MemoryTableEntry::WIRE_LEN)
        .filter_map(|chunk| MemoryTableEntry::read_from(chunk))
        .collect()
}

/// `CMD_SWITCH_MODE` (host -> device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct CmdSwitchModePacket {
    pub command: u32,
    pub length: u32,
    pub mode: u32,
}

impl CmdSwitchModePacket {
    pub const WIRE_LEN: usize = 0x0C;

    pub fn new(mode: Mode) -> Self {
        Self {
            command: CommandId::CmdSwitchMode as u32,
            length: Self::WIRE_LEN as u32,
            mode: mode as u32,
        }
    }
}

/// `CMD_EXEC` (host -> device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct CmdExecPacket {
    pub command: u32,
    pub length: u32,
    pub client_command: u32,
}

impl CmdExecPacket {
    pub const WIRE_LEN: usize = 0x0C;

    pub fn new(client_command: ClientCommand) -> Self {
        Self {
            command: CommandId::CmdExec as u32,
            length: Self::WIRE_LEN as u32,
            client_command: client_command as u32,
        }
    }
}

/// `CMD_EXEC_RESPONSE` (device -> host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct CmdExecResponsePacket {
    pub command: u32,
    pub length: u32,
    pub client_command: u32,
    pub data_length: u32,
}

impl CmdExecResponsePacket {
    pub const WIRE_LEN: usize = 0x10;
}

/// `CMD_EXEC_DATA` (host -> device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct CmdExecDataPacket {
    pub command: u32,
    pub length: u32,
    pub client_command: u32,
}

impl CmdExecDataPacket {
    pub const WIRE_LEN: usize = 0x0C;

    pub fn new(client_command: ClientCommand) -> Self {
        Self {
            command: CommandId::CmdExecData as u32,
            length: Self::WIRE_LEN as u32,
            client_command: client_command as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = PacketHeader {
            command: CommandId::Hello as u32,
            length: 0x30,
        };
        let bytes = header.to_bytes();
        let parsed = PacketHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_parse_rejects_short_input() {
        assert!(PacketHeader::parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn hello_response_round_trip_via_zerocopy() {
        let packet = HelloResponsePacket::new(2, 1, Mode::Command);
        let bytes = packet.as_bytes();
        assert_eq!(bytes.len(), HelloResponsePacket::WIRE_LEN);
        let (parsed, _) = HelloResponsePacket::read_from_prefix(bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn memory_read_round_trip() {
        let packet = MemoryReadPacket::new(0x1000_0000, 4096);
        let bytes = packet.as_bytes();
        let (parsed, _) = MemoryReadPacket::read_from_prefix(bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn memory_table_entry_trims_nul_padding() {
        let mut name = [0u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN];
        name[..4].copy_from_slice(b"DDR0");
        let entry = MemoryTableEntry {
            name,
            filename: [0u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN],
            address: 0x1000,
            size: 0,
        };
        assert_eq!(entry.name_str(), "DDR0");
        assert_eq!(entry.filename_str(), "");
    }

    #[test]
    fn command_id_rejects_unknown_values() {
        assert!(CommandId::from_u32(0xFF).is_none());
        assert_eq!(CommandId::from_u32(0x01), Some(CommandId::Hello));
    }

    #[test]
    fn parse_table_decodes_every_complete_entry() {
        let mut name_a = [0u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN];
        name_a[..3].copy_from_slice(b"DDR");
        let entry_a = MemoryTableEntry {
            name: name_a,
            filename: [0u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN],
            address: 0x1000,
            size: 256,
        };
        let mut name_b = [0u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN];
        name_b[..4].copy_from_slice(b"QPST");
        let entry_b = MemoryTableEntry {
            name: name_b,
            filename: [0u8; crate::config::SAHARA_TABLE_ENTRY_FIELD_LEN],
            address: 0x2000,
            size: 0,
        };
        let mut raw = entry_a.as_bytes().to_vec();
        raw.extend_from_slice(entry_b.as_bytes());

        let entries = parse_table(&raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name_str(), "DDR");
        assert_eq!(entries[0].size, 256);
        assert_eq!(entries[1].size, 0);
    }

    #[test]
    fn mode_round_trip_through_u32() {
        for m in [
            Mode::ImageTxPending,
            Mode::ImageTxComplete,
            Mode::MemoryDebug,
            Mode::Command,
        ] {
            assert_eq!(Mode::from_u32(m as u32), Some(m));
        }
    }
}
