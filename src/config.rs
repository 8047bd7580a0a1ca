//! Protocol and driver constants shared by the Sahara and Streaming DLOAD engines.

use std::time::Duration;

// ============================================================================
// Transport defaults
// ============================================================================

/// Default timeout for control-packet reads (hello, command responses).
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for bulk data phases (image slices, memory reads).
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default serial baud rate used when the caller does not override it.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

// ============================================================================
// Sahara protocol
// ============================================================================

/// Historical default applied when the device advertises `max_command_packet_size = 0`.
pub const SAHARA_DEFAULT_MAX_PACKET_SIZE: u32 = 0x1000;

/// Highest Sahara protocol version this host negotiates.
pub const SAHARA_HOST_MAX_VERSION: u32 = 2;

/// Size in bytes of a `SaharaMemoryTableEntry` name/filename field (null-padded ASCII).
pub const SAHARA_TABLE_ENTRY_FIELD_LEN: usize = 20;

/// Memory-table entries at or above this size prompt a confirm before being
/// queued for a batch dump, matching the legacy GUI's "confirm large file" step.
pub const SAHARA_LARGE_FILE_CONFIRM_THRESHOLD: u64 = 1_000_000;

// ============================================================================
// Streaming DLOAD protocol
// ============================================================================

/// HDLC frame delimiter.
pub const HDLC_FRAME_DELIMITER: u8 = 0x7E;

/// HDLC escape byte.
pub const HDLC_ESCAPE: u8 = 0x7D;

/// XOR mask applied to an escaped byte's original value.
pub const HDLC_ESCAPE_XOR: u8 = 0x20;

/// Default host identification string sent in `send_hello`.
pub const DLOAD_HELLO_MAGIC: &str = "QCOM fast download protocol host";

/// Fixed size of a Streaming DLOAD partition table payload.
pub const DLOAD_PARTITION_TABLE_SIZE: usize = 512;

/// Bit position of the overwrite flag within the `write_partition_table` flags byte.
///
/// Unconfirmed against a device trace; see DESIGN.md open-question decisions.
pub const DLOAD_OVERWRITE_FLAG_BIT: u8 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_flag_is_low_bit() {
        assert_eq!(DLOAD_OVERWRITE_FLAG_BIT, 0);
    }

    #[test]
    fn hdlc_constants_match_protocol() {
        assert_eq!(HDLC_FRAME_DELIMITER, 0x7E);
        assert_eq!(HDLC_ESCAPE, 0x7D);
    }
}
