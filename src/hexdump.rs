//! Hex-dump formatting for diagnostic log output.
//!
//! Ported from the legacy `hex_trans` translation table: printable ASCII
//! passes through, everything else becomes `.`, so log output stays stable
//! for diff-based comparisons exactly as it did in the original tool.

const HEX_TRANS: [u8; 256] = build_hex_trans();

const fn build_hex_trans() -> [u8; 256] {
    let mut table = [b'.'; 256];
    let mut i = 0x20usize;
    while i <= 0x7E {
        table[i] = i as u8;
        i += 1;
    }
    table
}

/// Translate one byte for hex-dump display: printable ASCII (0x20..=0x7E)
/// passes through, everything else becomes `.`.
pub fn translate_byte(b: u8) -> u8 {
    HEX_TRANS[b as usize]
}

/// Format `data` as a classic hex-dump: 16 bytes per line, hex column
/// followed by the printable-ASCII-or-`.` column.
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4);
    for (row, chunk) in data.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", row * 16));
        for (i, b) in chunk.iter().enumerate() {
            out.push_str(&format!("{:02x} ", b));
            if i == 7 {
                out.push(' ');
            }
        }
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        out.push_str(" |");
        for &b in chunk {
            out.push(translate_byte(b) as char);
        }
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_bytes_pass_through() {
        assert_eq!(translate_byte(b'A'), b'A');
        assert_eq!(translate_byte(b' '), b' ');
        assert_eq!(translate_byte(b'~'), b'~');
    }

    #[test]
    fn non_printable_bytes_become_dot() {
        assert_eq!(translate_byte(0x00), b'.');
        assert_eq!(translate_byte(0x1F), b'.');
        assert_eq!(translate_byte(0x7F), b'.');
        assert_eq!(translate_byte(0xFF), b'.');
    }

    #[test]
    fn hexdump_contains_ascii_column() {
        let dump = hexdump(b"Hello, Sahara!\x00\x01");
        assert!(dump.contains("Hello, Sahara!.."));
    }

    #[test]
    fn hexdump_handles_empty_input() {
        assert_eq!(hexdump(&[]), "");
    }

    #[test]
    fn hexdump_wraps_at_sixteen_bytes_per_line() {
        let data = vec![0x41u8; 20];
        let dump = hexdump(&data);
        assert_eq!(dump.lines().count(), 2);
    }
}
