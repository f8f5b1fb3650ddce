//! Hex dump rendering for binary payloads.

use std::fmt::Write;

/// Bytes per dump line.
pub const BYTES_PER_LINE: usize = 16;

/// Classic dump: offset, 16 hex bytes split in two groups of 8, ASCII gutter.
///
/// ```text
/// 00000000  48 65 6c 6c 6f 0a                                 |Hello.|
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    let mut output = String::with_capacity(data.len() * 4 + 16);

    for (i, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(output, "{:08x}  ", i * BYTES_PER_LINE);

        for j in 0..BYTES_PER_LINE {
            match chunk.get(j) {
                Some(byte) => {
                    let _ = write!(output, "{:02x} ", byte);
                }
                None => output.push_str("   "),
            }
            if j == 7 {
                output.push(' ');
            }
        }

        output.push('|');
        for &byte in chunk {
            if byte.is_ascii_graphic() || byte == b' ' {
                output.push(byte as char);
            } else {
                output.push('.');
            }
        }
        output.push_str("|\n");
    }

    output
}

/// Dump of at most `max_bytes`, with a count of what was left out.
pub fn hex_preview(data: &[u8], max_bytes: usize) -> String {
    if data.len() <= max_bytes {
        return hex_dump(data);
    }
    let mut output = hex_dump(&data[..max_bytes]);
    let _ = writeln!(output, "... ({} more bytes)", data.len() - max_bytes);
    output
}

/// Space-separated hex bytes on one line.
pub fn hex_bytes(data: &[u8]) -> String {
    let mut output = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            output.push(' ');
        }
        let _ = write!(output, "{:02x}", byte);
    }
    output
}
