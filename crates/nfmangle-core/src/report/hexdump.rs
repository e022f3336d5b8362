//! Canonical hex dump

use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

/// Width of the hex column: 16 bytes of "xx " plus the gap after byte 8
const HEX_COLUMN_WIDTH: usize = BYTES_PER_LINE * 3 + 1;

/// Render `data` as a canonical hex dump
///
/// Each line holds a 32-bit offset, sixteen bytes split 8+8 and an ASCII
/// gutter with non-printable bytes shown as `.`:
///
/// ```text
/// 00000000  47 45 54 20 2f 6d 61 67  69 63 20 73 74 72 69 6e  |GET /magic strin|
/// ```
///
/// Empty input renders as an empty string.
pub fn hexdump(data: &[u8]) -> String {
    let lines = data.len().div_ceil(BYTES_PER_LINE);
    let mut out = String::with_capacity(lines * 79);

    for (index, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        let mut hex = String::with_capacity(HEX_COLUMN_WIDTH);
        for (i, byte) in chunk.iter().enumerate() {
            let _ = write!(hex, "{byte:02x} ");
            if i == 7 {
                hex.push(' ');
            }
        }

        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
            .collect();

        let _ = writeln!(
            out,
            "{:08x}  {hex:<width$} |{ascii}|",
            index * BYTES_PER_LINE,
            width = HEX_COLUMN_WIDTH
        );
    }

    out
}
