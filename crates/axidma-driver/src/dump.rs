//! Hex dump of buffer contents for diagnostics
//!
//! Four bytes per line, with an extra blank line every 32 bytes. Line breaks
//! follow the absolute offset in the slice, so a truncated dump stays aligned
//! with an untruncated one.

use std::io::{self, Write};

/// Bytes shown before a dump is truncated to its tail
pub const MEM_DUMP_MAX_BYTES: usize = 256;

/// Write a hex dump of `bytes` to `out`
///
/// Slices longer than [`MEM_DUMP_MAX_BYTES`] are introduced by a note and only
/// the final [`MEM_DUMP_MAX_BYTES`] bytes are shown.
///
/// # Errors
///
/// Returns any error from `out`.
pub fn hex_dump<W: Write>(bytes: &[u8], out: &mut W) -> io::Result<()> {
    let start = bytes.len().saturating_sub(MEM_DUMP_MAX_BYTES);
    if start > 0 {
        writeln!(
            out,
            "Buffer is {} bytes; showing the last {MEM_DUMP_MAX_BYTES} bytes",
            bytes.len()
        )?;
    }

    for (offset, byte) in bytes.iter().enumerate().skip(start) {
        write!(out, "{byte:02x}")?;
        if offset % 4 == 3 {
            out.write_all(b" \n")?;
        }
        if offset % 32 == 31 {
            out.write_all(b"\n")?;
        }
    }
    out.write_all(b"\n")
}

/// [`hex_dump`] into a `String`
pub fn format_hex_dump(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len().min(MEM_DUMP_MAX_BYTES) * 3 + 64);
    // Writing to a Vec cannot fail.
    let _ = hex_dump(bytes, &mut out);
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_bytes_per_line() {
        let dump = format_hex_dump(&[0x00, 0x01, 0x02, 0x03, 0xAA, 0xBB]);
        assert_eq!(dump, "00010203 \naabb\n");
    }

    #[test]
    fn blank_line_every_32_bytes() {
        let bytes: Vec<u8> = (0..32).collect();
        let dump = format_hex_dump(&bytes);
        assert!(dump.starts_with("00010203 \n04050607 \n"));
        assert!(dump.ends_with("1c1d1e1f \n\n\n"));
        assert_eq!(dump.lines().filter(|l| !l.is_empty()).count(), 8);
    }

    #[test]
    fn empty_slice_is_a_newline() {
        assert_eq!(format_hex_dump(&[]), "\n");
    }

    #[test]
    fn long_buffers_show_only_the_tail() {
        let bytes: Vec<u8> = (0..300u16).map(|i| (i % 256) as u8).collect();
        let dump = format_hex_dump(&bytes);

        let mut lines = dump.lines();
        assert_eq!(
            lines.next(),
            Some("Buffer is 300 bytes; showing the last 256 bytes")
        );
        // Offset 44 (0x2c) starts on a 4-byte boundary.
        assert_eq!(lines.next(), Some("2c2d2e2f "));
        let hex_digits: usize = dump
            .lines()
            .skip(1)
            .map(|l| l.trim_end().len())
            .sum();
        assert_eq!(hex_digits, MEM_DUMP_MAX_BYTES * 2);
    }

    #[test]
    fn write_errors_propagate() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        assert!(hex_dump(&[1, 2, 3], &mut Broken).is_err());
    }
}
