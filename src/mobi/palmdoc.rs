//! PalmDOC LZ77 compression.
//!
//! The scheme is simple:
//! - Byte 0x00: literal NUL
//! - Bytes 0x01-0x08: copy next 'n' bytes literally
//! - Bytes 0x09-0x7F: literal character
//! - Bytes 0x80-0xBF: back-reference, combined with the next byte:
//!   distance = bits 3..14 (1..2047), length = (bits 0..2) + 3
//! - Bytes 0xC0-0xFF: space + (byte ^ 0x80)
//!
//! Back-reference copies are applied byte-by-byte, so a copy may overlap
//! its own output. Existing files depend on this.

use crate::error::{Error, Result};

/// Largest back-reference distance the token format can express.
const WINDOW: usize = 2047;

/// Decompress one PalmDOC record body.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 4);
    let mut i = 0;

    while i < input.len() {
        let c = input[i];
        i += 1;

        if c == 0 || (0x09..=0x7F).contains(&c) {
            output.push(c);
        } else if c <= 8 {
            // Literal run of 'c' bytes
            let count = c as usize;
            if i + count > input.len() {
                return Err(Error::CorruptPalmDoc(format!(
                    "literal run of {count} bytes truncated"
                )));
            }
            output.extend_from_slice(&input[i..i + count]);
            i += count;
        } else if c >= 0xC0 {
            output.push(b' ');
            output.push(c ^ 0x80);
        } else {
            // Back-reference (0x80-0xBF)
            if i >= input.len() {
                return Err(Error::CorruptPalmDoc(
                    "back-reference token truncated".into(),
                ));
            }
            let combined = ((c as u16) << 8) | (input[i] as u16);
            i += 1;

            let distance = ((combined >> 3) & 0x7FF) as usize;
            let length = ((combined & 7) + 3) as usize;

            if distance == 0 || distance > output.len() {
                return Err(Error::CorruptPalmDoc(format!(
                    "back-reference distance {distance} with only {} bytes emitted",
                    output.len()
                )));
            }
            // Byte-by-byte so the copy can overlap its own output.
            for _ in 0..length {
                let byte = output[output.len() - distance];
                output.push(byte);
            }
        }
    }

    Ok(output)
}

/// Compress one record body (at most 4096 bytes of text).
///
/// Greedy: longest match of 3..=10 bytes within the trailing 2047-byte
/// window wins; otherwise space+char folding, then literal runs. Not
/// optimal, but round-trip correct.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if let Some((dist, len)) = find_match(input, i) {
            let compound = (dist << 3) | (len - 3);
            output.push(0x80 | ((compound >> 8) as u8));
            output.push((compound & 0xFF) as u8);
            i += len;
            continue;
        }

        let c = input[i];
        i += 1;

        // Space + ASCII folding
        if c == b' ' && i < input.len() {
            let next = input[i];
            if (0x40..0x80).contains(&next) {
                output.push(next ^ 0x80);
                i += 1;
                continue;
            }
        }

        if c == 0 || (c > 8 && c < 0x80) {
            output.push(c);
        } else {
            // Binary run (bytes 1-8 or >= 0x80), at most 8 per token
            let mut run = vec![c];
            while i < input.len() && run.len() < 8 {
                let next = input[i];
                if next == 0 || (next > 8 && next < 0x80) {
                    break;
                }
                run.push(next);
                i += 1;
            }
            output.push(run.len() as u8);
            output.extend_from_slice(&run);
        }
    }

    output
}

/// Longest match of length 3..=10 for `data[pos..]` within the preceding
/// window. Returns `(distance, length)`.
fn find_match(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    if pos == 0 || data.len() - pos < 3 {
        return None;
    }

    let max_len = 10.min(data.len() - pos);
    let window_start = pos.saturating_sub(WINDOW);

    let mut best: Option<(usize, usize)> = None;
    for start in (window_start..pos).rev() {
        let mut len = 0;
        while len < max_len && data[start + len] == data[pos + len] {
            len += 1;
        }
        if len >= 3 && best.is_none_or(|(_, b)| len > b) {
            best = Some((pos - start, len));
            if len == max_len {
                break;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompress_literal() {
        assert_eq!(decompress(b"Hello").unwrap(), b"Hello");
    }

    #[test]
    fn test_decompress_space_ascii() {
        // 0xC1 = 0x41 ^ 0x80 -> " A"
        assert_eq!(decompress(&[0xC1]).unwrap(), b" A");
    }

    #[test]
    fn test_decompress_literal_run() {
        // 0x02 copies the next two bytes verbatim
        assert_eq!(decompress(&[0x02, 0xFF, 0x00, b'x']).unwrap(), &[0xFF, 0x00, b'x']);
    }

    #[test]
    fn test_decompress_backref_overlap() {
        // "ab" then distance 2, length 6 -> "abababab"
        let compound: u16 = (2 << 3) | (6 - 3);
        let input = [b'a', b'b', 0x80 | (compound >> 8) as u8, (compound & 0xFF) as u8];
        assert_eq!(decompress(&input).unwrap(), b"abababab");
    }

    #[test]
    fn test_decompress_bad_distance() {
        let compound: u16 = (5 << 3) | 1;
        let input = [b'a', 0x80 | (compound >> 8) as u8, (compound & 0xFF) as u8];
        assert!(matches!(
            decompress(&input),
            Err(Error::CorruptPalmDoc(_))
        ));
    }

    #[test]
    fn test_decompress_truncated_run() {
        assert!(matches!(
            decompress(&[0x04, 0xFF]),
            Err(Error::CorruptPalmDoc(_))
        ));
    }

    #[test]
    fn test_roundtrip_text() {
        let original = b"Hello, World! This is a test of PalmDOC compression. \
                         Hello, World! Repetition compresses well well well.";
        let compressed = compress(original);
        assert!(compressed.len() < original.len());
        assert_eq!(decompress(&compressed).unwrap(), original);
    }

    #[test]
    fn test_roundtrip_binary() {
        let original: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        assert_eq!(decompress(&compress(&original)).unwrap(), original);
    }

    #[test]
    fn test_roundtrip_repeated_byte() {
        let original = vec![b'a'; 4096];
        assert_eq!(decompress(&compress(&original)).unwrap(), original);
    }

    #[test]
    fn test_roundtrip_spaces() {
        let original = b" A B C  D   end ";
        assert_eq!(decompress(&compress(original)).unwrap(), original);
    }

    #[test]
    fn test_roundtrip_empty() {
        assert_eq!(decompress(&compress(b"")).unwrap(), b"");
    }
}
