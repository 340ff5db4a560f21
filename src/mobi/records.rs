//! Text record segmentation and "extra data" trailer framing.
//!
//! The logical HTML stream is cut into records of exactly 4096
//! decompressed bytes (the last may be shorter). Each stored record may
//! carry trailers after the compressed text:
//!
//! - multibyte overlap (flag 0x01): the continuation bytes that begin the
//!   next record, so a split UTF-8 sequence can be rendered from this
//!   record alone, followed by one count byte. Written last on disk is the
//!   count byte; strip removes `(count & 3) + 1` bytes.
//! - uncrossable breaks (flag 0x04): forward variable-width integers of
//!   break offsets relative to the record start, terminated by a backward
//!   variable-width integer giving the full trailer length including
//!   itself.
//!
//! Stripping runs from the end of the record, highest flag bit first, so
//! the break trailer sits after the overlap trailer in the byte stream.

use super::headers::RECORD_SIZE;

/// One 4096-byte slice of the logical text stream plus the overlap bytes
/// that complete a UTF-8 sequence split at its end boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Absolute offset of this chunk in the logical stream.
    pub start: usize,
    pub text: Vec<u8>,
    /// First 0..=3 bytes of the next chunk when the boundary splits a
    /// multibyte sequence.
    pub overlap: Vec<u8>,
}

/// Split the logical stream into fixed-size chunks with multibyte overlap.
pub fn split_text_records(text: &[u8]) -> Vec<TextChunk> {
    let mut chunks = Vec::with_capacity(text.len() / RECORD_SIZE + 1);
    let mut pos = 0;

    while pos < text.len() {
        let end = (pos + RECORD_SIZE).min(text.len());

        // Continuation bytes (0b10xxxxxx) after the boundary belong to a
        // sequence that started inside this chunk.
        let mut overlap_len = 0;
        while overlap_len < 3
            && end + overlap_len < text.len()
            && text[end + overlap_len] & 0xC0 == 0x80
        {
            overlap_len += 1;
        }

        chunks.push(TextChunk {
            start: pos,
            text: text[pos..end].to_vec(),
            overlap: text[end..end + overlap_len].to_vec(),
        });
        pos = end;
    }

    chunks
}

/// Append the trailers for one record body.
///
/// `breaks` are the uncrossable-break offsets that fall inside this
/// record, already made relative to the record start. The overlap trailer
/// is always written (count byte alone when there is no overlap), matching
/// the 0x05 extra-data flags the writer declares.
pub fn append_trailers(body: &mut Vec<u8>, overlap: &[u8], breaks: &[usize]) {
    debug_assert!(overlap.len() <= 3);
    body.extend_from_slice(overlap);
    body.push(overlap.len() as u8);

    let mut encoded = Vec::new();
    for &brk in breaks {
        encoded.extend_from_slice(&vwi_forward(brk));
    }

    // The closing size integer counts itself, so its own width has to be
    // found iteratively.
    let mut lsize = 1;
    let size = loop {
        let size = vwi_backward(encoded.len() + lsize);
        if size.len() == lsize {
            break size;
        }
        lsize += 1;
    };
    body.extend_from_slice(&encoded);
    body.extend_from_slice(&size);
}

/// Remove all flagged trailers, returning the visible record bytes.
///
/// Works for any flag combination: bits 15..1 each strip a
/// backward-integer-sized trailer, bit 0 strips the multibyte overlap.
pub fn strip_trailing_entries(record: &[u8], flags: u32) -> &[u8] {
    if flags == 0 || record.is_empty() {
        return record;
    }

    let mut end = record.len();

    // Highest flag bit first; bit 0 is handled separately below.
    for bit in (1..16).rev() {
        if flags & (1 << bit) != 0 {
            if end == 0 {
                break;
            }
            let (size, _) = read_vwi_backward(&record[..end]);
            if size > 0 && size <= end {
                end -= size;
            }
        }
    }

    if flags & 1 != 0 && end > 0 {
        let overlap = (record[end - 1] & 3) as usize + 1;
        if overlap <= end {
            end -= overlap;
        }
    }

    &record[..end]
}

/// Like [`strip_trailing_entries`] but also recovers the trailer payloads:
/// the multibyte overlap bytes and the break offsets.
pub fn parse_trailers(record: &[u8], flags: u32) -> (&[u8], Vec<u8>, Vec<usize>) {
    let mut end = record.len();
    let mut breaks = Vec::new();

    if flags & 0x04 != 0 && end > 0 {
        let (size, size_len) = read_vwi_backward(&record[..end]);
        if size > 0 && size <= end {
            let payload = &record[end - size..end - size_len];
            let mut pos = 0;
            while pos < payload.len() {
                let (value, consumed) = read_vwi_forward(&payload[pos..]);
                if consumed == 0 {
                    break;
                }
                breaks.push(value);
                pos += consumed;
            }
            end -= size;
        }
    }

    let mut overlap = Vec::new();
    if flags & 0x01 != 0 && end > 0 {
        let count = (record[end - 1] & 3) as usize;
        if count + 1 <= end {
            overlap = record[end - 1 - count..end - 1].to_vec();
            end -= count + 1;
        }
    }

    (&record[..end], overlap, breaks)
}

/// Forward variable-width integer: 7 bits per byte, most significant group
/// first, high bit set on the final byte.
pub fn vwi_forward(mut value: usize) -> Vec<u8> {
    let mut groups = Vec::new();
    loop {
        groups.push((value & 0x7F) as u8);
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    groups[0] |= 0x80;
    groups.reverse();
    groups
}

/// Backward variable-width integer: as forward, but the high bit marks the
/// first byte so a right-to-left scan knows where the integer starts.
pub fn vwi_backward(mut value: usize) -> Vec<u8> {
    let mut groups = Vec::new();
    loop {
        groups.push((value & 0x7F) as u8);
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    if let Some(last) = groups.last_mut() {
        *last |= 0x80;
    }
    groups.reverse();
    groups
}

/// Decode a forward integer from the start of `data`. Returns (value,
/// bytes consumed); consumed is 0 when no terminator was found.
pub fn read_vwi_forward(data: &[u8]) -> (usize, usize) {
    let mut value = 0usize;
    for (i, &byte) in data.iter().enumerate() {
        value = (value << 7) | (byte & 0x7F) as usize;
        if byte & 0x80 != 0 {
            return (value, i + 1);
        }
        if i >= 3 {
            break;
        }
    }
    (0, 0)
}

/// Decode a backward integer ending at the end of `data`, scanning
/// right-to-left until a byte with the high bit set. Returns (value,
/// bytes consumed).
pub fn read_vwi_backward(data: &[u8]) -> (usize, usize) {
    let mut value = 0usize;
    let mut shift = 0;
    let mut consumed = 0;
    for &byte in data.iter().rev() {
        value |= ((byte & 0x7F) as usize) << shift;
        shift += 7;
        consumed += 1;
        if byte & 0x80 != 0 || shift >= 28 || consumed == data.len() {
            break;
        }
    }
    (value, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mobi::headers::EXTRA_DATA_FLAGS;

    #[test]
    fn test_vwi_forward_roundtrip() {
        for value in [0usize, 1, 127, 128, 300, 4095, 16384, 1 << 20] {
            let encoded = vwi_forward(value);
            let (decoded, consumed) = read_vwi_forward(&encoded);
            assert_eq!(decoded, value);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn test_vwi_backward_roundtrip() {
        for value in [0usize, 1, 127, 128, 300, 4095, 16384] {
            let encoded = vwi_backward(value);
            let (decoded, consumed) = read_vwi_backward(&encoded);
            assert_eq!(decoded, value);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn test_split_exact_multiple() {
        let text = vec![b'x'; RECORD_SIZE * 2];
        let chunks = split_text_records(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[1].start, RECORD_SIZE);
        assert!(chunks[0].overlap.is_empty());
        assert_eq!(chunks[1].text.len(), RECORD_SIZE);
    }

    #[test]
    fn test_split_multibyte_boundary() {
        // Euro sign (E2 82 AC) straddling the record boundary: first byte
        // in chunk 0, two continuation bytes opening chunk 1.
        let mut text = vec![b'a'; RECORD_SIZE - 1];
        text.extend_from_slice("€def".as_bytes());
        let chunks = split_text_records(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.len(), RECORD_SIZE);
        assert_eq!(*chunks[0].text.last().unwrap(), 0xE2);
        assert_eq!(chunks[0].overlap, vec![0x82, 0xAC]);
        assert_eq!(&chunks[1].text[..2], &[0x82, 0xAC]);
        // Concatenating the chunk text reproduces the stream.
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.text.clone()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_trailer_roundtrip_no_breaks() {
        let mut body = b"some record text".to_vec();
        append_trailers(&mut body, &[], &[]);
        let visible = strip_trailing_entries(&body, EXTRA_DATA_FLAGS);
        assert_eq!(visible, b"some record text");
    }

    #[test]
    fn test_trailer_roundtrip_with_overlap_and_breaks() {
        let original = b"record body bytes".to_vec();
        let mut body = original.clone();
        append_trailers(&mut body, &[0x82, 0xAC], &[10, 200, 4000]);

        let (visible, overlap, breaks) = parse_trailers(&body, EXTRA_DATA_FLAGS);
        assert_eq!(visible, &original[..]);
        assert_eq!(overlap, vec![0x82, 0xAC]);
        assert_eq!(breaks, vec![10, 200, 4000]);

        assert_eq!(strip_trailing_entries(&body, EXTRA_DATA_FLAGS), &original[..]);
    }

    #[test]
    fn test_strip_overlap_only_flag() {
        let mut body = b"text".to_vec();
        body.extend_from_slice(&[0xAC, 1]);
        assert_eq!(strip_trailing_entries(&body, 0x01), b"text");
    }

    #[test]
    fn test_strip_indexing_trailer_flag() {
        // Flag 0x02 trailers use the same backward-integer framing.
        let mut body = b"visible".to_vec();
        body.extend_from_slice(&[1, 2, 3]);
        body.extend_from_slice(&vwi_backward(4)); // 3 payload bytes + 1 size byte
        assert_eq!(strip_trailing_entries(&body, 0x02), b"visible");
    }

    #[test]
    fn test_strip_zero_flags_is_identity() {
        let body = b"anything at all";
        assert_eq!(strip_trailing_entries(body, 0), body);
    }

    #[test]
    fn test_break_offsets_relative_to_record() {
        let mut body = vec![b'z'; 100];
        append_trailers(&mut body, &[], &[0, 99]);
        let (_, _, breaks) = parse_trailers(&body, 0x05);
        assert_eq!(breaks, vec![0, 99]);
    }
}
