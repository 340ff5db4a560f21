//! MOBI header (record 0) and EXTH metadata block.
//!
//! Record 0 layout: a 16-byte PalmDOC header, a 232-byte MOBI header
//! starting with the `MOBI` magic at offset 16, then (when EXTH flag 0x40
//! is set) the EXTH block at offset 248, then the UTF-8 full title. The
//! whole record is NUL-padded to at least 2452 bytes.

use crate::error::{Error, Result};

pub const RECORD_SIZE: usize = 4096;
/// MOBI header length we emit (`MOBI` magic through the trailing index
/// fields). EXTH starts at 16 + this.
const MOBI_HEADER_LEN: u32 = 232;
/// Minimum record 0 size some readers assume.
const MIN_RECORD0_LEN: usize = 2452;

/// Writer always emits multibyte-overlap (0x01) + uncrossable-break (0x04)
/// trailers.
pub const EXTRA_DATA_FLAGS: u32 = 0x05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    PalmDoc,
    HuffCdic,
}

impl Compression {
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            1 => Ok(Compression::None),
            2 => Ok(Compression::PalmDoc),
            17480 => Ok(Compression::HuffCdic),
            n => Err(Error::UnsupportedCompression(n)),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Compression::None => 1,
            Compression::PalmDoc => 2,
            Compression::HuffCdic => 17480,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Cp1252,
    Utf8,
}

impl TextEncoding {
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            1252 => Ok(TextEncoding::Cp1252),
            65001 => Ok(TextEncoding::Utf8),
            n => Err(Error::UnsupportedEncoding(n)),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            TextEncoding::Cp1252 => 1252,
            TextEncoding::Utf8 => 65001,
        }
    }
}

/// Structured view of record 0. All offset arithmetic lives in
/// [`BookHeader::parse`]; everything downstream reads fields.
#[derive(Debug, Clone)]
pub struct BookHeader {
    pub compression: Compression,
    pub text_length: u32,
    pub text_record_count: u16,
    pub text_record_size: u16,
    pub encryption: u16,
    pub header_length: u32,
    pub book_type: u32,
    pub encoding: TextEncoding,
    pub uid: u32,
    pub version: u32,
    pub first_non_book_record: u32,
    /// Full book title from the name offset/length fields.
    pub full_name: String,
    pub locale: u32,
    pub huff_record_offset: u32,
    pub huff_record_count: u32,
    pub exth_flags: u32,
    pub extra_data_flags: u32,
}

impl BookHeader {
    /// Parse the structured prefix of record 0.
    ///
    /// The caller checks `encryption` (DRM) after extracting a title for
    /// diagnostics; see [`super::reader`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 20 || &data[16..20] != b"MOBI" {
            return Err(Error::NotMobi);
        }

        let compression = Compression::from_code(be16(data, 0))?;
        let text_length = be32(data, 4);
        let text_record_count = be16(data, 8);
        let text_record_size = be16(data, 10);
        let encryption = be16(data, 12);

        let header_length = be32(data, 20);
        let book_type = be32(data, 24);
        let encoding = TextEncoding::from_code(be32(data, 28))?;
        let uid = be32(data, 32);
        let version = be32(data, 36);

        let first_non_book_record = opt_be32(data, 80).unwrap_or(0);
        let locale = opt_be32(data, 92).unwrap_or(0);
        let huff_record_offset = opt_be32(data, 112).unwrap_or(0);
        let huff_record_count = opt_be32(data, 116).unwrap_or(0);
        let exth_flags = opt_be32(data, 128).unwrap_or(0);

        // Only present when the header actually extends that far.
        let extra_data_flags = if header_length >= 0xE4 {
            opt_be32(data, 240).unwrap_or(0)
        } else {
            0
        };

        let full_name = {
            let offset = opt_be32(data, 84).unwrap_or(0) as usize;
            let length = opt_be32(data, 88).unwrap_or(0) as usize;
            if offset > 0 && offset + length <= data.len() {
                decode_text(&data[offset..offset + length], encoding)
            } else {
                String::new()
            }
        };

        Ok(Self {
            compression,
            text_length,
            text_record_count,
            text_record_size,
            encryption,
            header_length,
            book_type,
            encoding,
            uid,
            version,
            first_non_book_record,
            full_name,
            locale,
            huff_record_offset,
            huff_record_count,
            exth_flags,
            extra_data_flags,
        })
    }

    /// Default header for the ancient `TEXtREAd` format: PalmDOC
    /// compression, cp1252, no EXTH. Read-only acceptance.
    pub fn textread(record0: &[u8]) -> Result<Self> {
        if record0.len() < 12 {
            return Err(Error::NotMobi);
        }
        Ok(Self {
            compression: Compression::from_code(be16(record0, 0))?,
            text_length: be32(record0, 4),
            text_record_count: be16(record0, 8),
            text_record_size: be16(record0, 10),
            encryption: 0,
            header_length: 0,
            book_type: 2,
            encoding: TextEncoding::Cp1252,
            uid: 0,
            version: 0,
            first_non_book_record: 0,
            full_name: String::new(),
            locale: 0,
            huff_record_offset: 0,
            huff_record_count: 0,
            exth_flags: 0,
            extra_data_flags: 0,
        })
    }

    pub fn has_exth(&self) -> bool {
        self.exth_flags & 0x40 != 0
    }

    /// Byte offset of the EXTH block within record 0.
    pub fn exth_offset(&self) -> usize {
        16 + self.header_length as usize
    }
}

/// EXTH metadata block: typed, length-prefixed records.
#[derive(Debug, Default, Clone)]
pub struct ExthBlock {
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub subjects: Vec<String>,
    pub pub_date: Option<String>,
    pub review: Option<String>,
    pub contributor: Option<String>,
    pub rights: Option<String>,
    pub doc_type: Option<String>,
    pub source: Option<String>,
    pub cover_offset: Option<u32>,
    pub thumbnail_offset: Option<u32>,
    pub has_fake_cover: Option<bool>,
    pub title: Option<String>,
}

impl ExthBlock {
    pub fn parse(data: &[u8], encoding: TextEncoding) -> Result<Self> {
        if data.len() < 12 || &data[0..4] != b"EXTH" {
            return Err(Error::NotMobi);
        }

        let record_count = be32(data, 8);
        let mut exth = ExthBlock::default();
        let mut pos = 12;

        for _ in 0..record_count {
            if pos + 8 > data.len() {
                break;
            }
            let type_code = be32(data, pos);
            let record_len = be32(data, pos + 4) as usize;
            if record_len < 8 || pos + record_len > data.len() {
                break;
            }
            let payload = &data[pos + 8..pos + record_len];
            let text = || decode_text(payload, encoding).trim().to_string();

            match type_code {
                100 => exth.authors.push(text()),
                101 => exth.publisher = Some(text()),
                103 => exth.description = Some(text()),
                104 => exth.isbn = Some(text()),
                105 => exth.subjects.push(text()),
                106 => exth.pub_date = Some(text()),
                107 => exth.review = Some(text()),
                108 => exth.contributor = Some(text()),
                109 => exth.rights = Some(text()),
                111 => exth.doc_type = Some(text()),
                112 => exth.source = Some(text()),
                201 => exth.cover_offset = payload_u32(payload),
                202 => exth.thumbnail_offset = payload_u32(payload),
                203 => exth.has_fake_cover = payload_u32(payload).map(|v| v != 0),
                503 => exth.title = Some(text()),
                _ => {}
            }

            pos += record_len;
        }

        Ok(exth)
    }
}

fn payload_u32(payload: &[u8]) -> Option<u32> {
    if payload.len() >= 4 {
        let val = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        (val != 0xFFFF_FFFF).then_some(val)
    } else {
        None
    }
}

/// Build an EXTH block from typed records.
///
/// The length field covers magic + length + count + records; the NUL pad
/// to a 4-byte boundary is written on top and never counted. At least one
/// pad byte is always written, matching existing files.
pub fn emit_exth(records: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (type_code, payload) in records {
        body.extend_from_slice(&type_code.to_be_bytes());
        body.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        body.extend_from_slice(payload);
    }

    let mut exth = Vec::with_capacity(16 + body.len());
    exth.extend_from_slice(b"EXTH");
    exth.extend_from_slice(&(12 + body.len() as u32).to_be_bytes());
    exth.extend_from_slice(&(records.len() as u32).to_be_bytes());
    exth.extend_from_slice(&body);

    let pad = 4 - exth.len() % 4;
    exth.extend(std::iter::repeat_n(0u8, pad));

    exth
}

/// Inputs for record 0 emission the writer has already computed.
pub struct Record0Spec<'a> {
    pub compression: Compression,
    pub text_length: u32,
    pub text_record_count: u16,
    pub first_non_book_record: u32,
    pub uid: u32,
    pub locale: u32,
    pub title: &'a str,
    pub exth: &'a [u8],
}

/// Emit record 0: PalmDOC header, MOBI header, EXTH, title, NUL padding.
pub fn emit_record0(spec: &Record0Spec<'_>) -> Vec<u8> {
    let title_bytes = spec.title.as_bytes();
    let title_offset = 16 + MOBI_HEADER_LEN + spec.exth.len() as u32;

    let mut r0 = Vec::with_capacity(MIN_RECORD0_LEN);

    // PalmDOC header (0..16)
    r0.extend_from_slice(&spec.compression.code().to_be_bytes());
    r0.extend_from_slice(&[0, 0]);
    r0.extend_from_slice(&spec.text_length.to_be_bytes());
    r0.extend_from_slice(&spec.text_record_count.to_be_bytes());
    r0.extend_from_slice(&(RECORD_SIZE as u16).to_be_bytes());
    r0.extend_from_slice(&0u16.to_be_bytes()); // Encryption: none
    r0.extend_from_slice(&0u16.to_be_bytes());

    // MOBI header (16..248)
    r0.extend_from_slice(b"MOBI");
    r0.extend_from_slice(&MOBI_HEADER_LEN.to_be_bytes());
    r0.extend_from_slice(&2u32.to_be_bytes()); // Book type
    r0.extend_from_slice(&TextEncoding::Utf8.code().to_be_bytes());
    r0.extend_from_slice(&spec.uid.to_be_bytes());
    r0.extend_from_slice(&6u32.to_be_bytes()); // File version (MOBI6)

    // 40..80: reserved index fields
    r0.extend_from_slice(&[0xFF; 8]);
    r0.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    r0.extend_from_slice(&[0xFF; 28]);

    // 80: first non-book (image) record
    r0.extend_from_slice(&spec.first_non_book_record.to_be_bytes());

    // 84..92: full name offset and length
    r0.extend_from_slice(&title_offset.to_be_bytes());
    r0.extend_from_slice(&(title_bytes.len() as u32).to_be_bytes());

    // 92: locale
    r0.extend_from_slice(&spec.locale.to_be_bytes());

    // 96..104: dictionary input/output languages
    r0.extend_from_slice(&[0; 8]);

    // 104..112: min version, first image record (same as first non-book)
    r0.extend_from_slice(&6u32.to_be_bytes());
    r0.extend_from_slice(&spec.first_non_book_record.to_be_bytes());

    // 112..128: HUFF/CDIC offset, count, and table pointers (unused)
    r0.extend_from_slice(&[0; 16]);

    // 128: EXTH flags (0x40 announces the EXTH block)
    r0.extend_from_slice(&0x50u32.to_be_bytes());

    // 132..164: reserved
    r0.extend_from_slice(&[0; 32]);

    // 164..184: DRM offset/count/size/flags (no DRM)
    r0.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    r0.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    r0.extend_from_slice(&[0; 12]);

    // 184..192: reserved
    r0.extend_from_slice(&[0; 8]);

    // 192..196: first/last content record
    let last_content = spec.first_non_book_record.saturating_sub(1) as u16;
    r0.extend_from_slice(&1u16.to_be_bytes());
    r0.extend_from_slice(&last_content.to_be_bytes());

    // 196..240: FCIS/FLIS pointers and padding (none written)
    r0.extend_from_slice(&1u32.to_be_bytes());
    r0.extend_from_slice(&[0; 40]);

    // 240: extra-data flags
    r0.extend_from_slice(&EXTRA_DATA_FLAGS.to_be_bytes());

    // 244..248: primary index record (none)
    r0.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());

    debug_assert_eq!(r0.len(), 16 + MOBI_HEADER_LEN as usize);

    r0.extend_from_slice(spec.exth);
    r0.extend_from_slice(title_bytes);

    if r0.len() < MIN_RECORD0_LEN {
        r0.resize(MIN_RECORD0_LEN, 0);
    }

    r0
}

/// MOBI locale codes for common language tags. Linear scan is fine; the
/// table is tiny and static.
const LANGUAGE_CODES: &[(u32, &str)] = &[
    (9, "en"),
    (1, "ar"),
    (3, "de"),
    (4, "zh"),
    (10, "es"),
    (12, "fr"),
    (16, "it"),
    (17, "ja"),
    (18, "ko"),
    (19, "nl"),
    (21, "pl"),
    (22, "pt"),
    (25, "ru"),
    (29, "sv"),
];

/// Map an IANA language tag (e.g. `en` or `en-US`) to a MOBI locale code.
/// Unknown languages fall back to English.
pub fn locale_for_language(tag: &str) -> u32 {
    let primary = tag.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
    LANGUAGE_CODES
        .iter()
        .find(|(_, t)| *t == primary)
        .map(|(code, _)| *code)
        .unwrap_or(9)
}

/// Map a MOBI locale code back to a language tag.
pub fn language_for_locale(locale: u32) -> Option<&'static str> {
    // Low byte is the primary language; the high byte is a dialect.
    let primary = locale & 0xFF;
    LANGUAGE_CODES
        .iter()
        .find(|(code, _)| *code == primary)
        .map(|(_, tag)| *tag)
}

pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).to_string(),
        TextEncoding::Cp1252 => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.to_string()
        }
    }
}

fn be16(data: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([data[pos], data[pos + 1]])
}

fn be32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn opt_be32(data: &[u8], pos: usize) -> Option<u32> {
    (data.len() >= pos + 4).then(|| be32(data, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_record0() -> Vec<u8> {
        emit_record0(&Record0Spec {
            compression: Compression::PalmDoc,
            text_length: 11,
            text_record_count: 1,
            first_non_book_record: 2,
            uid: 42,
            locale: 9,
            title: "Test Title",
            exth: &emit_exth(&[(100, b"An Author".to_vec())]),
        })
    }

    #[test]
    fn test_record0_roundtrip() {
        let r0 = minimal_record0();
        assert!(r0.len() >= 2452);

        let header = BookHeader::parse(&r0).unwrap();
        assert_eq!(header.compression, Compression::PalmDoc);
        assert_eq!(header.text_length, 11);
        assert_eq!(header.text_record_count, 1);
        assert_eq!(header.text_record_size, 4096);
        assert_eq!(header.encryption, 0);
        assert_eq!(header.encoding, TextEncoding::Utf8);
        assert_eq!(header.first_non_book_record, 2);
        assert_eq!(header.full_name, "Test Title");
        assert_eq!(header.extra_data_flags, EXTRA_DATA_FLAGS);
        assert!(header.has_exth());
    }

    #[test]
    fn test_exth_roundtrip() {
        let r0 = minimal_record0();
        let header = BookHeader::parse(&r0).unwrap();
        let exth = ExthBlock::parse(&r0[header.exth_offset()..], header.encoding).unwrap();
        assert_eq!(exth.authors, vec!["An Author"]);
    }

    #[test]
    fn test_parse_not_mobi() {
        let data = vec![0u8; 64];
        assert!(matches!(BookHeader::parse(&data), Err(Error::NotMobi)));
    }

    #[test]
    fn test_parse_unknown_encoding() {
        let mut r0 = minimal_record0();
        r0[28..32].copy_from_slice(&1200u32.to_be_bytes());
        assert!(matches!(
            BookHeader::parse(&r0),
            Err(Error::UnsupportedEncoding(1200))
        ));
    }

    #[test]
    fn test_parse_encryption_field() {
        let mut r0 = minimal_record0();
        r0[12..14].copy_from_slice(&2u16.to_be_bytes());
        let header = BookHeader::parse(&r0).unwrap();
        assert_eq!(header.encryption, 2);
    }

    #[test]
    fn test_exth_pad_is_at_least_one_nul() {
        // 12-byte header + one 8-byte record = 20 bytes, already aligned,
        // still gets a full 4-byte pad.
        let exth = emit_exth(&[(201, 0u32.to_be_bytes().to_vec())]);
        assert_eq!(exth.len(), 24 + 4);
        let declared = u32::from_be_bytes([exth[4], exth[5], exth[6], exth[7]]);
        assert_eq!(declared, 24);
        assert!(exth[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_exth_cover_and_thumb() {
        let exth_bytes = emit_exth(&[
            (201, 0u32.to_be_bytes().to_vec()),
            (202, 1u32.to_be_bytes().to_vec()),
            (203, 0u32.to_be_bytes().to_vec()),
        ]);
        let exth = ExthBlock::parse(&exth_bytes, TextEncoding::Utf8).unwrap();
        assert_eq!(exth.cover_offset, Some(0));
        assert_eq!(exth.thumbnail_offset, Some(1));
        assert_eq!(exth.has_fake_cover, Some(false));
    }

    #[test]
    fn test_exth_updated_title_overrides_full_name() {
        let r0 = emit_record0(&Record0Spec {
            compression: Compression::PalmDoc,
            text_length: 0,
            text_record_count: 0,
            first_non_book_record: 1,
            uid: 0,
            locale: 9,
            title: "Original Title",
            exth: &emit_exth(&[(503, b"Updated Title".to_vec())]),
        });
        let header = BookHeader::parse(&r0).unwrap();
        assert_eq!(header.full_name, "Original Title");
        let exth = ExthBlock::parse(&r0[header.exth_offset()..], header.encoding).unwrap();
        assert_eq!(exth.title.as_deref(), Some("Updated Title"));
    }

    #[test]
    fn test_exth_truncated_record_ignored() {
        let mut exth_bytes = emit_exth(&[(100, b"Author".to_vec())]);
        // Claim two records but provide one.
        exth_bytes[8..12].copy_from_slice(&2u32.to_be_bytes());
        let exth = ExthBlock::parse(&exth_bytes, TextEncoding::Utf8).unwrap();
        assert_eq!(exth.authors, vec!["Author"]);
    }

    #[test]
    fn test_compression_codes() {
        assert_eq!(Compression::from_code(2).unwrap(), Compression::PalmDoc);
        assert_eq!(Compression::from_code(17480).unwrap(), Compression::HuffCdic);
        assert!(Compression::from_code(3).is_err());
        assert_eq!(Compression::PalmDoc.code(), 2);
    }

    #[test]
    fn test_locale_lookup() {
        assert_eq!(locale_for_language("en-US"), 9);
        assert_eq!(locale_for_language("fr"), 12);
        assert_eq!(locale_for_language("tlh"), 9);
        assert_eq!(language_for_locale(9), Some("en"));
        assert_eq!(language_for_locale(0x409), Some("en"));
    }

    #[test]
    fn test_textread_defaults() {
        let mut record0 = vec![0u8; 16];
        record0[0..2].copy_from_slice(&2u16.to_be_bytes());
        record0[8..10].copy_from_slice(&3u16.to_be_bytes());
        let header = BookHeader::textread(&record0).unwrap();
        assert_eq!(header.encoding, TextEncoding::Cp1252);
        assert_eq!(header.text_record_count, 3);
        assert!(!header.has_exth());
    }
}
