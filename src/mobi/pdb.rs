//! PalmDB (PDB) container: a 78-byte header, a record directory, and raw
//! record bodies.
//!
//! All multi-byte integers are big-endian. Timestamps count seconds since
//! the Palm epoch (1904-01-01 UTC).

use crate::error::{Error, Result};

/// Seconds between the Palm epoch (1904-01-01) and the Unix epoch.
pub const PALM_EPOCH_OFFSET: u64 = 2_082_844_800;

const HEADER_LEN: usize = 78;
const DIRECTORY_ENTRY_LEN: usize = 8;

/// Fixed PDB header fields.
#[derive(Debug, Clone)]
pub struct PdbHeader {
    /// Database name, at most 31 bytes on disk (NUL-padded to 32).
    pub name: String,
    pub attributes: u16,
    pub version: u16,
    pub created: u32,
    pub modified: u32,
    pub backed_up: u32,
    pub modification_number: u32,
    pub app_info_offset: u32,
    pub sort_info_offset: u32,
    /// 4-byte type code, `BOOK` for MOBI books.
    pub type_code: [u8; 4],
    /// 4-byte creator code, `MOBI` for MOBI books.
    pub creator: [u8; 4],
    pub last_uid: u32,
    pub next_record_list: u32,
}

impl PdbHeader {
    /// Header for a new `BOOKMOBI` database with the given name.
    pub fn new_book(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: 0,
            version: 0,
            created: 0,
            modified: 0,
            backed_up: 0,
            modification_number: 0,
            app_info_offset: 0,
            sort_info_offset: 0,
            type_code: *b"BOOK",
            creator: *b"MOBI",
            last_uid: 0,
            next_record_list: 0,
        }
    }

    /// True for the ancient Palm text format, accepted on read only.
    pub fn is_textread(&self) -> bool {
        let mut ident = [0u8; 8];
        ident[..4].copy_from_slice(&self.type_code);
        ident[4..].copy_from_slice(&self.creator);
        ident.eq_ignore_ascii_case(b"TEXTREAD")
    }
}

/// One record: its directory entry plus the body bytes.
#[derive(Debug, Clone)]
pub struct PdbRecord {
    pub offset: u32,
    pub flags: u8,
    pub uid: u32,
    pub body: Vec<u8>,
}

impl PdbRecord {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            offset: 0,
            flags: 0,
            uid: 0,
            body,
        }
    }
}

/// Parse a PDB blob into its header and records.
///
/// Record bodies are sliced between consecutive directory offsets; the last
/// record runs to end of blob.
pub fn parse(data: &[u8]) -> Result<(PdbHeader, Vec<PdbRecord>)> {
    if data.len() < HEADER_LEN {
        return Err(Error::ShortHeader(data.len()));
    }

    let ident = &data[60..68];
    if ident != b"BOOKMOBI" && !ident.eq_ignore_ascii_case(b"TEXTREAD") {
        return Err(Error::WrongContainer(
            String::from_utf8_lossy(ident).to_string(),
        ));
    }

    let name_end = data[..32].iter().position(|&b| b == 0).unwrap_or(32);
    let name = String::from_utf8_lossy(&data[..name_end]).to_string();

    let header = PdbHeader {
        name,
        attributes: be16(data, 32),
        version: be16(data, 34),
        created: be32(data, 36),
        modified: be32(data, 40),
        backed_up: be32(data, 44),
        modification_number: be32(data, 48),
        app_info_offset: be32(data, 52),
        sort_info_offset: be32(data, 56),
        type_code: [data[60], data[61], data[62], data[63]],
        creator: [data[64], data[65], data[66], data[67]],
        last_uid: be32(data, 68),
        next_record_list: be32(data, 72),
    };

    let num_records = be16(data, 76) as usize;
    let directory_end = HEADER_LEN + num_records * DIRECTORY_ENTRY_LEN;
    if data.len() < directory_end {
        return Err(Error::CorruptRecordTable(format!(
            "directory needs {} bytes, file has {}",
            directory_end,
            data.len()
        )));
    }

    // Directory pass: offsets must be strictly increasing and in bounds.
    let mut entries = Vec::with_capacity(num_records);
    let mut prev_offset = 0u32;
    for i in 0..num_records {
        let pos = HEADER_LEN + i * DIRECTORY_ENTRY_LEN;
        let offset = be32(data, pos);
        let flags = data[pos + 4];
        let uid = u32::from_be_bytes([0, data[pos + 5], data[pos + 6], data[pos + 7]]);

        if offset as usize >= data.len() {
            return Err(Error::CorruptRecordTable(format!(
                "record {i} offset {offset} beyond end of file"
            )));
        }
        if i > 0 && offset <= prev_offset {
            return Err(Error::CorruptRecordTable(format!(
                "record {i} offset {offset} not after previous offset {prev_offset}"
            )));
        }
        prev_offset = offset;
        entries.push((offset, flags, uid));
    }

    let mut records = Vec::with_capacity(num_records);
    for (i, &(offset, flags, uid)) in entries.iter().enumerate() {
        let start = offset as usize;
        let end = if i + 1 < entries.len() {
            entries[i + 1].0 as usize
        } else {
            data.len()
        };
        records.push(PdbRecord {
            offset,
            flags,
            uid,
            body: data[start..end].to_vec(),
        });
    }

    Ok((header, records))
}

/// Emit a PDB blob, recomputing the record directory from actual body
/// sizes.
///
/// The header's timestamp fields are written as-is; callers wanting the
/// current time fill them first (see [`palm_time_now`]). Output is
/// deterministic given its inputs.
pub fn emit(header: &PdbHeader, records: &[PdbRecord]) -> Result<Vec<u8>> {
    if records.len() > u16::MAX as usize {
        return Err(Error::CorruptRecordTable(format!(
            "{} records exceed the u16 directory limit",
            records.len()
        )));
    }
    let directory_len = records.len() * DIRECTORY_ENTRY_LEN;
    // First body lands after the directory and a 2-byte pad.
    let mut offset = HEADER_LEN + directory_len + 2;
    let mut offsets = Vec::with_capacity(records.len());
    for record in records {
        if offset > u32::MAX as usize {
            return Err(Error::RecordTooLarge);
        }
        offsets.push(offset as u32);
        offset += record.body.len();
    }
    if offset > u32::MAX as usize {
        return Err(Error::RecordTooLarge);
    }

    let mut out = Vec::with_capacity(offset);

    let mut name_bytes = [0u8; 32];
    let name = header.name.as_bytes();
    let copy_len = name.len().min(31);
    name_bytes[..copy_len].copy_from_slice(&name[..copy_len]);
    out.extend_from_slice(&name_bytes);

    out.extend_from_slice(&header.attributes.to_be_bytes());
    out.extend_from_slice(&header.version.to_be_bytes());
    out.extend_from_slice(&header.created.to_be_bytes());
    out.extend_from_slice(&header.modified.to_be_bytes());
    out.extend_from_slice(&header.backed_up.to_be_bytes());
    out.extend_from_slice(&header.modification_number.to_be_bytes());
    out.extend_from_slice(&header.app_info_offset.to_be_bytes());
    out.extend_from_slice(&header.sort_info_offset.to_be_bytes());
    out.extend_from_slice(&header.type_code);
    out.extend_from_slice(&header.creator);
    out.extend_from_slice(&header.last_uid.to_be_bytes());
    out.extend_from_slice(&header.next_record_list.to_be_bytes());
    out.extend_from_slice(&(records.len() as u16).to_be_bytes());

    for (record, &off) in records.iter().zip(&offsets) {
        out.extend_from_slice(&off.to_be_bytes());
        let uid = record.uid.to_be_bytes();
        out.extend_from_slice(&[record.flags, uid[1], uid[2], uid[3]]);
    }

    // Gap
    out.extend_from_slice(&[0, 0]);

    for record in records {
        out.extend_from_slice(&record.body);
    }

    Ok(out)
}

/// Current time in Palm epoch seconds.
pub fn palm_time_now() -> u32 {
    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (unix + PALM_EPOCH_OFFSET) as u32
}

fn be16(data: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([data[pos], data[pos + 1]])
}

fn be32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}
