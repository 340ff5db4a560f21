//! MOBI write path: book to container.
//!
//! [`write_mobi`] serializes the spine, splits the stream into 4096-byte
//! text records with overlap and break trailers, lays out the image
//! records (manifest order, then cover, then thumbnail), builds EXTH and
//! record 0, and emits the PDB container.

use std::fs;
use std::path::Path;

use crate::book::{ImageItem, ImageOps, Metadata, SpineItem};
use crate::error::{Error, Result};
use crate::mobi::headers::{
    self, Compression, Record0Spec, emit_exth, emit_record0,
};
use crate::mobi::records::{append_trailers, split_text_records};
use crate::mobi::serializer::{ImageTable, Serializer};
use crate::mobi::{palmdoc, pdb};

/// Thumbnail budget Kindle devices expect.
const THUMBNAIL_MAX_BYTES: usize = 16 * 1024;
const THUMBNAIL_MAX_DIMS: (u32, u32) = (180, 240);

/// Per-image byte budgets by output profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Modern readers: generous image budget.
    #[default]
    Generic,
    /// Ancient Palm hardware: tiny records throughout.
    PalmDevice,
}

impl Profile {
    fn max_image_bytes(self) -> usize {
        match self {
            Profile::Generic => 10 * 1024 * 1024,
            Profile::PalmDevice => 63 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub compression: Compression,
    pub profile: Profile,
    /// Unix seconds for the container timestamps. `None` means now;
    /// setting it makes output fully deterministic.
    pub timestamp: Option<u64>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::PalmDoc,
            profile: Profile::Generic,
            timestamp: None,
        }
    }
}

/// Write a book as a MOBI container in memory.
pub fn write_mobi(
    spine: &[SpineItem],
    metadata: &Metadata,
    images: &[ImageItem],
    image_ops: &dyn ImageOps,
    options: &WriteOptions,
) -> Result<Vec<u8>> {
    if metadata.title.trim().is_empty() {
        return Err(Error::NoTitle);
    }
    let title = metadata.title.trim();

    let layout = layout_images(metadata, images, image_ops, options.profile)?;

    let serialized = Serializer::serialize(spine, &layout.table);
    let text_length = serialized.text.len() as u32;

    let chunks = split_text_records(&serialized.text);
    let text_record_count = chunks.len() as u16;

    let mut records = Vec::with_capacity(2 + chunks.len() + layout.records.len());
    records.push(pdb::PdbRecord::new(Vec::new())); // record 0 placeholder

    for chunk in &chunks {
        let mut body = match options.compression {
            Compression::None => chunk.text.clone(),
            Compression::PalmDoc => palmdoc::compress(&chunk.text),
            Compression::HuffCdic => {
                return Err(Error::UnsupportedCompression(Compression::HuffCdic.code()));
            }
        };
        let breaks: Vec<usize> = serialized
            .breaks
            .iter()
            .filter(|&&b| b >= chunk.start && b < chunk.start + chunk.text.len())
            .map(|&b| b - chunk.start)
            .collect();
        append_trailers(&mut body, &chunk.overlap, &breaks);
        records.push(pdb::PdbRecord::new(body));
    }

    let first_non_book_record = records.len() as u32;
    let exth = build_exth(metadata, title, &layout);
    for image in layout.records {
        records.push(pdb::PdbRecord::new(image));
    }

    records[0].body = emit_record0(&Record0Spec {
        compression: options.compression,
        text_length,
        text_record_count,
        first_non_book_record,
        uid: 0,
        locale: headers::locale_for_language(&metadata.language),
        title,
        exth: &exth,
    });

    for (i, record) in records.iter_mut().enumerate() {
        record.uid = 2 * i as u32;
    }

    let mut pdb_header = pdb::PdbHeader::new_book(&palm_name(title));
    let stamp = match options.timestamp {
        Some(unix) => (unix + pdb::PALM_EPOCH_OFFSET) as u32,
        None => pdb::palm_time_now(),
    };
    pdb_header.created = stamp;
    pdb_header.modified = stamp;
    pdb_header.last_uid = (2 * records.len() - 1) as u32;

    pdb::emit(&pdb_header, &records)
}

/// Write a book as a MOBI file on disk.
pub fn write_mobi_to(
    path: &Path,
    spine: &[SpineItem],
    metadata: &Metadata,
    images: &[ImageItem],
    image_ops: &dyn ImageOps,
    options: &WriteOptions,
) -> Result<()> {
    let bytes = write_mobi(spine, metadata, images, image_ops, options)?;
    fs::write(path, bytes)?;
    Ok(())
}

struct ImageLayout {
    /// href -> 1-based record index, manifest images only.
    table: ImageTable,
    /// Image record bodies in emission order.
    records: Vec<Vec<u8>>,
    /// 0-based index of the cover within the image records.
    cover: Option<u32>,
    thumbnail: Option<u32>,
}

/// Rescale and order the image records.
///
/// Manifest images that fail to rescale are dropped with a warning; their
/// references serialize as empty `src`. A cover that fails is a hard
/// error, a thumbnail that fails is dropped.
fn layout_images(
    metadata: &Metadata,
    images: &[ImageItem],
    image_ops: &dyn ImageOps,
    profile: Profile,
) -> Result<ImageLayout> {
    let max_bytes = profile.max_image_bytes();
    let mut table = ImageTable::new();
    let mut records = Vec::new();

    for image in images {
        match image_ops.rescale(&image.data, max_bytes, None) {
            Ok(data) => {
                records.push(data);
                table.insert(&image.href, records.len());
            }
            Err(err) => {
                log::warn!("dropping image {}: {err}", image.href);
            }
        }
    }

    let mut cover = None;
    let mut thumbnail = None;
    if let Some(cover_data) = &metadata.cover {
        let data = image_ops
            .rescale(cover_data, max_bytes, None)
            .map_err(Error::CoverRescale)?;
        records.push(data);
        cover = Some(records.len() as u32 - 1);

        match image_ops.rescale(cover_data, THUMBNAIL_MAX_BYTES, Some(THUMBNAIL_MAX_DIMS)) {
            Ok(data) => {
                records.push(data);
                thumbnail = Some(records.len() as u32 - 1);
            }
            Err(err) => {
                log::warn!("dropping cover thumbnail: {err}");
            }
        }
    }

    Ok(ImageLayout {
        table,
        records,
        cover,
        thumbnail,
    })
}

fn build_exth(metadata: &Metadata, title: &str, layout: &ImageLayout) -> Vec<u8> {
    let mut records: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut text = |code: u32, value: &str| {
        if !value.is_empty() {
            records.push((code, value.as_bytes().to_vec()));
        }
    };

    for author in &metadata.authors {
        text(100, author);
    }
    if let Some(publisher) = &metadata.publisher {
        text(101, publisher);
    }
    if let Some(description) = &metadata.description {
        text(103, description);
    }
    if let Some(isbn) = &metadata.isbn {
        text(104, isbn);
    }
    for subject in &metadata.subjects {
        text(105, subject);
    }
    if let Some(date) = &metadata.date {
        text(106, date);
    }
    if let Some(rights) = &metadata.rights {
        text(109, rights);
    }

    if let Some(cover) = layout.cover {
        records.push((201, cover.to_be_bytes().to_vec()));
        records.push((203, 0u32.to_be_bytes().to_vec()));
    }
    if let Some(thumbnail) = layout.thumbnail {
        records.push((202, thumbnail.to_be_bytes().to_vec()));
    }
    records.push((503, title.as_bytes().to_vec()));

    emit_exth(&records)
}

/// Database name: printable ASCII subset of the title, 31 bytes max.
fn palm_name(title: &str) -> String {
    let mut name: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.truncate(31);
    name
}
