//! MOBI read path: container to in-memory book.
//!
//! [`read_mobi_bytes`] walks the PDB record list, reassembles the logical
//! text stream, rewrites filepos anchors and image references, and probes
//! the non-book records for images. [`MobiBook::extract_to`] materializes
//! the result as `book.html`, an `images/` directory and a `content.opf`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::escape::escape;

use crate::book::Metadata;
use crate::error::{Error, Result};
use crate::mobi::headers::{
    self, BookHeader, Compression, ExthBlock, TextEncoding,
};
use crate::mobi::records::strip_trailing_entries;
use crate::mobi::{filepos, palmdoc, pdb};

/// A book reassembled from a MOBI container.
#[derive(Debug)]
pub struct MobiBook {
    pub metadata: Metadata,
    /// The rewritten single-document HTML.
    pub html: String,
    /// Image slots, positional: slot `i` holds the body of record
    /// `first_non_book_record + i`, or `None` when that record was not a
    /// recognizable image. `recindex` K refers to slot K-1.
    pub images: Vec<Option<Vec<u8>>>,
    /// Slot index of the EXTH-designated cover.
    pub cover_index: Option<usize>,
    pub thumbnail_index: Option<usize>,
    /// EXTH 203: the cover was synthesized rather than supplied.
    pub has_fake_cover: bool,
}

/// Paths written by [`MobiBook::extract_to`].
#[derive(Debug)]
pub struct Extraction {
    pub html_path: PathBuf,
    pub opf_path: PathBuf,
    pub image_paths: Vec<PathBuf>,
}

/// Read a MOBI (or ancient TEXtREAd) container from memory.
pub fn read_mobi_bytes(data: &[u8]) -> Result<MobiBook> {
    let (pdb_header, records) = pdb::parse(data)?;

    let textread = pdb_header.is_textread();
    if records.is_empty() {
        return Err(Error::CorruptRecordTable("no records".to_string()));
    }

    let record0 = &records[0].body;
    let header = if textread {
        BookHeader::textread(record0)?
    } else {
        BookHeader::parse(record0)?
    };

    let exth = if header.has_exth() && header.exth_offset() < record0.len() {
        ExthBlock::parse(&record0[header.exth_offset()..], header.encoding).unwrap_or_default()
    } else {
        ExthBlock::default()
    };

    // Title first so a DRM failure can name the book.
    let title = exth
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| (!header.full_name.is_empty()).then(|| header.full_name.clone()))
        .unwrap_or_else(|| pdb_header.name.clone());

    if header.encryption != 0 {
        return Err(Error::DrmProtected { title });
    }
    if header.compression == Compression::HuffCdic {
        return Err(Error::UnsupportedCompression(header.compression.code()));
    }

    // Reassemble the logical text stream.
    let text_end = (header.text_record_count as usize).min(records.len().saturating_sub(1));
    let mut text = Vec::with_capacity(header.text_length as usize);
    for record in &records[1..=text_end] {
        let body = strip_trailing_entries(&record.body, header.extra_data_flags);
        match header.compression {
            Compression::None => text.extend_from_slice(body),
            Compression::PalmDoc => text.extend_from_slice(&palmdoc::decompress(body)?),
            Compression::HuffCdic => unreachable!(),
        }
    }
    if text.len() > header.text_length as usize {
        text.truncate(header.text_length as usize);
    }

    let images = collect_images(&records, &header);

    let html = filepos::transform_html(&text);
    let html = filepos::rewrite_image_refs(&html, images.len());
    let html = decode_html(&html, header.encoding);

    let metadata = build_metadata(&pdb_header, &header, &exth, title);

    let cover_index = exth
        .cover_offset
        .map(|o| o as usize)
        .filter(|&o| images.get(o).is_some_and(Option::is_some));
    let thumbnail_index = exth
        .thumbnail_offset
        .map(|o| o as usize)
        .filter(|&o| images.get(o).is_some_and(Option::is_some));

    Ok(MobiBook {
        metadata,
        html,
        images,
        cover_index,
        thumbnail_index,
        has_fake_cover: exth.has_fake_cover.unwrap_or(false),
    })
}

/// Decode the rewritten HTML bytes with the declared encoding. A MOBI that
/// declares UTF-8 but carries invalid sequences is re-read as cp1252.
fn decode_html(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Cp1252 => headers::decode_text(bytes, TextEncoding::Cp1252),
        TextEncoding::Utf8 => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => {
                log::warn!("declared UTF-8 text is not valid UTF-8, falling back to cp1252");
                headers::decode_text(bytes, TextEncoding::Cp1252)
            }
        },
    }
}

/// Probe the non-book records for raster images.
///
/// Slots stay positional: slot `i` maps to record
/// `first_non_book_record + i` so `recindex` and EXTH cover offsets keep
/// their record-relative meaning even when metadata records interleave
/// with images. FLIS/FCIS style records yield empty slots silently;
/// anything else unrecognizable is warned about, so one bad record never
/// sinks the book.
fn collect_images(records: &[pdb::PdbRecord], header: &BookHeader) -> Vec<Option<Vec<u8>>> {
    let first = if header.first_non_book_record > 0 {
        header.first_non_book_record as usize
    } else {
        header.text_record_count as usize + 1
    };
    if first >= records.len() {
        return Vec::new();
    }

    let mut slots = Vec::new();
    for (i, record) in records.iter().enumerate().skip(first) {
        let body = &record.body;
        if image_magic(body) {
            slots.push(Some(body.clone()));
        } else {
            if !is_metadata_record(body) {
                log::warn!("record {i} is neither an image nor known metadata, skipping");
            }
            slots.push(None);
        }
    }
    // Trailing FLIS/FCIS records don't deserve slots.
    while slots.last().is_some_and(Option::is_none) {
        slots.pop();
    }
    slots
}

fn is_metadata_record(body: &[u8]) -> bool {
    const TAGS: [&[u8]; 8] = [
        b"FLIS", b"FCIS", b"FDST", b"DATP", b"SRCS", b"CMET", b"AUDI", b"VIDE",
    ];
    if body.len() >= 4 {
        TAGS.iter().any(|tag| body.starts_with(tag))
            || body.starts_with(b"BOUNDARY")
            || body == b"\xE9\x8E\x0D\x0A".as_slice()
    } else {
        body.iter().all(|&b| b == 0)
    }
}

fn image_magic(body: &[u8]) -> bool {
    body.starts_with(&[0xFF, 0xD8, 0xFF])
        || body.starts_with(b"GIF87a")
        || body.starts_with(b"GIF89a")
        || body.starts_with(&[0x89, b'P', b'N', b'G'])
        || body.starts_with(b"BM")
}

fn build_metadata(
    pdb_header: &pdb::PdbHeader,
    header: &BookHeader,
    exth: &ExthBlock,
    title: String,
) -> Metadata {
    Metadata {
        title,
        authors: exth.authors.clone(),
        language: headers::language_for_locale(header.locale)
            .unwrap_or("en")
            .to_string(),
        identifier: format!("{}-{}", pdb_header.name, header.uid),
        publisher: exth.publisher.clone(),
        description: exth.description.clone(),
        subjects: exth.subjects.clone(),
        date: exth.pub_date.clone(),
        rights: exth.rights.clone(),
        isbn: exth.isbn.clone(),
        cover: None,
    }
}

impl MobiBook {
    /// Write the book to `dir` as `book.html`, `images/{K:05}.jpg` and a
    /// minimal `content.opf`.
    pub fn extract_to(&self, dir: &Path) -> Result<Extraction> {
        fs::create_dir_all(dir)?;
        let html_path = dir.join("book.html");
        fs::write(&html_path, &self.html)?;

        let mut image_paths = Vec::with_capacity(self.images.len());
        if self.images.iter().any(Option::is_some) {
            let images_dir = dir.join("images");
            fs::create_dir_all(&images_dir)?;
            for (i, slot) in self.images.iter().enumerate() {
                let Some(data) = slot else { continue };
                let path = images_dir.join(format!("{:05}.jpg", i + 1));
                fs::write(&path, data)?;
                image_paths.push(path);
            }
        }

        let opf_path = dir.join("content.opf");
        fs::write(&opf_path, self.build_opf())?;

        Ok(Extraction {
            html_path,
            opf_path,
            image_paths,
        })
    }

    fn build_opf(&self) -> String {
        let meta = &self.metadata;
        let mut dc = BTreeMap::new();
        dc.insert("dc:title", vec![meta.title.clone()]);
        dc.insert("dc:language", vec![meta.language.clone()]);
        dc.insert("dc:identifier", vec![meta.identifier.clone()]);
        dc.insert("dc:creator", meta.authors.clone());
        dc.insert("dc:subject", meta.subjects.clone());
        if let Some(publisher) = &meta.publisher {
            dc.insert("dc:publisher", vec![publisher.clone()]);
        }
        if let Some(description) = &meta.description {
            dc.insert("dc:description", vec![description.clone()]);
        }
        if let Some(date) = &meta.date {
            dc.insert("dc:date", vec![date.clone()]);
        }
        if let Some(rights) = &meta.rights {
            dc.insert("dc:rights", vec![rights.clone()]);
        }

        let mut opf = String::from(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <package xmlns=\"http://www.idpf.org/2007/opf\" version=\"2.0\" unique-identifier=\"uid\">\n\
             <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n",
        );
        for (tag, values) in &dc {
            for value in values {
                if *tag == "dc:identifier" {
                    opf.push_str(&format!("<{tag} id=\"uid\">{}</{tag}>\n", escape(value.as_str())));
                } else {
                    opf.push_str(&format!("<{tag}>{}</{tag}>\n", escape(value.as_str())));
                }
            }
        }
        if let Some(cover) = self.cover_index {
            opf.push_str(&format!(
                "<meta name=\"cover\" content=\"img{:05}\"/>\n",
                cover + 1
            ));
        }
        opf.push_str("</metadata>\n<manifest>\n");
        opf.push_str("<item id=\"text\" href=\"book.html\" media-type=\"text/html\"/>\n");
        for (i, slot) in self.images.iter().enumerate() {
            if slot.is_some() {
                opf.push_str(&format!(
                    "<item id=\"img{0:05}\" href=\"images/{0:05}.jpg\" media-type=\"image/jpeg\"/>\n",
                    i + 1
                ));
            }
        }
        opf.push_str(
            "</manifest>\n<spine>\n<itemref idref=\"text\"/>\n</spine>\n</package>\n",
        );
        opf
    }
}
