//! Offset-tracking HTML serializer for the MOBI writer.
//!
//! Serializes the spine to a single byte stream while recording the
//! absolute byte position of every element id. Internal hrefs are emitted
//! as `filepos=` plus ten reserved decimal digits; once the whole stream
//! exists, [`Serializer::finalize`] patches each reserved slot with the
//! resolved target offset. Images resolve through the record table to
//! `recindex` attributes. Spine item boundaries become uncrossable breaks.

use std::collections::{HashMap, HashSet};

use quick_xml::escape::escape;

use crate::book::{DomEvent, SpineItem};

/// Width of a reserved filepos slot.
const FILEPOS_DIGITS: usize = 10;

/// Maps manifest image hrefs to their 1-based record indices.
#[derive(Debug, Default)]
pub struct ImageTable {
    map: HashMap<String, usize>,
}

impl ImageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, href: &str, index: usize) {
        self.map.insert(href.to_string(), index);
    }

    pub fn get(&self, href: &str) -> Option<usize> {
        self.map.get(href).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A reserved filepos slot awaiting resolution.
struct PatchSite {
    /// Buffer offset of the first reserved digit.
    at: usize,
    /// (document href, fragment) the link points to.
    target: (String, String),
}

/// Serialized stream plus the break offsets the record splitter needs.
pub struct SerializedText {
    pub text: Vec<u8>,
    pub breaks: Vec<usize>,
}

pub struct Serializer<'a> {
    buf: Vec<u8>,
    images: &'a ImageTable,
    spine_hrefs: HashSet<String>,
    /// (document href, fragment id) -> absolute offset of the opening `<`.
    id_offsets: HashMap<(String, String), usize>,
    patch_sites: Vec<PatchSite>,
    breaks: Vec<usize>,
    current_href: String,
}

impl<'a> Serializer<'a> {
    pub fn new(spine: &[SpineItem], images: &'a ImageTable) -> Self {
        Self {
            buf: Vec::new(),
            images,
            spine_hrefs: spine.iter().map(|s| s.href.clone()).collect(),
            id_offsets: HashMap::new(),
            patch_sites: Vec::new(),
            breaks: Vec::new(),
            current_href: String::new(),
        }
    }

    /// Serialize the whole spine and resolve anchor offsets.
    pub fn serialize(spine: &[SpineItem], images: &'a ImageTable) -> SerializedText {
        let mut ser = Serializer::new(spine, images);
        ser.buf.extend_from_slice(b"<html><body>");

        for (i, item) in spine.iter().enumerate() {
            if i > 0 {
                ser.buf.extend_from_slice(b"<mbp:pagebreak/>");
            }
            ser.breaks.push(ser.buf.len());
            ser.serialize_item(item);
        }

        ser.buf.extend_from_slice(b"</body></html>");
        ser.finalize()
    }

    fn serialize_item(&mut self, item: &SpineItem) {
        self.current_href = item.href.clone();
        self.id_offsets
            .insert((item.href.clone(), String::new()), self.buf.len());

        for event in &item.events {
            match event {
                DomEvent::Start { tag, attrs, id } => self.serialize_start(tag, attrs, id.as_deref()),
                DomEvent::Text(text) | DomEvent::Tail(text) => {
                    self.buf.extend_from_slice(escape(text.as_str()).as_bytes());
                }
                DomEvent::End(tag) => {
                    if !is_void(tag) {
                        self.buf.extend_from_slice(format!("</{tag}>").as_bytes());
                    }
                }
            }
        }
    }

    fn serialize_start(&mut self, tag: &str, attrs: &[(String, String)], id: Option<&str>) {
        if let Some(id) = id {
            self.id_offsets
                .insert((self.current_href.clone(), id.to_string()), self.buf.len());
        }

        self.buf.push(b'<');
        self.buf.extend_from_slice(tag.as_bytes());

        if let Some(id) = id {
            self.write_attr("id", id);
        }

        for (name, value) in attrs {
            match name.as_str() {
                "href" => self.serialize_href(value),
                "src" if tag == "img" => self.serialize_src(value),
                _ => self.write_attr(name, value),
            }
        }

        if is_void(tag) {
            self.buf.extend_from_slice(b" />");
        } else {
            self.buf.push(b'>');
        }
    }

    /// Internal links become reserved filepos slots; everything else keeps
    /// its href.
    fn serialize_href(&mut self, value: &str) {
        let (doc, fragment) = match value.split_once('#') {
            Some(("", frag)) => (self.current_href.clone(), frag.to_string()),
            Some((doc, frag)) => (doc.to_string(), frag.to_string()),
            None => (value.to_string(), String::new()),
        };

        if self.spine_hrefs.contains(&doc) {
            self.buf.extend_from_slice(b" filepos=");
            let at = self.buf.len();
            self.buf.extend_from_slice(&[b'0'; FILEPOS_DIGITS]);
            self.patch_sites.push(PatchSite {
                at,
                target: (doc, fragment),
            });
        } else {
            self.write_attr("href", value);
        }
    }

    fn serialize_src(&mut self, value: &str) {
        match self.images.get(value) {
            Some(index) => {
                self.buf
                    .extend_from_slice(format!(" recindex=\"{index:05}\"").as_bytes());
            }
            None => {
                // Dropped or unknown image; reference rewritten to empty.
                self.write_attr("src", "");
            }
        }
    }

    fn write_attr(&mut self, name: &str, value: &str) {
        self.buf.push(b' ');
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.extend_from_slice(b"=\"");
        self.buf.extend_from_slice(escape(value).as_bytes());
        self.buf.push(b'"');
    }

    /// Patch every reserved slot with its zero-padded target offset.
    /// Unresolved targets warn and stay zero.
    fn finalize(mut self) -> SerializedText {
        let sites = std::mem::take(&mut self.patch_sites);
        for site in &sites {
            let offset = self
                .id_offsets
                .get(&site.target)
                .or_else(|| {
                    // Fall back to the document start for bare or unknown
                    // fragments.
                    self.id_offsets
                        .get(&(site.target.0.clone(), String::new()))
                })
                .copied();

            match offset {
                Some(offset) => {
                    let digits = format!("{offset:010}");
                    self.buf[site.at..site.at + FILEPOS_DIGITS]
                        .copy_from_slice(digits.as_bytes());
                }
                None => {
                    log::warn!(
                        "unresolved link target {}#{}",
                        site.target.0,
                        site.target.1
                    );
                }
            }
        }

        SerializedText {
            text: self.buf,
            breaks: self.breaks,
        }
    }
}

fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "img" | "br" | "hr" | "meta" | "link" | "input" | "mbp:pagebreak"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::DomEvent;

    fn item(href: &str, events: Vec<DomEvent>) -> SpineItem {
        SpineItem::new(href, events)
    }

    #[test]
    fn test_simple_item() {
        let spine = vec![item(
            "a.html",
            vec![
                DomEvent::start("p"),
                DomEvent::text("hello & goodbye"),
                DomEvent::end("p"),
            ],
        )];
        let images = ImageTable::new();
        let out = Serializer::serialize(&spine, &images);
        let s = String::from_utf8(out.text).unwrap();
        assert_eq!(s, "<html><body><p>hello &amp; goodbye</p></body></html>");
        assert_eq!(out.breaks, vec![12]);
    }

    #[test]
    fn test_pagebreak_between_items() {
        let spine = vec![
            item("a.html", vec![DomEvent::start("p"), DomEvent::text("one"), DomEvent::end("p")]),
            item("b.html", vec![DomEvent::start("p"), DomEvent::text("two"), DomEvent::end("p")]),
        ];
        let images = ImageTable::new();
        let out = Serializer::serialize(&spine, &images);
        let s = String::from_utf8(out.text).unwrap();
        assert!(s.contains("</p><mbp:pagebreak/><p>two"));
        assert_eq!(out.breaks.len(), 2);
        // Second break points at the first byte after the pagebreak.
        assert_eq!(&s.as_bytes()[out.breaks[1]..out.breaks[1] + 3], b"<p>");
    }

    #[test]
    fn test_internal_href_resolves_to_id_offset() {
        let spine = vec![
            item(
                "a.html",
                vec![
                    DomEvent::start_with("a", &[("href", "b.html#ch2")], None),
                    DomEvent::text("go"),
                    DomEvent::end("a"),
                ],
            ),
            item(
                "b.html",
                vec![
                    DomEvent::start_with("h1", &[], Some("ch2")),
                    DomEvent::text("C2"),
                    DomEvent::end("h1"),
                ],
            ),
        ];
        let images = ImageTable::new();
        let out = Serializer::serialize(&spine, &images);
        let s = String::from_utf8(out.text.clone()).unwrap();

        // The filepos digits name the offset of the target <h1.
        let at = s.find("filepos=").unwrap() + 8;
        let offset: usize = s[at..at + 10].parse().unwrap();
        assert_eq!(&out.text[offset..offset + 4], b"<h1 ");
        assert!(s[offset..].starts_with("<h1 id=\"ch2\">C2</h1>"));
    }

    #[test]
    fn test_fragment_only_href() {
        let spine = vec![item(
            "a.html",
            vec![
                DomEvent::start_with("a", &[("href", "#top")], None),
                DomEvent::end("a"),
                DomEvent::start_with("p", &[], Some("top")),
                DomEvent::end("p"),
            ],
        )];
        let images = ImageTable::new();
        let out = Serializer::serialize(&spine, &images);
        let s = String::from_utf8(out.text.clone()).unwrap();
        let at = s.find("filepos=").unwrap() + 8;
        let offset: usize = s[at..at + 10].parse().unwrap();
        assert!(s[offset..].starts_with("<p id=\"top\">"));
    }

    #[test]
    fn test_external_href_kept() {
        let spine = vec![item(
            "a.html",
            vec![
                DomEvent::start_with("a", &[("href", "http://example.com/x")], None),
                DomEvent::end("a"),
            ],
        )];
        let images = ImageTable::new();
        let out = Serializer::serialize(&spine, &images);
        let s = String::from_utf8(out.text).unwrap();
        assert!(s.contains("href=\"http://example.com/x\""));
        assert!(!s.contains("filepos"));
    }

    #[test]
    fn test_missing_fragment_falls_back_to_item_start() {
        let spine = vec![item(
            "a.html",
            vec![
                DomEvent::start_with("a", &[("href", "a.html#missing")], None),
                DomEvent::end("a"),
            ],
        )];
        let images = ImageTable::new();
        let out = Serializer::serialize(&spine, &images);
        let s = String::from_utf8(out.text).unwrap();
        // Falls back to the document start offset (12, inside <body>).
        assert!(s.contains("filepos=0000000012"));
    }

    #[test]
    fn test_img_src_becomes_recindex() {
        let mut images = ImageTable::new();
        images.insert("pic.jpg", 1);
        let spine = vec![item(
            "a.html",
            vec![
                DomEvent::start_with("img", &[("src", "pic.jpg")], None),
                DomEvent::end("img"),
            ],
        )];
        let out = Serializer::serialize(&spine, &images);
        let s = String::from_utf8(out.text).unwrap();
        assert!(s.contains("<img recindex=\"00001\" />"));
    }

    #[test]
    fn test_unknown_img_src_emptied() {
        let images = ImageTable::new();
        let spine = vec![item(
            "a.html",
            vec![
                DomEvent::start_with("img", &[("src", "gone.png")], None),
                DomEvent::end("img"),
            ],
        )];
        let out = Serializer::serialize(&spine, &images);
        let s = String::from_utf8(out.text).unwrap();
        assert!(s.contains("<img src=\"\" />"));
    }
}
