//! External collaborator interfaces consumed by the MOBI engine.
//!
//! The container codec does not own a document model. Callers hand it a
//! [`Metadata`] struct, a spine of [`SpineItem`]s exposing a flat DOM event
//! stream, and an [`ImageOps`] implementation for rescaling raster images.

use std::io;

/// Book metadata (Dublin Core + extensions)
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    pub identifier: String,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub date: Option<String>,
    pub rights: Option<String>,
    pub isbn: Option<String>,
    /// Raw cover image bytes, if the book has a cover.
    pub cover: Option<Vec<u8>>,
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_cover(mut self, data: Vec<u8>) -> Self {
        self.cover = Some(data);
        self
    }
}

/// One event in a document-order walk of an element tree.
///
/// The serializer consumes these rather than a DOM: `Start` opens an
/// element (attributes in document order, `id` pulled out for anchor
/// tracking), `Text` is character data inside the element, `Tail` is
/// character data following the element's end tag.
#[derive(Debug, Clone, PartialEq)]
pub enum DomEvent {
    Start {
        tag: String,
        attrs: Vec<(String, String)>,
        id: Option<String>,
    },
    Text(String),
    End(String),
    Tail(String),
}

impl DomEvent {
    pub fn start(tag: &str) -> Self {
        DomEvent::Start {
            tag: tag.to_string(),
            attrs: Vec::new(),
            id: None,
        }
    }

    pub fn start_with(tag: &str, attrs: &[(&str, &str)], id: Option<&str>) -> Self {
        DomEvent::Start {
            tag: tag.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            id: id.map(str::to_string),
        }
    }

    pub fn text(s: &str) -> Self {
        DomEvent::Text(s.to_string())
    }

    pub fn end(tag: &str) -> Self {
        DomEvent::End(tag.to_string())
    }
}

/// An item in the reading order: a document href plus its body as a flat
/// event stream.
#[derive(Debug, Clone)]
pub struct SpineItem {
    pub href: String,
    pub events: Vec<DomEvent>,
}

impl SpineItem {
    pub fn new(href: impl Into<String>, events: Vec<DomEvent>) -> Self {
        Self {
            href: href.into(),
            events,
        }
    }
}

/// A raster image from the book manifest.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub href: String,
    pub data: Vec<u8>,
}

impl ImageItem {
    pub fn new(href: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            href: href.into(),
            data,
        }
    }
}

/// Image rescaling collaborator.
///
/// Implementations must preserve GIF as GIF and may convert other formats
/// to JPEG. Errors mean the input was unreadable.
pub trait ImageOps {
    fn rescale(
        &self,
        data: &[u8],
        max_bytes: usize,
        max_dims: Option<(u32, u32)>,
    ) -> io::Result<Vec<u8>>;
}

/// No-op rescaler for hosts without an image encoder.
///
/// Returns the input unchanged when it fits the byte budget and fails
/// otherwise, so oversized images are dropped rather than emitted.
pub struct PassthroughImageOps;

impl ImageOps for PassthroughImageOps {
    fn rescale(
        &self,
        data: &[u8],
        max_bytes: usize,
        _max_dims: Option<(u32, u32)>,
    ) -> io::Result<Vec<u8>> {
        if data.len() <= max_bytes {
            Ok(data.to_vec())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image is {} bytes, budget is {}", data.len(), max_bytes),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let meta = Metadata::new("A Book")
            .with_author("Someone")
            .with_language("en");
        assert_eq!(meta.title, "A Book");
        assert_eq!(meta.authors, vec!["Someone"]);
        assert_eq!(meta.language, "en");
    }

    #[test]
    fn test_passthrough_rescale_respects_budget() {
        let ops = PassthroughImageOps;
        assert!(ops.rescale(&[0u8; 100], 200, None).is_ok());
        assert!(ops.rescale(&[0u8; 300], 200, None).is_err());
    }
}
