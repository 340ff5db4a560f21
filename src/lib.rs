//! MOBI/PalmDB container codec.
//!
//! Reads and writes the classic Mobipocket (MOBI6) e-book container:
//! PalmDB record framing, PalmDOC LZ77 compression, MOBI and EXTH
//! headers, the trailing-entry text record layout, and filepos anchor
//! rewriting.
//!
//! ```no_run
//! use palmbook::book::{DomEvent, Metadata, PassthroughImageOps, SpineItem};
//! use palmbook::mobi::{read_mobi_bytes, write_mobi, WriteOptions};
//!
//! # fn main() -> palmbook::Result<()> {
//! let spine = vec![SpineItem::new(
//!     "ch1.html",
//!     vec![
//!         DomEvent::start("h1"),
//!         DomEvent::text("Chapter One"),
//!         DomEvent::end("h1"),
//!     ],
//! )];
//! let metadata = Metadata::new("My Book").with_author("Someone");
//! let bytes = write_mobi(
//!     &spine,
//!     &metadata,
//!     &[],
//!     &PassthroughImageOps,
//!     &WriteOptions::default(),
//! )?;
//!
//! let book = read_mobi_bytes(&bytes)?;
//! assert_eq!(book.metadata.title, "My Book");
//! # Ok(())
//! # }
//! ```

pub mod book;
pub mod error;
pub mod mobi;

pub use error::{Error, Result};
