//! MOBI container format: PalmDB framing, PalmDOC compression, MOBI/EXTH
//! headers, text record trailers, and the read/write book assemblers.

pub mod filepos;
pub mod headers;
pub mod palmdoc;
pub mod pdb;
pub mod reader;
pub mod records;
pub mod serializer;
pub mod writer;

pub use headers::{Compression, TextEncoding};
pub use reader::{Extraction, MobiBook, read_mobi_bytes};
pub use writer::{Profile, WriteOptions, write_mobi, write_mobi_to};
