//! Error types for palmbook operations.

use thiserror::Error;

/// Errors that can occur while reading or writing a MOBI container.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file too short for PDB header (need 78 bytes, got {0})")]
    ShortHeader(usize),

    #[error("not a MOBI book container (type/creator {0:?})")]
    WrongContainer(String),

    #[error("corrupt PDB record table: {0}")]
    CorruptRecordTable(String),

    #[error("record 0 has no MOBI header magic")]
    NotMobi,

    #[error("unsupported text encoding code {0}")]
    UnsupportedEncoding(u32),

    #[error("unsupported compression type {0}")]
    UnsupportedCompression(u16),

    #[error("\"{title}\" is DRM protected and cannot be read")]
    DrmProtected { title: String },

    #[error("corrupt PalmDOC record: {0}")]
    CorruptPalmDoc(String),

    #[error("book metadata has no title")]
    NoTitle,

    #[error("record data exceeds the 4 GiB container limit")]
    RecordTooLarge,

    #[error("cover image could not be rescaled: {0}")]
    CoverRescale(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
