use std::io;
use thiserror::Error;

/// Failure of the update-sequence (fixup) check of a multi-sector structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FixupError {
    #[error("update sequence array lies outside the buffer")]
    OutOfBounds,

    #[error("last 2 bytes of sector {sector} don't match the update sequence end tag")]
    Mismatch { sector: usize },
}

#[derive(Error, Debug)]
pub enum NtfsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid boot sector: {0}")]
    InvalidBootSector(String),

    #[error("Invalid file record ({field}): {reason}")]
    InvalidRecord { field: &'static str, reason: String },

    #[error("Invalid file record: {0}")]
    Fixup(#[from] FixupError),

    #[error("Invalid attribute at record offset {offset:#x}: {reason}")]
    InvalidAttribute { offset: usize, reason: String },

    #[error("Unknown attribute type {0:#x}")]
    UnknownAttributeType(u32),

    #[error("Offset {offset} is beyond the attribute size {size}")]
    OffsetOutOfRange { offset: u64, size: u64 },

    #[error("Reading {clusters} cluster(s) from VCN {vcn} exceeds the data run bounds")]
    ClusterCountOutOfRange { vcn: u64, clusters: u64 },

    #[error("Buffer of {requested} bytes is too small for {clusters} cluster(s)")]
    BufferTooSmall { requested: u64, clusters: u64 },

    #[error("Refusing to allocate {bytes} bytes for an attribute read")]
    AllocationTooLarge { bytes: u64 },

    #[error("Data block is not part of this attribute")]
    ForeignDataBlock,

    #[error("Attribute is resident and has no data runs")]
    NotNonResident,

    #[error("File record {0} not found")]
    RecordNotFound(u64),

    #[error("Short read at stream offset {offset}")]
    ShortRead { offset: u64 },
}

pub type Result<T> = std::result::Result<T, NtfsError>;
