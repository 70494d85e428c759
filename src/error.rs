//! Engine-wide error type.
//!
//! Mirrors the shape of `nexuslite`'s `DbError`: one `thiserror` variant per
//! failure class named in the design, with `#[from]` conversions at the I/O
//! and codec boundaries so call sites can use `?` freely.

use thiserror::Error;

/// Failure raised by the pluggable value codec's `freeze`/`thaw` pair.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid database: {reason}")]
    InvalidDatabase { reason: String },

    #[error("incompatible database version: found {found}, expected {expected}")]
    IncompatibleVersion { found: u32, expected: u32 },

    #[error("order mismatch: on-disk order {found}, compiled order {expected}")]
    OrderMismatch { found: u32, expected: u32 },

    #[error("corrupt state: {detail}")]
    CorruptState { detail: String },

    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no encoder registered for type {type_name}")]
    NoMatchingEncoder { type_name: &'static str },

    #[error("no decoder registered for key type byte 0x{type_byte:02x}")]
    NoMatchingDecoder { type_byte: u8 },

    #[error("database not found at {path}")]
    DatabaseNotFound { path: String },
}

pub type Result<T> = std::result::Result<T, Error>;
