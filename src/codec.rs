//! The pluggable value codec (§1: "out of scope / external collaborators").
//!
//! The engine only ever needs `freeze`/`thaw`; it does not care how they are
//! implemented. We provide a blanket implementation over `bincode` the same
//! way `nexuslite` leans on `bincode::serde::{encode_to_vec, decode_from_slice}`
//! with `bincode::config::standard()` throughout `recovery/wasp/*.rs` — any
//! deterministic encoder with a fast decompressor satisfies the contract, and
//! this is the one the teacher already uses everywhere.

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// A value that can be durably frozen to bytes and later thawed back.
pub trait Codec: Sized {
    /// # Errors
    /// Returns a [`CodecError`] if encoding fails.
    fn freeze(&self) -> Result<Vec<u8>, CodecError>;

    /// # Errors
    /// Returns a [`CodecError`] if the bytes cannot be decoded.
    fn thaw(bytes: &[u8]) -> Result<Self, CodecError>;
}

impl<T> Codec for T
where
    T: Serialize + DeserializeOwned,
{
    fn freeze(&self) -> Result<Vec<u8>, CodecError> {
        encode_to_vec(self, standard()).map_err(|e| CodecError(e.to_string()))
    }

    fn thaw(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_from_slice::<Self, _>(bytes, standard()).map(|(v, _)| v).map_err(|e| CodecError(e.to_string()))
    }
}
