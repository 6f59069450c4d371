//! Shared wire primitives: the varint length encoding used to prefix IBLT and Bloom filter
//! byte blobs inside request/response names.
//!
//! `postcard`'s own LEB128 varint is reused here rather than hand-rolling one, matching the
//! crate's existing "postcard for anything that crosses the network" convention.

use crate::error::{NamesyncError, Result};

/// Encodes `n` as a standalone LEB128 varint, suitable for use as its own name component.
pub fn encode_varint(n: u64) -> Vec<u8> {
    postcard::to_allocvec(&n).expect("varint encoding of a u64 cannot fail")
}

/// Decodes a standalone LEB128 varint previously produced by [`encode_varint`].
pub fn decode_varint(bytes: &[u8]) -> Result<u64> {
    postcard::from_bytes(bytes).map_err(NamesyncError::Decode)
}
