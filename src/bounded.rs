//! Ceilings guarding wire decode against a peer-controlled length claim.
//!
//! A request/response name carries an explicit byte-length component ahead of the IBLT or
//! Bloom-filter payload. Before allocating a buffer of that claimed size, decode paths
//! check it against these ceilings so a malicious length field can't be used to force an
//! oversized allocation.

/// Largest IBLT wire blob this crate will decode: generous relative to any realistic
/// `expectedEntries` configuration (12 bytes/cell; this covers six-figure cell counts).
pub const MAX_IBLT_WIRE_BYTES: usize = 4 * 1024 * 1024;

/// Largest Bloom filter bit-table this crate will decode.
pub const MAX_BLOOM_WIRE_BYTES: usize = 1024 * 1024;

/// Largest single hello-response payload accepted by the consumer, once the transport has
/// reassembled a fragmented reply into the single `Response` the core sees.
pub const MAX_HELLO_FRAGMENT_BYTES: usize = 1024 * 1024;
