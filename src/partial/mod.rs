//! Partial-sync engine: subscribers learn only prefixes matching a Bloom filter they
//! announce, discovered via a separate hello handshake.

pub mod consumer;
pub mod producer;

pub use consumer::PartialSyncConsumer;
pub use producer::PartialSyncProducer;

/// Maximum bytes per fragment of a hello response. Conservative relative to a typical
/// content-centric network's packet-size ceiling.
pub const MAX_SEGMENT_SIZE: usize = 4096;
