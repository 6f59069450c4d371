//! Bloom filter used by partial-sync subscribers to announce interest in a subset of
//! producer prefixes.
//!
//! Parameters are computed from the closed-form optimum rather than searched, matching the
//! reference implementation's `bloom_parameters` (see `original_source/src/bloom-filter.hpp`
//! for the parameter shape this was distilled from).

use crate::error::{NamesyncError, Result};
use crate::hash::h_index;
use crate::wire;

const DEFAULT_MIN_HASHES: u32 = 1;
const DEFAULT_MAX_HASHES: u32 = 32;

#[derive(Clone, Copy, Debug)]
pub struct BloomParams {
    pub projected_count: u64,
    pub false_positive_rate: f64,
}

impl BloomParams {
    /// The sentinel configuration that `partial::consumer` treats as "subscribe to
    /// everything": exactly one projected element at p = 0.001.
    pub fn is_subscribe_all_sentinel(&self) -> bool {
        self.projected_count == 1 && (self.false_positive_rate - 0.001).abs() < f64::EPSILON
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    salts: Vec<u32>,
    projected_count: u64,
    false_positive_millis: u32,
}

impl BloomFilter {
    /// The closed-form optimum `(m_bits, k)` for `(n, p)`. Both the filter builder and the
    /// wire-side reconstructor must call this same function with the same inputs — deriving
    /// `k` from a byte-rounded `m_bits` instead would let the two sides disagree on `k`
    /// whenever the optimum isn't a whole number of bytes, breaking `contains` across peers.
    fn optimal_params(n: u64, p: f64) -> Result<(f64, u32)> {
        if n == 0 || !(0.0..1.0).contains(&p) {
            return Err(NamesyncError::InfeasibleBloomParams { n, p });
        }
        let n_f = n as f64;
        let m_bits = (-n_f * p.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2)).ceil();
        if !m_bits.is_finite() || m_bits <= 0.0 {
            return Err(NamesyncError::InfeasibleBloomParams { n, p });
        }
        let k = ((m_bits / n_f) * std::f64::consts::LN_2).round() as u32;
        let k = k.clamp(DEFAULT_MIN_HASHES, DEFAULT_MAX_HASHES);
        Ok((m_bits, k))
    }

    /// Builds a filter sized for `(n, p)`. Salts are derived deterministically from a
    /// configuration-seeded generator so two peers configured identically produce bit-
    /// identical filters before either inserts anything.
    pub fn new(n: u64, p: f64, salt_seed: u64) -> Result<Self> {
        let (m_bits, k) = Self::optimal_params(n, p)?;
        let table_bytes = ((m_bits as u64 + 7) / 8).max(1) as usize;
        let salts = generate_salts(k, salt_seed);

        Ok(Self {
            bits: vec![0u8; table_bytes],
            salts,
            projected_count: n,
            false_positive_millis: (p * 1000.0).round() as u32,
        })
    }

    pub fn params(&self) -> BloomParams {
        BloomParams {
            projected_count: self.projected_count,
            false_positive_rate: self.false_positive_millis as f64 / 1000.0,
        }
    }

    fn table_bits(&self) -> u64 {
        (self.bits.len() * 8) as u64
    }

    fn bit_positions(&self, data: &[u8]) -> Vec<u64> {
        self.salts
            .iter()
            .map(|&salt| h_index(salt, data) as u64 % self.table_bits())
            .collect()
    }

    pub fn insert(&mut self, data: &[u8]) {
        for pos in self.bit_positions(data) {
            let (byte, bit) = (pos / 8, pos % 8);
            self.bits[byte as usize] |= 1 << bit;
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        self.bit_positions(data).into_iter().all(|pos| {
            let (byte, bit) = (pos / 8, pos % 8);
            self.bits[byte as usize] & (1 << bit) != 0
        })
    }

    /// `<bfLen:varint> <bfBytes>` pair, plus the `(projectedCount, fprMillis)` components
    /// the receiver needs to reconstruct `k`.
    pub fn to_length_prefixed(&self) -> (Vec<u8>, Vec<u8>) {
        (wire::encode_varint(self.bits.len() as u64), self.bits.clone())
    }

    /// Reconstructs a filter from the wire components of a partial-sync request: the
    /// projected count, false-positive-rate-in-millis, and raw bit table. `k` is re-derived
    /// from `(n, p)` exactly as the sender derived it, and `salt_seed` must match the
    /// sender's configured seed for bit positions to agree.
    pub fn from_wire(
        projected_count: u64,
        false_positive_millis: u32,
        bits: Vec<u8>,
        salt_seed: u64,
    ) -> Result<Self> {
        let p = false_positive_millis as f64 / 1000.0;
        if bits.len() > crate::bounded::MAX_BLOOM_WIRE_BYTES {
            return Err(NamesyncError::InfeasibleBloomParams { n: projected_count, p });
        }
        // k must come from the same closed form the sender used, not from the received
        // byte-rounded table size: m_bits is rarely a whole number of bytes, so re-deriving k
        // from bits.len()*8 disagrees with the sender's k and desyncs bit positions.
        let (_, k) = Self::optimal_params(projected_count, p)?;
        let salts = generate_salts(k, salt_seed);
        Ok(Self { bits, salts, projected_count, false_positive_millis })
    }
}

/// Deterministic salt derivation: an xorshift32 stream seeded from `seed`, truncated to `k`
/// values. Any two filters built from the same `(k, seed)` get identical salts.
fn generate_salts(k: u32, seed: u64) -> Vec<u32> {
    let mut state = (seed ^ 0x9e3779b97f4a7c15) as u32 | 1;
    (0..k)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_after_insert() {
        let mut bf = BloomFilter::new(10, 0.01, 7).unwrap();
        bf.insert(b"/test/memphis");
        assert!(bf.contains(b"/test/memphis"));
    }

    #[test]
    fn deterministic_salts_across_identical_params() {
        let a = BloomFilter::new(10, 0.01, 7).unwrap();
        let b = BloomFilter::new(10, 0.01, 7).unwrap();
        assert_eq!(a.salts, b.salts);
        assert_eq!(a.bits, b.bits);
    }

    #[test]
    fn subscribe_all_sentinel() {
        let p = BloomParams { projected_count: 1, false_positive_rate: 0.001 };
        assert!(p.is_subscribe_all_sentinel());
        let p2 = BloomParams { projected_count: 2, false_positive_rate: 0.001 };
        assert!(!p2.is_subscribe_all_sentinel());
    }

    #[test]
    fn wire_roundtrip_preserves_membership() {
        let mut bf = BloomFilter::new(5, 0.01, 42).unwrap();
        bf.insert(b"/x");
        let (_, bytes) = bf.to_length_prefixed();
        let params = bf.params();
        let decoded = BloomFilter::from_wire(
            params.projected_count,
            (params.false_positive_rate * 1000.0).round() as u32,
            bytes,
            42,
        )
        .unwrap();
        assert!(decoded.contains(b"/x"));
    }

    #[test]
    fn infeasible_params_rejected() {
        assert!(BloomFilter::new(0, 0.01, 1).is_err());
        assert!(BloomFilter::new(10, 1.5, 1).is_err());
    }

    /// n=1, p=0.001 gives an optimal m_bits=15, not a multiple of 8: the sender rounds the
    /// table up to 2 bytes (16 bits) but must still derive k from m_bits=15, not 16, or the
    /// two sides disagree on k and `contains` desyncs.
    #[test]
    fn from_wire_matches_new_k_when_m_bits_not_byte_aligned() {
        let mut sender = BloomFilter::new(1, 0.001, 7).unwrap();
        sender.insert(b"/x");
        let (_, bytes) = sender.to_length_prefixed();
        let params = sender.params();
        let receiver = BloomFilter::from_wire(
            params.projected_count,
            (params.false_positive_rate * 1000.0).round() as u32,
            bytes,
            7,
        )
        .unwrap();
        assert_eq!(sender.salts, receiver.salts);
        assert!(receiver.contains(b"/x"));
    }
}
