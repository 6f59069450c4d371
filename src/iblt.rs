//! Invertible Bloom Lookup Table: a fixed-size sketch supporting insert/erase and,
//! for small symmetric differences, exact peel-decoding of the differing elements.
//!
//! Grounded in the canonical IBLT (cell count over-provisioned ×1.5, rounded up to a
//! multiple of the hash count) with `N_HASH = 3` regions and a reserved check-hash seed.

use serde::{Deserialize, Serialize};

use crate::error::{NamesyncError, Result};
use crate::hash::{h_check, h_index};
use crate::wire;

/// Number of hash regions an IBLT is partitioned into. Each insert/erase touches exactly
/// one cell per region.
pub const N_HASH: u32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Cell {
    count: i32,
    key_sum: u32,
    key_check: u32,
}

impl Cell {
    fn is_empty(&self) -> bool {
        self.count == 0 && self.key_sum == 0 && self.key_check == 0
    }

    fn is_pure(&self) -> bool {
        (self.count == 1 || self.count == -1) && h_check(&self.key_sum.to_le_bytes()) == self.key_check
    }

    fn toggle(&mut self, token: u32, delta: i32) {
        self.count += delta;
        self.key_sum ^= token;
        self.key_check ^= h_check(&token.to_le_bytes());
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Iblt {
    cells: Vec<Cell>,
}

impl Iblt {
    /// Sizes a table for `expected_entries`: ⌈1.5 × expected_entries⌉, rounded up to the
    /// next multiple of [`N_HASH`]. A zero-entry table still gets `N_HASH` cells so peeling
    /// is always well defined.
    pub fn cell_count_for(expected_entries: usize) -> usize {
        let raw = ((expected_entries * 3) + 1) / 2; // ceil(1.5 * n)
        let n_hash = N_HASH as usize;
        let rounded = ((raw + n_hash - 1) / n_hash) * n_hash;
        rounded.max(n_hash)
    }

    pub fn new(expected_entries: usize) -> Self {
        let n = Self::cell_count_for(expected_entries);
        Self { cells: vec![Cell::default(); n] }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn region_indices(&self, token: u32) -> [usize; N_HASH as usize] {
        let region_size = self.cells.len() / N_HASH as usize;
        let bytes = token.to_le_bytes();
        let mut idx = [0usize; N_HASH as usize];
        for (i, slot) in idx.iter_mut().enumerate() {
            let within = h_index(i as u32, &bytes) as usize % region_size;
            *slot = i * region_size + within;
        }
        idx
    }

    fn apply(&mut self, token: u32, delta: i32) {
        for idx in self.region_indices(token) {
            self.cells[idx].toggle(token, delta);
        }
    }

    pub fn insert(&mut self, token: u32) {
        self.apply(token, 1);
    }

    pub fn erase(&mut self, token: u32) {
        self.apply(token, -1);
    }

    /// Cell-wise `self - other`. Both tables must have the same cell count.
    pub fn difference(&self, other: &Iblt) -> Result<Iblt> {
        if self.cells.len() != other.cells.len() {
            return Err(NamesyncError::IbltSizeMismatch {
                expected: self.cells.len(),
                got: other.cells.len(),
            });
        }
        let cells = self
            .cells
            .iter()
            .zip(other.cells.iter())
            .map(|(a, b)| Cell {
                count: a.count - b.count,
                key_sum: a.key_sum ^ b.key_sum,
                key_check: a.key_check ^ b.key_check,
            })
            .collect();
        Ok(Iblt { cells })
    }

    /// Peels this table (consuming it) to exhaustion. Returns the positive tokens (present
    /// in `self` but not in the table it was diffed against, i.e. `count == +1` cells) and
    /// the negative tokens (`count == -1`), plus whether every cell reached empty — `false`
    /// means the difference exceeded what this table's capacity can decode.
    pub fn peel(mut self) -> (Vec<u32>, Vec<u32>, bool) {
        let mut positive = Vec::new();
        let mut negative = Vec::new();

        loop {
            let pure_idx = self.cells.iter().position(Cell::is_pure);
            let Some(i) = pure_idx else { break };
            let cell = self.cells[i];
            if cell.count == 1 {
                positive.push(cell.key_sum);
            } else {
                negative.push(cell.key_sum);
            }
            // Inverse of the insert/erase that produced this cell: a +1 cell behaves as if
            // `token` was inserted, so we erase it everywhere it was placed (and vice versa).
            let token = cell.key_sum;
            let delta = -cell.count;
            self.apply(token, delta);
        }

        let exhausted = self.cells.iter().all(Cell::is_empty);
        (positive, negative, exhausted)
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cells.len() * 12);
        for c in &self.cells {
            out.extend_from_slice(&c.count.to_le_bytes());
            out.extend_from_slice(&c.key_sum.to_le_bytes());
            out.extend_from_slice(&c.key_check.to_le_bytes());
        }
        out
    }

    /// Decodes a wire-format IBLT with an explicit expected cell count (the receiver always
    /// knows this from the protocol's `expectedEntries` configuration, not from the bytes).
    pub fn from_wire(bytes: &[u8], cell_count: usize) -> Result<Self> {
        if bytes.len() > crate::bounded::MAX_IBLT_WIRE_BYTES {
            return Err(NamesyncError::IbltSizeMismatch {
                expected: crate::bounded::MAX_IBLT_WIRE_BYTES,
                got: bytes.len(),
            });
        }
        if bytes.len() != cell_count * 12 {
            return Err(NamesyncError::IbltSizeMismatch {
                expected: cell_count * 12,
                got: bytes.len(),
            });
        }
        let mut cells = Vec::with_capacity(cell_count);
        for chunk in bytes.chunks_exact(12) {
            let count = i32::from_le_bytes(chunk[0..4].try_into().unwrap());
            let key_sum = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
            let key_check = u32::from_le_bytes(chunk[8..12].try_into().unwrap());
            cells.push(Cell { count, key_sum, key_check });
        }
        Ok(Iblt { cells })
    }

    /// Byte-length-prefixed encoding: `<len:varint> <bytes>`, the form carried as two
    /// adjacent name components.
    pub fn to_length_prefixed(&self) -> (Vec<u8>, Vec<u8>) {
        let bytes = self.to_wire();
        (wire::encode_varint(bytes.len() as u64), bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::token;

    #[test]
    fn equal_under_identical_insert() {
        let t = token("/test/memphis", 1);
        let mut a = Iblt::new(10);
        let mut b = Iblt::new(10);
        a.insert(t);
        b.insert(t);
        assert_eq!(a, b);
        assert_eq!(a.to_wire(), b.to_wire());
    }

    #[test]
    fn peel_one_sided_difference() {
        let t = token("/test/memphis", 1);
        let mut a = Iblt::new(10);
        a.insert(t);
        let b = Iblt::new(10);
        let diff = a.difference(&b).unwrap();
        let (pos, neg, ok) = diff.peel();
        assert!(ok);
        assert_eq!(pos, vec![t]);
        assert!(neg.is_empty());
    }

    #[test]
    fn peel_two_sided_difference() {
        let t1 = token("/test/memphis", 1);
        let t2 = token("/test/csu", 1);
        let mut a = Iblt::new(10);
        a.insert(t1);
        let mut b = Iblt::new(10);
        b.insert(t2);
        let diff = a.difference(&b).unwrap();
        let (pos, neg, ok) = diff.peel();
        assert!(ok);
        assert_eq!(pos, vec![t1]);
        assert_eq!(neg, vec![t2]);
    }

    #[test]
    fn copy_diverge_reconverge() {
        let x = token("/test/memphis", 1);
        let y = token("/test/memphis", 2);
        let z = token("/test/csu", 1);

        let mut a = Iblt::new(10);
        a.insert(x);
        let mut b = a.clone();

        a.erase(x);
        a.insert(y);

        b.erase(x);
        b.insert(z);
        b.erase(z);
        b.insert(y);

        assert_eq!(a, b);
    }

    #[test]
    fn insert_order_independent() {
        let t1 = token("/test/memphis", 1);
        let t2 = token("/test/csu", 1);
        let mut a = Iblt::new(10);
        a.insert(t1);
        a.insert(t2);
        let mut b = Iblt::new(10);
        b.insert(t2);
        b.insert(t1);
        assert_eq!(a, b);
    }

    #[test]
    fn wire_roundtrip() {
        let mut a = Iblt::new(10);
        a.insert(token("/test/memphis", 1));
        let wire = a.to_wire();
        let decoded = Iblt::from_wire(&wire, a.cell_count()).unwrap();
        assert_eq!(a, decoded);
    }

    #[test]
    fn cell_count_rounds_to_multiple_of_three() {
        assert_eq!(Iblt::cell_count_for(0) % 3, 0);
        assert_eq!(Iblt::cell_count_for(10) % 3, 0);
        assert!(Iblt::cell_count_for(10) >= 15);
    }
}
