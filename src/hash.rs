//! Keyed 32-bit hash primitive shared by the IBLT and the Bloom filter.
//!
//! Murmur3-x86-32, seeded. `H_INDEX` places elements in IBLT cells / Bloom bits under a
//! per-round seed; `H_CHECK` (fixed seed [`CHECK_SEED`]) derives both IBLT cell check-sums
//! and the 32-bit token identifying a published "prefix/seq" version. Wire compatibility
//! between independent implementations of this protocol depends on using exactly this
//! function under exactly these seeds.

/// Reserved seed for check-hashes and token derivation. Must never collide with an index
/// seed (index seeds are small integers 0..k, this is chosen well outside that range by the
/// reference implementation).
pub const CHECK_SEED: u32 = 11;

/// Murmur3-x86-32 over `data` under `seed`. Public-domain reference algorithm.
pub fn murmur3_x86_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h1 = seed;
    let nblocks = data.len() / 4;

    for i in 0..nblocks {
        let block = &data[i * 4..i * 4 + 4];
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = &data[nblocks * 4..];
    let mut k1: u32 = 0;
    if tail.len() >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1
}

/// Per-cell/per-bit placement hash under round index `i`.
pub fn h_index(i: u32, data: &[u8]) -> u32 {
    murmur3_x86_32(data, i)
}

/// Check-hash under the reserved seed, used for IBLT cell checksums and token derivation.
pub fn h_check(data: &[u8]) -> u32 {
    murmur3_x86_32(data, CHECK_SEED)
}

/// The canonical "prefix/seq" string a published version hashes to its token from.
pub fn token_string(prefix: &str, seq: u32) -> String {
    format!("{prefix}/{seq}")
}

/// Derives the 32-bit token for a (prefix, seq) pair.
pub fn token(prefix: &str, seq: u32) -> u32 {
    h_check(token_string(prefix, seq).as_bytes())
}
