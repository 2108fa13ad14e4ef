//! MurmurHash3 (x86, 32-bit) over UTF-16 code units and the derived bucket.
//!
//! Every client must place a visitor in the same bucket, so the byte feeding
//! is fixed: only the low byte of each UTF-16 code unit is hashed, four units
//! per block, packed little-endian, and the length mixed in at the end is the
//! number of code units.

pub const TOTAL_BUCKETS: u32 = 10_000;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

#[inline]
fn mix_k1(k1: u32) -> u32 {
    k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

pub fn murmurhash3_32_gc(key: &str, seed: u32) -> u32 {
    let units: Vec<u32> = key.encode_utf16().map(|unit| u32::from(unit & 0xff)).collect();
    let mut h1 = seed;

    let mut blocks = units.chunks_exact(4);
    for block in &mut blocks {
        let k1 = block[0] | (block[1] << 8) | (block[2] << 16) | (block[3] << 24);
        h1 ^= mix_k1(k1);
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k1 = tail
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, byte)| acc ^ (byte << (8 * i)));
        h1 ^= mix_k1(k1);
    }

    h1 ^= units.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

/// Stable position in `[0, 1)` with a resolution of 1/10000.
pub fn get_bucket(salted_id: &str) -> f64 {
    let hash = murmurhash3_32_gc(salted_id, 0);
    f64::from(hash % TOTAL_BUCKETS) / f64::from(TOTAL_BUCKETS)
}
