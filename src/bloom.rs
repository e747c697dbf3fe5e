//! Probabilistic set of unreachable peer IPs.
//!
//! A Bloom filter can answer "definitely not seen" or "probably seen";
//! false positives are possible, false negatives are not. The node uses
//! one to skip handshake attempts against addresses that recently failed,
//! at the cost of occasionally ignoring a healthy candidate. Entries are
//! never removed during a node's lifetime.

use bitvec::prelude::*;
use byteorder::{BigEndian, ByteOrder};
use sha2::{Digest, Sha512};

pub struct BloomFilter {
    bits: BitVec<u8, Lsb0>,
    hashes: usize,
}

impl BloomFilter {
    /// Sizes the filter for `expected_items` insertions at
    /// `false_positive_rate`:
    ///
    /// ```text
    /// m = ceil(-n * ln(p) / ln(2)^2)      bits
    /// k = round(m / n * ln(2))            hash functions
    /// ```
    pub fn new(expected_items: usize, false_positive_rate: f64) -> BloomFilter {
        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = ((-(n * false_positive_rate.ln()) / (ln2 * ln2)).ceil() as usize).max(1);
        let k = (((m as f64 / n) * ln2).round() as usize).max(1);
        BloomFilter {
            bits: bitvec![u8, Lsb0; 0; m],
            hashes: k,
        }
    }

    pub fn insert(&mut self, item: &[u8]) {
        let positions: Vec<usize> = self.positions(item).collect();
        for position in positions {
            self.bits.set(position, true);
        }
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        self.positions(item).all(|position| self.bits[position])
    }

    /// Derives the k bit positions by double hashing two 64-bit values
    /// taken from a single SHA-512 of the item.
    fn positions<'a>(&'a self, item: &[u8]) -> impl Iterator<Item = usize> + 'a {
        let digest = Sha512::digest(item);
        let h1 = BigEndian::read_u64(&digest[..8]);
        let h2 = BigEndian::read_u64(&digest[8..16]);
        let m = self.bits.len() as u64;
        (0..self.hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_items_are_always_found() {
        let mut filter = BloomFilter::new(10_000, 0.01);
        for i in 0u32..1_000 {
            filter.insert(&i.to_be_bytes());
        }
        for i in 0u32..1_000 {
            assert!(filter.contains(&i.to_be_bytes()), "item {i}");
        }
    }

    #[test]
    fn fresh_filter_is_empty() {
        let filter = BloomFilter::new(10_000, 0.01);
        assert!(!filter.contains(b"anything"));
    }

    #[test]
    fn false_positive_rate_stays_near_the_target() {
        let mut filter = BloomFilter::new(10_000, 0.01);
        for i in 0u32..10_000 {
            filter.insert(&i.to_be_bytes());
        }
        let false_positives = (10_000u32..20_000)
            .filter(|i| filter.contains(&i.to_be_bytes()))
            .count();
        // 1% target on 10k probes; allow generous slack.
        assert!(false_positives < 300, "{false_positives} false positives");
    }

    #[test]
    fn holds_raw_peer_ips() {
        let mut filter = BloomFilter::new(10_000, 0.01);
        let ip: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 10, 0, 0, 1];
        filter.insert(&ip);
        assert!(filter.contains(&ip));
        let other: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 10, 0, 0, 2];
        assert!(!filter.contains(&other));
    }
}
