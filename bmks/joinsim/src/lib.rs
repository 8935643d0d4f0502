//! A single-node radix hash join over synthetic relations, standing in for the distributed join
//! benchmarks when trying out a sweep on one machine.

pub const TUPLE_BYTES: usize = 8;

/// Partitions of this size fit comfortably in cache.
pub const PARTITION_BYTES: usize = 4 * 32 * 1024;

/// A tiny LCG; good enough to shuffle keys reproducibly.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}

/// The left relation: every key in `0..size` exactly once, shuffled if `random`.
pub fn left_relation(size: usize, random: bool, seed: u64) -> Vec<u64> {
    let mut keys: Vec<u64> = (0..size as u64).collect();
    if random {
        let mut rng = Lcg::new(seed);
        for i in (1..keys.len()).rev() {
            let j = (rng.next() % (i as u64 + 1)) as usize;
            keys.swap(i, j);
        }
    }
    keys
}

/// The right relation: `size` foreign keys into a left relation of `left_size` keys.
pub fn right_relation(size: usize, left_size: usize) -> Vec<u64> {
    (0..size).map(|i| (i % left_size.max(1)) as u64).collect()
}

/// `floor(log2(bytes / PARTITION_BYTES))`, or 0 for small relations.
pub fn radix_bits(tuples: usize) -> u32 {
    let ratio = tuples * TUPLE_BYTES / PARTITION_BYTES;
    if ratio == 0 {
        0
    } else {
        63 - (ratio as u64).leading_zeros()
    }
}

/// Scatter `keys` into `1 << bits` partitions by their low bits.
pub fn partition(keys: &[u64], bits: u32) -> Vec<Vec<u64>> {
    let fanout = 1usize << bits;
    let mask = fanout as u64 - 1;

    let mut histogram = vec![0; fanout];
    for &k in keys {
        histogram[(k & mask) as usize] += 1;
    }

    let mut parts: Vec<Vec<u64>> = histogram.into_iter().map(Vec::with_capacity).collect();
    for &k in keys {
        parts[(k & mask) as usize].push(k);
    }
    parts
}

/// Count the matches between co-partitioned relations with a hash table per partition.
pub fn build_probe(left: &[Vec<u64>], right: &[Vec<u64>]) -> u64 {
    let mut matches = 0;
    for (l, r) in left.iter().zip(right.iter()) {
        let table: std::collections::HashMap<u64, u64> = l.iter().fold(
            std::collections::HashMap::with_capacity(l.len()),
            |mut table, &k| {
                *table.entry(k).or_insert(0) += 1;
                table
            },
        );
        for k in r {
            matches += table.get(k).copied().unwrap_or(0);
        }
    }
    matches
}
