//! Simple counting mode (`spec.md` §4.5): a dense array of `4^k` counters
//! with overflow into a hash map, used when the whole frequency table fits
//! in memory. Grounded in the inherited `run.rs`/`streaming.rs` DashMap +
//! `FxHasher` counting idiom, specialized here to a dense array for the
//! common small-`k` case.
//!
//! A fixed **count-suffix** (`spec.md` §9, §1 GLOSSARY "Count-suffix")
//! narrows this further: only k-mers whose trailing bases match the fixed
//! suffix are counted, the dense array shrinks to `4^(k - suffixLen)`, and
//! the suffix portion is never reverse-complement canonicalized — only the
//! forward orientation of each k-mer is tested against the fixed suffix.

use std::hash::BuildHasherDefault;

use dashmap::DashMap;
use rustc_hash::FxHasher;

use crate::iterator::KmerIterator;
use crate::kmer::{self, KmerBits, KmerSize};

type FxDashMap = DashMap<KmerBits, u64, BuildHasherDefault<FxHasher>>;

fn suffix_mask(bits: u32) -> KmerBits {
    if bits >= 128 {
        KmerBits::MAX
    } else {
        (1 as KmerBits << bits) - 1
    }
}

/// A count of `4^(k - suffixLen)` dense low-bit counters (`u32`, saturating
/// into the overflow map) plus a `DashMap` for k-mers whose count exceeds
/// `u32::MAX` or whose packed value falls outside the dense array's range
/// (used when `k` is large enough that the dense domain does not fit — see
/// [`SimpleCounter::dense_capacity_bytes`]).
///
/// Dense-array keys are the k-mer's non-suffix high-order bits: the full
/// forward k-mer with no count-suffix configured, or the part of it above
/// the fixed suffix's bits when one is.
pub struct SimpleCounter {
    k: KmerSize,
    dense: Vec<u32>,
    overflow: FxDashMap,
    /// `(suffix_value, suffix_bits)` when a fixed count-suffix is configured.
    count_suffix: Option<(KmerBits, u32)>,
}

impl SimpleCounter {
    /// Memory required for the dense array alone, used by the engine to
    /// decide whether Simple mode is affordable. `suffix_len` is the number
    /// of fixed trailing bases (0 when no count-suffix is configured).
    /// Saturates to `u64::MAX` once the array's bit width overflows `u64`
    /// (`k.bits() - 2*suffix_len >= 64`), so
    /// [`decide_mode`](crate::engine::decide_mode) always falls back to
    /// Complex mode for such `k` rather than wrapping into a falsely-small
    /// figure.
    #[must_use]
    pub fn dense_capacity_bytes(k: KmerSize, suffix_len: u32) -> u64 {
        let array_bits = k.bits().saturating_sub(2 * suffix_len);
        1u64.checked_shl(array_bits)
            .and_then(|n| n.checked_mul(4))
            .unwrap_or(u64::MAX)
    }

    /// Allocates the dense array unconditionally. Callers must first check
    /// [`Self::dense_capacity_bytes`] against the memory ceiling — this type
    /// does not itself refuse to allocate an oversized table.
    ///
    /// `count_suffix`, when given, must already be validated as a non-empty
    /// ACGT sequence no longer than `k` bases (the CLI's `parse_count_suffix`
    /// does this).
    ///
    /// # Panics
    /// Panics if the dense array's bit width does not fit a `usize`, or if
    /// `count_suffix` contains a non-ACGT byte. Callers are expected to have
    /// already rejected such inputs via [`Self::dense_capacity_bytes`] and
    /// the CLI's validating parser, respectively.
    #[must_use]
    pub fn new(k: KmerSize, count_suffix: Option<&[u8]>) -> Self {
        let count_suffix = count_suffix.map(|s| {
            let bits = kmer::pack(s).expect("count-suffix must already be a validated ACGT sequence");
            (bits, 2 * s.len() as u32)
        });
        let array_bits = k.bits().saturating_sub(count_suffix.map_or(0, |(_, bits)| bits));
        let len = 1usize
            .checked_shl(array_bits)
            .expect("dense_capacity_bytes should have routed this k away from Simple mode");
        Self {
            k,
            dense: vec![0u32; len],
            overflow: DashMap::default(),
            count_suffix,
        }
    }

    /// Increments the counter at dense-array key `key` (already shifted past
    /// any fixed count-suffix bits).
    fn record(&mut self, key: KmerBits) {
        let idx = key as usize;
        if let Some(slot) = self.dense.get_mut(idx) {
            if *slot == u32::MAX {
                *self.overflow.entry(key).or_insert(0) += 1;
            } else {
                *slot += 1;
            }
        } else {
            *self.overflow.entry(key).or_insert(0) += 1;
        }
    }

    /// Counts every k-mer in `bases` (one sequence, already breaker-free or
    /// breaker-containing — breakers simply reset the window). With no
    /// count-suffix configured, the canonical form of every k-mer is
    /// counted; with one configured, only the forward-orientation k-mers
    /// whose trailing bases match it are counted, unmirrored.
    pub fn count_sequence(&mut self, bases: &[u8]) {
        let mut it = KmerIterator::new(self.k);
        it.add_sequence(bases);
        while it.next_mer() {
            match self.count_suffix {
                Some((suffix_value, suffix_bits)) => {
                    let fmer = it.fmer();
                    if fmer & suffix_mask(suffix_bits) == suffix_value {
                        self.record(fmer >> suffix_bits);
                    }
                }
                None => self.record(it.canonical_mer()),
            }
        }
    }

    /// Final `(kmer, count)` pairs, dense array entries first. Keys are
    /// reconstructed to full k-mer bits: the dense/overflow key unchanged
    /// when no count-suffix is configured, or `(key << suffixBits) |
    /// suffixValue` otherwise.
    #[must_use]
    pub fn into_counts(self) -> Vec<(KmerBits, u64)> {
        let reconstruct = |key: KmerBits| -> KmerBits {
            match self.count_suffix {
                Some((suffix_value, suffix_bits)) => (key << suffix_bits) | suffix_value,
                None => key,
            }
        };
        let mut out: Vec<(KmerBits, u64)> = self
            .dense
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .map(|(i, &c)| (reconstruct(i as KmerBits), u64::from(c)))
            .collect();
        for entry in &self.overflow {
            let (&key, &extra) = (entry.key(), entry.value());
            let kmer = reconstruct(key);
            if let Some(pos) = out.iter().position(|(k, _)| *k == kmer) {
                out[pos].1 += extra;
            } else {
                out.push((kmer, extra));
            }
        }
        out
    }
}
