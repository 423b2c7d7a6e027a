//! K-mer frequency histogram (count of counts): how many distinct k-mers
//! share each observed count. Stored in the master index (`spec.md` §4.6.3)
//! and reported by `meryl histogram`.

use std::collections::BTreeMap;

/// K-mer frequency histogram: maps count -> number of distinct k-mers with that count.
///
/// Uses `BTreeMap` for sorted iteration (counts in ascending order).
pub type KmerHistogram = BTreeMap<u64, u64>;

/// Summary statistics for a k-mer histogram.
///
/// These statistics are useful for genome analysis:
/// - `total_kmers`: Total k-mer occurrences (sum of all counts)
/// - `distinct_kmers`: Number of unique k-mers
/// - `mode_count`: The count value that appears most frequently
/// - `mode_frequency`: How many k-mers have the mode count
/// - `mean_count`: Average count per unique k-mer
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramStats {
    /// Total k-mer occurrences (sum of all k-mer counts).
    pub total_kmers: u64,
    /// Number of unique k-mers.
    pub distinct_kmers: u64,
    /// The count value that appears most frequently (mode of the distribution).
    pub mode_count: u64,
    /// Number of k-mers that have the mode count.
    pub mode_frequency: u64,
    /// Average k-mer count (`total_kmers` / `distinct_kmers`).
    pub mean_count: f64,
}

/// Computes summary statistics for a k-mer histogram.
///
/// # Example
///
/// ```rust
/// use meryl::histogram::{histogram_stats, KmerHistogram};
///
/// let mut hist = KmerHistogram::new();
/// hist.insert(1, 2);
/// hist.insert(2, 2);
///
/// let stats = histogram_stats(&hist);
/// assert_eq!(stats.distinct_kmers, 4);
/// assert_eq!(stats.total_kmers, 6); // 1*2 + 2*2
/// ```
#[must_use]
pub fn histogram_stats(histogram: &KmerHistogram) -> HistogramStats {
    let distinct: u64 = histogram.values().sum();
    let total: u64 = histogram.iter().map(|(c, f)| c * f).sum();

    let (mode_count, mode_frequency) = histogram
        .iter()
        .max_by_key(|(_, f)| *f)
        .map_or((0, 0), |(&c, &f)| (c, f));

    HistogramStats {
        total_kmers: total,
        distinct_kmers: distinct,
        mode_count,
        mode_frequency,
        #[allow(clippy::cast_precision_loss)]
        mean_count: if distinct > 0 {
            total as f64 / distinct as f64
        } else {
            0.0
        },
    }
}
