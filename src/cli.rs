//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::input::Input;

/// A k-mer counting and set-algebra engine for DNA sequence data.
///
/// `meryl count` builds a `<name>.meryl` database from FASTA/FASTQ input;
/// `meryl lookup` answers point queries against a built database; `meryl
/// histogram` prints the count-of-counts distribution stored in a
/// database's master index.
///
/// # Examples
///
/// ```bash
/// # Count 21-mers from a FASTA file into genome.meryl
/// meryl count -k 21 -o genome.meryl genome.fa
///
/// # Count from stdin, gzip-compressed
/// zcat reads.fq.gz | meryl count -k 21 -o reads.meryl -
///
/// # Query a single k-mer's count
/// meryl lookup genome.meryl ACGTACGTACGTACGTACGT
///
/// # Print the histogram
/// meryl histogram genome.meryl
/// ```
#[derive(Parser, Debug)]
#[command(name = "meryl")]
#[command(version, author, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Count k-mers from FASTA/FASTQ input into a `.meryl` database.
    Count(CountArgs),
    /// Look up one or more k-mers' counts in a built database.
    Lookup(LookupArgs),
    /// Print the count-of-counts histogram stored in a database.
    Histogram(HistogramArgs),
}

/// Arguments for `meryl count`.
#[derive(Parser, Debug)]
pub struct CountArgs {
    /// K-mer length (1-64).
    #[arg(short = 'k', long, value_parser = parse_k)]
    pub k: u32,

    /// Input file paths (use '-' or omit for stdin). Gzip-compressed files
    /// (`.gz` extension) are decompressed transparently.
    #[arg(default_value = "-")]
    pub paths: Vec<PathBuf>,

    /// Output database directory (conventionally named `<name>.meryl`).
    #[arg(short, long)]
    pub output: PathBuf,

    /// Memory ceiling, e.g. `4G`, `512M`, or a plain byte count.
    #[arg(short = 'm', long = "memory", value_parser = parse_memory, default_value = "4G")]
    pub memory_bytes: u64,

    /// Worker thread count (at least one worker is always used regardless
    /// of this value).
    #[arg(short = 't', long, default_value_t = default_threads())]
    pub threads: u32,

    /// Expected total k-mer count, to size the counting engine's internal
    /// layout up front. Estimated from input file size when omitted.
    #[arg(short = 'e', long = "expected-kmers")]
    pub expected_kmers: Option<u64>,

    /// Only count k-mers ending in this fixed trailing base sequence.
    /// Forces Simple counting mode and disables reverse-complement
    /// canonicalization for the suffix portion.
    #[arg(long = "count-suffix", value_parser = parse_count_suffix)]
    pub count_suffix: Option<Vec<u8>>,

    /// Suppress informational output (only report final totals).
    #[arg(short, long)]
    pub quiet: bool,
}

impl CountArgs {
    /// Returns the resolved input sources (file or stdin).
    #[must_use]
    pub fn inputs(&self) -> Vec<Input> {
        self.paths.iter().map(|p| Input::from_path(p)).collect()
    }
}

/// Arguments for `meryl lookup`.
#[derive(Parser, Debug)]
pub struct LookupArgs {
    /// Path to a `.meryl` database directory.
    pub db: PathBuf,

    /// K-mer sequence(s) to query (e.g. `ACGTACGTACGTACGTACGT`). Omit and
    /// use `--query-file` to query many k-mers from a file instead.
    pub kmers: Vec<String>,

    /// Read k-mers to query from a file, one per line, instead of (or in
    /// addition to) `kmers`.
    #[arg(long = "query-file")]
    pub query_file: Option<PathBuf>,

    /// Only index k-mers with a count >= this value.
    #[arg(long = "min-value", default_value_t = 1)]
    pub min_value: u64,

    /// Only index k-mers with a count <= this value.
    #[arg(long = "max-value", default_value_t = u64::MAX)]
    pub max_value: u64,

    /// Memory ceiling for building the lookup index, e.g. `1G`.
    #[arg(short = 'm', long = "memory", value_parser = parse_memory, default_value = "1G")]
    pub memory_bytes: u64,
}

/// Arguments for `meryl histogram`.
#[derive(Parser, Debug)]
pub struct HistogramArgs {
    /// Path to a `.meryl` database directory.
    pub db: PathBuf,
}

fn default_threads() -> u32 {
    std::thread::available_parallelism().map_or(4, |n| n.get() as u32)
}

fn parse_k(s: &str) -> Result<u32, String> {
    let k: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if !(1..=64).contains(&k) {
        return Err("k-mer length must be between 1 and 64".to_string());
    }
    Ok(k)
}

fn parse_memory(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1024u64),
        Some('m' | 'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g' | 'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a valid memory size (e.g. '4G', '512M', '1000000')"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("'{s}' overflows a 64-bit byte count"))
}

fn parse_count_suffix(s: &str) -> Result<Vec<u8>, String> {
    let bytes = s.as_bytes().to_vec();
    if bytes.is_empty() {
        return Err("count-suffix must not be empty".to_string());
    }
    if bytes
        .iter()
        .any(|b| crate::kmer::base_to_code(*b).is_none())
    {
        return Err(format!("'{s}' is not a valid ACGT sequence"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_k_accepts_valid_range() {
        assert_eq!(parse_k("1"), Ok(1));
        assert_eq!(parse_k("64"), Ok(64));
        assert!(parse_k("0").is_err());
        assert!(parse_k("65").is_err());
        assert!(parse_k("banana").is_err());
    }

    #[test]
    fn parse_memory_accepts_suffixes() {
        assert_eq!(parse_memory("100"), Ok(100));
        assert_eq!(parse_memory("4K"), Ok(4 * 1024));
        assert_eq!(parse_memory("4M"), Ok(4 * 1024 * 1024));
        assert_eq!(parse_memory("4G"), Ok(4 * 1024 * 1024 * 1024));
        assert!(parse_memory("banana").is_err());
    }

    #[test]
    fn parse_count_suffix_validates_bases() {
        assert_eq!(parse_count_suffix("ACGT"), Ok(b"ACGT".to_vec()));
        assert!(parse_count_suffix("").is_err());
        assert!(parse_count_suffix("ACGN").is_err());
    }

    #[test]
    fn count_args_resolves_stdin_and_file_inputs() {
        let cli = Cli::parse_from(["meryl", "count", "-k", "21", "-o", "out.meryl", "-", "a.fa"]);
        let Command::Count(args) = cli.command else {
            panic!("expected Count subcommand");
        };
        assert_eq!(args.inputs(), vec![Input::Stdin, Input::File("a.fa".into())]);
    }
}
