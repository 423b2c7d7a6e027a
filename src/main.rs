#![allow(clippy::too_many_lines, clippy::needless_pass_by_value)]

use std::process;

use clap::Parser;
use colored::Colorize;
use meryl::cli::{Cli, Command, CountArgs, HistogramArgs, LookupArgs};
use meryl::count::EngineConfig;
use meryl::engine::{self, CountMode};
use meryl::error::MerylError;
use meryl::histogram::histogram_stats;
use meryl::kmer::{self, KmerSize};
use meryl::lookup::{self, LookupIndex};
use meryl::master_index::MasterIndex;

/// Initializes the tracing subscriber with environment filter.
///
/// Set `RUST_LOG=meryl=debug` to see debug output.
#[cfg(feature = "tracing")]
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn main() {
    #[cfg(feature = "tracing")]
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Count(args) => run_count(args),
        Command::Lookup(args) => run_lookup(args),
        Command::Histogram(args) => run_histogram(args),
    };

    if let Err(e) = result {
        eprintln!("{}\n {}", "Application error:".red().bold(), e.to_string().red());
        process::exit(1);
    }
}

fn run_count(args: CountArgs) -> Result<(), MerylError> {
    let k = KmerSize::new(args.k)?;
    let cfg = EngineConfig {
        k,
        memory_bytes: args.memory_bytes,
        threads: args.threads,
        expected_kmers: args.expected_kmers,
        count_suffix: args.count_suffix.clone(),
    };
    let inputs = args.inputs();

    if !args.quiet {
        eprintln!("{}: {}", "k-length".bold(), args.k.to_string().blue().bold());
        eprintln!(
            "{}: {}",
            "inputs".bold(),
            inputs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
                .underline()
                .blue()
                .bold()
        );
        eprintln!("{}: {}", "memory".bold(), args.memory_bytes.to_string().blue().bold());
        eprintln!("{}: {}", "threads".bold(), args.threads.to_string().blue().bold());
        if let Some(suffix) = &args.count_suffix {
            eprintln!(
                "{}: {}",
                "count-suffix".bold(),
                String::from_utf8_lossy(suffix).blue().bold()
            );
        }
        eprintln!("{}: {}", "output".bold(), args.output.display().to_string().blue().bold());
        eprintln!();
    }

    let outcome = engine::count_to_database(&cfg, &inputs, &args.output)?;

    if !args.quiet {
        let mode = match outcome.mode {
            CountMode::Simple => "simple",
            CountMode::Complex => "complex",
        };
        eprintln!(
            "{}: {} ({} distinct, {} total k-mers)",
            "done".green().bold(),
            mode.blue().bold(),
            outcome.distinct_kmers.to_string().blue().bold(),
            outcome.total_kmers.to_string().blue().bold()
        );
        eprintln!(
            "{}: {} sequences, {} bases",
            "progress".bold(),
            outcome.progress.sequences_processed.to_string().blue().bold(),
            outcome.progress.bases_processed.to_string().blue().bold()
        );
    }

    Ok(())
}

fn load_master(db: &std::path::Path) -> Result<(MasterIndex, KmerSize), MerylError> {
    use meryl::bits::StuffedBits;

    let path = db.join("merylIndex");
    let bytes = std::fs::read(&path).map_err(|source| MerylError::DatabaseRead {
        source,
        path: path.clone(),
    })?;
    let master = MasterIndex::read(StuffedBits::load_from_buffer(&bytes))?;
    let k_bits = master.prefix_size + master.suffix_size;
    let k = KmerSize::new(k_bits / 2)?;
    Ok((master, k))
}

fn run_lookup(args: LookupArgs) -> Result<(), MerylError> {
    let (master, k) = load_master(&args.db)?;
    let plan = lookup::configure(k, &master, args.min_value, args.max_value, args.memory_bytes)?;
    let index = LookupIndex::build(&args.db, k, &master, plan, args.min_value, args.max_value)?;

    let mut queries = args.kmers;
    if let Some(query_file) = &args.query_file {
        let contents = std::fs::read_to_string(query_file).map_err(|source| MerylError::SequenceRead {
            source,
            path: query_file.clone(),
        })?;
        queries.extend(contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from));
    }

    for query in queries {
        let Ok(packed) = kmer::pack(query.to_ascii_uppercase().as_bytes()) else {
            println!("{query}\tinvalid");
            continue;
        };
        if query.len() as u8 != k.get() {
            println!("{query}\tinvalid");
            continue;
        }
        let canonical = kmer::canonical(packed, k);
        println!("{query}\t{}", index.value(canonical));
    }

    Ok(())
}

fn run_histogram(args: HistogramArgs) -> Result<(), MerylError> {
    let (master, _k) = load_master(&args.db)?;

    let stats = histogram_stats(&master.histogram);
    println!(
        "# distinct-kmers {}  total-kmers {}  mode {}x{}  mean {:.3}",
        stats.distinct_kmers, stats.total_kmers, stats.mode_count, stats.mode_frequency, stats.mean_count
    );
    for (count, frequency) in &master.histogram {
        println!("{count}\t{frequency}");
    }

    Ok(())
}
