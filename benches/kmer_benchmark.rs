#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meryl::count::EngineConfig;
use meryl::engine::count_to_database;
use meryl::input::Input;
use meryl::iterator::KmerIterator;
use meryl::kmer::{self, KmerSize};
use tempfile::NamedTempFile;

fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("kmer::pack");

    for k in [5, 11, 21, 31] {
        let seq = "ACGT".repeat(k / 4 + 1);
        let bases = seq.as_bytes()[..k].to_vec();

        group.bench_with_input(BenchmarkId::from_parameter(k), &bases, |b, bases| {
            b.iter(|| kmer::pack(black_box(bases)));
        });
    }

    group.finish();
}

fn bench_reverse_complement(c: &mut Criterion) {
    let mut group = c.benchmark_group("kmer::reverse_complement");

    for k in [5, 11, 21, 31, 64] {
        let ksize = KmerSize::new(k as u32).unwrap();
        let seq = "ACGT".repeat(k / 4 + 1);
        let bits = kmer::pack(&seq.as_bytes()[..k]).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(k), &bits, |b, &bits| {
            b.iter(|| kmer::reverse_complement(black_box(bits), ksize));
        });
    }

    group.finish();
}

fn bench_canonical(c: &mut Criterion) {
    let mut group = c.benchmark_group("kmer::canonical");

    for k in [5, 11, 21, 31, 64] {
        let ksize = KmerSize::new(k as u32).unwrap();
        let seq = "ACGT".repeat(k / 4 + 1);
        let bits = kmer::pack(&seq.as_bytes()[..k]).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(k), &bits, |b, &bits| {
            b.iter(|| kmer::canonical(black_box(bits), ksize));
        });
    }

    group.finish();
}

fn bench_unpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("kmer::unpack");

    for k in [5, 11, 21, 31, 64] {
        let ksize = KmerSize::new(k as u32).unwrap();
        let seq = "ACGT".repeat(k / 4 + 1);
        let bits = kmer::pack(&seq.as_bytes()[..k]).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(k), &bits, |b, &bits| {
            b.iter(|| kmer::unpack(black_box(bits), ksize));
        });
    }

    group.finish();
}

fn bench_kmer_iterator(c: &mut Criterion) {
    let mut group = c.benchmark_group("KmerIterator::next_mer");

    for k in [5, 11, 21, 31] {
        let ksize = KmerSize::new(k as u32).unwrap();
        let bases = "ACGTACGTACGTACGTACGTACGTACGTACGT".repeat(100).into_bytes();

        group.bench_with_input(BenchmarkId::from_parameter(k), &bases, |b, bases| {
            b.iter(|| {
                let mut it = KmerIterator::new(ksize);
                it.add_sequence(black_box(bases));
                let mut n = 0u64;
                while it.next_mer() {
                    n = n.wrapping_add(it.canonical_mer() as u64);
                }
                black_box(n)
            });
        });
    }

    group.finish();
}

fn write_fasta(n_records: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for i in 0..n_records {
        writeln!(file, ">seq{i}").unwrap();
        writeln!(file, "{}", "ACGTACGTACGTACGTACGTACGTACGTACGT".repeat(10)).unwrap();
    }
    file.flush().unwrap();
    file
}

fn bench_count_to_database(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_to_database");
    let file = write_fasta(100);

    for k in [5, 11, 21] {
        let cfg = EngineConfig {
            k: KmerSize::new(k).unwrap(),
            memory_bytes: 256 * 1024 * 1024,
            threads: 4,
            expected_kmers: None,
            count_suffix: None,
        };

        group.bench_with_input(BenchmarkId::from_parameter(k), &cfg, |b, cfg| {
            b.iter(|| {
                let out_dir = tempfile::tempdir().unwrap();
                count_to_database(
                    black_box(cfg),
                    &[Input::File(file.path().to_path_buf())],
                    &out_dir.path().join("bench.meryl"),
                )
                .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_pack,
    bench_reverse_complement,
    bench_canonical,
    bench_unpack,
    bench_kmer_iterator,
    bench_count_to_database,
);

criterion_main!(benches);
