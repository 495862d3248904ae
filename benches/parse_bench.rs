//! Indexing throughput over synthetic CSV.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use vroomcsv::{AlignedBuffer, Dialect, ParseAlgorithm, ParseOptions, Parser};

fn synthetic_csv(target_len: usize, quoted_share: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(target_len + 64);
    let mut i = 0u32;
    while out.len() < target_len {
        if quoted_share > 0 && i % quoted_share == 0 {
            out.extend_from_slice(
                format!("\"quoted, field {i}\",plain{i},{i},3.25\n").as_bytes(),
            );
        } else {
            out.extend_from_slice(format!("alpha{i},beta{i},{i},0.5\n").as_bytes());
        }
        i += 1;
    }
    out
}

fn bench_algorithms(c: &mut Criterion) {
    let data = synthetic_csv(4 << 20, 16);
    let buffer = AlignedBuffer::from_slice(&data).unwrap();

    let mut group = c.benchmark_group("parse_4mib");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for (name, algorithm) in [
        ("speculative", ParseAlgorithm::Speculative),
        ("branchless", ParseAlgorithm::Branchless),
        ("two_pass", ParseAlgorithm::TwoPass),
    ] {
        group.bench_function(name, |b| {
            let parser = Parser::new(1);
            b.iter(|| {
                let mut options = ParseOptions::with_dialect(Dialect::csv());
                options.algorithm = algorithm;
                let result = parser.parse(black_box(&buffer), options).unwrap();
                black_box(result.total_separators())
            });
        });
    }
    group.finish();
}

fn bench_thread_counts(c: &mut Criterion) {
    let data = synthetic_csv(16 << 20, 0);
    let buffer = AlignedBuffer::from_slice(&data).unwrap();

    let mut group = c.benchmark_group("parse_threads_16mib");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.sample_size(20);

    for threads in [1usize, 2, 4, 8] {
        group.bench_function(format!("threads_{threads}"), |b| {
            let parser = Parser::new(threads);
            b.iter(|| {
                let result = parser
                    .parse(
                        black_box(&buffer),
                        ParseOptions::with_dialect(Dialect::csv()),
                    )
                    .unwrap();
                black_box(result.total_separators())
            });
        });
    }
    group.finish();
}

fn bench_detection(c: &mut Criterion) {
    let data = synthetic_csv(64 << 10, 8);
    c.bench_function("detect_dialect_64kib", |b| {
        b.iter(|| black_box(vroomcsv::detect_dialect(black_box(&data), Default::default())));
    });
}

criterion_group!(benches, bench_algorithms, bench_thread_counts, bench_detection);
criterion_main!(benches);
