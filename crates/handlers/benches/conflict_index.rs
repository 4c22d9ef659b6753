use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use docket_handlers::conflicts::{ExistingFile, IncomingRow, LatestIndex};
use docket_handlers::normalize_drawing_key;

const DISCIPLINES: [&str; 6] = ["ARCH", "struct", "ME", "elec", "CIVIL", "gen"];

fn existing_files(n: usize) -> Vec<ExistingFile> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| ExistingFile {
            drawing_no: format!("{}_{:04}-rev-{}.pdf", DISCIPLINES[i % 6], i / 3, (b'A' + (i % 3) as u8) as char),
            revision: Some(((b'A' + (i % 3) as u8) as char).to_string()),
            uploaded_at: base + Duration::minutes(i as i64),
        })
        .collect()
}

fn incoming_rows(n: usize) -> Vec<IncomingRow> {
    (0..n)
        .map(|i| IncomingRow {
            drawing_no: format!("{} {:04}", DISCIPLINES[i % 6], i),
            revision: Some("B".to_string()),
            date: None,
        })
        .collect()
}

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize_drawing_key", |b| {
        b.iter(|| normalize_drawing_key(black_box("Architectural/0101_R3 (2).dwg")))
    });
}

fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflict_index");

    for size in [1_000usize, 10_000] {
        let files = existing_files(size);
        let rows = incoming_rows(size / 10);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("build", size), &files, |b, files| {
            b.iter(|| LatestIndex::build(black_box(files)))
        });

        let index = LatestIndex::build(&files);
        group.bench_with_input(BenchmarkId::new("check", size), &rows, |b, rows| {
            b.iter(|| index.check(black_box(rows)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_index);
criterion_main!(benches);
