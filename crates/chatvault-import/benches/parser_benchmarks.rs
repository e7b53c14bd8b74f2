//! Benchmarks for line format detection and export parsing.
//!
//! Detection walks the candidate list in order, so the last candidate
//! (iOS, 12h with seconds) is the slowest case.

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use chatvault_import::{import_from_reader, ImportOptions, LineFormat};

/// Generate an export with a mix of text, continuation, system and
/// attachment lines.
fn generate_export(lines: usize) -> String {
    let mut out = String::new();
    for i in 0..lines {
        let minute = i % 60;
        let hour = (i / 60) % 24;
        match i % 10 {
            0 => out.push_str(&format!("27.10.23, {:02}:{:02} - Ann joined\n", hour, minute)),
            1 => out.push_str(&format!(
                "27.10.23, {:02}:{:02} - Tom: IMG-2023-{}.jpg (file attached)\n",
                hour, minute, i
            )),
            2 => out.push_str("a continuation line\n"),
            _ => out.push_str(&format!(
                "27.10.23, {:02}:{:02} - User {}: message number {} with some text\n",
                hour,
                minute,
                i % 7,
                i
            )),
        }
    }
    out
}

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_format_detect");
    group.bench_function("first_candidate", |b| {
        b.iter(|| LineFormat::detect(black_box("27.10.23, 22:56 - Tom: Hello")))
    });
    group.bench_function("last_candidate", |b| {
        b.iter(|| LineFormat::detect(black_box("[4/11/24, 9:29:23 pm] Tom: Hello")))
    });
    group.bench_function("no_match", |b| {
        b.iter(|| LineFormat::detect(black_box("just some text without a date")))
    });
    group.finish();
}

fn bench_parse_line(c: &mut Criterion) {
    let format = match LineFormat::detect("27.10.23, 22:56 - Tom: Hello") {
        Some(format) => format,
        None => return,
    };
    let mut group = c.benchmark_group("parse_line");
    group.bench_function("text", |b| {
        b.iter(|| format.parse_line(black_box("27.10.23, 22:56 - Tom: Hello again friend")))
    });
    group.bench_function("attachment", |b| {
        b.iter(|| {
            format.parse_line(black_box(
                "27.10.23, 22:56 - Tom: IMG-20231027-WA0011.jpg (file attached)",
            ))
        })
    });
    group.bench_function("continuation", |b| {
        b.iter(|| format.parse_line(black_box("and this goes on")))
    });
    group.finish();
}

fn bench_import(c: &mut Criterion) {
    let export = generate_export(10_000);
    let options = ImportOptions {
        compute_media_size: false,
        ..ImportOptions::default()
    };
    c.bench_function("import_10k_lines", |b| {
        b.iter(|| import_from_reader(Cursor::new(black_box(export.as_bytes())), &options))
    });
}

criterion_group!(benches, bench_detect, bench_parse_line, bench_import);
criterion_main!(benches);
