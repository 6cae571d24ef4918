//! Criterion benchmarks for the merge hot paths.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use graft::merge::{FileChange, merge3, parse_patch, render_patch};

fn source(lines: usize, tag: &str, every: usize) -> String {
    (0..lines)
        .map(|k| {
            if every > 0 && k % every == 0 {
                format!("{tag} edit {k}\n")
            } else {
                format!("    let value_{k} = compute({k});\n")
            }
        })
        .collect()
}

fn merge3_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge3");

    for size in [100usize, 1_000, 10_000] {
        let ancestor = source(size, "", 0);
        let current = source(size, "current", 50);
        // Offset so the two sides touch different lines.
        let incoming: String = ancestor
            .lines()
            .enumerate()
            .map(|(k, line)| {
                if k % 50 == 25 {
                    format!("incoming edit {k}\n")
                } else {
                    format!("{line}\n")
                }
            })
            .collect();

        group.throughput(Throughput::Bytes(ancestor.len() as u64));
        group.bench_with_input(BenchmarkId::new("disjoint", size), &size, |b, _| {
            b.iter(|| merge3(black_box(&current), black_box(&ancestor), black_box(&incoming), "bench"))
        });
    }

    group.finish();
}

fn patch_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch");

    let before = source(2_000, "", 0);
    let after = source(2_000, "custom", 40);
    let changes = vec![FileChange {
        path: "src/lib.rs".to_string(),
        before: Some(before.clone()),
        after: Some(after),
    }];

    group.bench_function("render", |b| b.iter(|| render_patch(black_box(&changes))));

    let text = render_patch(&changes);
    group.bench_function("parse_and_apply", |b| {
        b.iter(|| {
            let sections = parse_patch(black_box(&text)).unwrap();
            sections[0].apply_to(Some(&before)).unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, merge3_benchmarks, patch_benchmarks);
criterion_main!(benches);
