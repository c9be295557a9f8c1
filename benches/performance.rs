// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polyframe_render::classify;
use polyframe_render::job::OutputFormat;
use polyframe_render::output::{self, dxf, mesh};

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for rule in classify::rules() {
        group.bench_with_input(
            BenchmarkId::new("rule", rule.code.as_str()),
            &rule.example,
            |b, raw| b.iter(|| classify::classify(black_box(raw))),
        );
    }

    // Worst case: every pattern is tried before the fallback
    let unmatched = "Something unexpected happened in /tmp/sandbox/work/main.scad, line 40";
    group.bench_function("fallback", |b| {
        b.iter(|| classify::classify(black_box(unmatched)))
    });

    group.finish();
}

/// Closed regular polygons as LWPOLYLINEs
fn polygon_dxf(polylines: usize, sides: usize) -> String {
    let mut pairs = vec![
        dxf::Pair::new(0, "SECTION"),
        dxf::Pair::new(2, "HEADER"),
        dxf::Pair::new(9, "$ACADVER"),
        dxf::Pair::new(1, "AC1009"),
        dxf::Pair::new(0, "ENDSEC"),
        dxf::Pair::new(0, "SECTION"),
        dxf::Pair::new(2, "ENTITIES"),
    ];
    for p in 0..polylines {
        pairs.push(dxf::Pair::new(0, "LWPOLYLINE"));
        pairs.push(dxf::Pair::new(100, "AcDbEntity"));
        pairs.push(dxf::Pair::new(8, "0"));
        pairs.push(dxf::Pair::new(100, "AcDbPolyline"));
        pairs.push(dxf::Pair::new(90, sides.to_string()));
        pairs.push(dxf::Pair::new(70, "1"));
        for i in 0..sides {
            let angle = i as f64 / sides as f64 * std::f64::consts::TAU;
            pairs.push(dxf::Pair::new(10, (p as f64 * 30.0 + 10.0 * angle.cos()).to_string()));
            pairs.push(dxf::Pair::new(20, (10.0 * angle.sin()).to_string()));
        }
    }
    pairs.push(dxf::Pair::new(0, "ENDSEC"));
    pairs.push(dxf::Pair::new(0, "EOF"));
    dxf::write_pairs(&pairs)
}

fn bench_dxf_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("dxf_repair");

    for &(polylines, sides) in &[(1, 4), (10, 64), (100, 256)] {
        let text = polygon_dxf(polylines, sides);
        group.bench_with_input(
            BenchmarkId::new("polylines", format!("{}x{}", polylines, sides)),
            &text,
            |b, text| b.iter(|| dxf::repair(black_box(text)).unwrap()),
        );
    }

    group.finish();
}

fn binary_stl(triangles: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 80];
    bytes.extend_from_slice(&triangles.to_le_bytes());
    bytes.resize(84 + triangles as usize * 50, 0);
    bytes
}

fn bench_mesh_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh_stats");

    let stl = binary_stl(100_000);
    group.bench_function("binary_stl_100k", |b| {
        b.iter(|| mesh::binary_stl_triangles(black_box(&stl)).unwrap())
    });
    group.bench_function("finalize_stl_100k", |b| {
        b.iter(|| output::finalize(OutputFormat::Stl, black_box(stl.clone())).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_classify, bench_dxf_repair, bench_mesh_stats);
criterion_main!(benches);
