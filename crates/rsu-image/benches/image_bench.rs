//! Benchmarks for the image engine
//!
//! Run with: cargo bench --bench image_bench

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rsu_image::prelude::*;
use rsu_image::{POINTER_OFFSET, bit_reversed_crc32, refresh_block_crc};
use std::hint::black_box;

fn sample_image(blocks: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0..blocks * BLOCK_SIZE).map(|i| (i % 253) as u8).collect();
    image.splice(0..4, CMF_MAGIC.to_le_bytes());
    let at = BLOCK_SIZE + POINTER_OFFSET;
    image.splice(at..at + 16, [1, 0, 0, 0, 0, 0, 0, 0, 0, 0x30, 0, 0, 0, 0, 0, 0]);
    image.splice(at + 16..at + 40, [0u8; 24]);
    if let Some(sig) = image.get_mut(BLOCK_SIZE..2 * BLOCK_SIZE) {
        let _crc = refresh_block_crc(sig);
    }
    image
}

fn bench_crc(c: &mut Criterion) {
    let block = vec![0xA5u8; BLOCK_SIZE];
    let mut group = c.benchmark_group("crc");
    group.throughput(Throughput::Bytes(BLOCK_SIZE as u64));
    group.bench_function("bit_reversed_crc32_4k", |b| {
        b.iter(|| bit_reversed_crc32(black_box(&block)));
    });
    group.bench_function("plain_crc32_4k", |b| {
        b.iter(|| crc32fast::hash(black_box(&block)));
    });
    group.finish();
}

fn bench_program(c: &mut Criterion) {
    let image = sample_image(256);
    let bounds = SlotBounds::new(0x0100_0000, 0x0100_0000);
    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("program_1mib", |b| {
        b.iter(|| {
            let mut copy = image.clone();
            program_image(bounds, black_box(&mut copy)).is_ok()
        });
    });

    let mut programmed = image.clone();
    let _state = program_image(bounds, &mut programmed);
    group.bench_function("verify_1mib", |b| {
        b.iter(|| verify_image(bounds, black_box(&image), black_box(&programmed)).is_ok());
    });
    group.finish();
}

criterion_group!(benches, bench_crc, bench_program);
criterion_main!(benches);
