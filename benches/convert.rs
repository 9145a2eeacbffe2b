use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frame_capture::capture::{FrameLayout, PixelFormat};
use frame_capture::sampler::convert_frame;

fn bench_convert(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert_frame");

    for (width, height) in [(320u32, 240u32), (640, 480), (1920, 1080)] {
        // Typical camera stride: rows padded to 64 bytes.
        let row = width as usize * 4;
        let layout = FrameLayout::packed(width, height, PixelFormat::Bgra8)
            .with_row_padding((64 - row % 64) % 64);
        let bytes = vec![0x7Fu8; layout.byte_len()];

        group.throughput(Throughput::Bytes((row * height as usize) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &bytes,
            |b, bytes| b.iter(|| convert_frame(black_box(layout), black_box(bytes))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
