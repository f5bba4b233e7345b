use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rnes_core::testing::nrom_image;
use rnes_core::Nes;

/// Rendering on, NMI on, a busy loop counting in zero page
#[rustfmt::skip]
const PROGRAM: [u8; 15] = [
    0xA9, 0x80,       // LDA #$80
    0x8D, 0x00, 0x20, // STA $2000
    0xA9, 0x1E,       // LDA #$1E
    0x8D, 0x01, 0x20, // STA $2001
    0xE6, 0x10,       // INC $10
    0x4C, 0x0A, 0x80, // JMP $800A
];

fn console() -> Nes {
    let mut nes = Nes::default();
    if let Err(error) = nes.load_cartridge(&nrom_image(&PROGRAM, 0x8000)) {
        panic!("benchmark image rejected: {error}");
    }
    nes
}

fn bench_run_frame(c: &mut Criterion) {
    let mut nes = console();
    c.bench_function("run_frame", |b| {
        b.iter(|| {
            nes.run_frame().ok();
            black_box(nes.frame_buffer()[0]);
        })
    });
}

fn bench_run_frame_with_audio_drain(c: &mut Criterion) {
    let mut nes = console();
    c.bench_function("run_frame_take_audio", |b| {
        b.iter(|| {
            nes.run_frame().ok();
            black_box(nes.take_audio_samples().len());
        })
    });
}

criterion_group!(benches, bench_run_frame, bench_run_frame_with_audio_drain);
criterion_main!(benches);
