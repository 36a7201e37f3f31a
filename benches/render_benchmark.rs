use criterion::{Criterion, black_box, criterion_group, criterion_main};

use uiproof::capture::term::{AnsiInterpreter, ScreenBuffer};
use uiproof::classify;

fn bench_screen_render(c: &mut Criterion) {
    let mut screen = ScreenBuffer::new(80, 24);
    for ch in "The quick brown fox jumps over the lazy dog. ".chars().cycle().take(80 * 24) {
        screen.write_char(ch);
    }

    c.bench_function("render_80x24_screen", |b| {
        b.iter(|| black_box(screen.render_to_image()))
    });
}

fn bench_ansi_interpretation(c: &mut Criterion) {
    let stream: Vec<u8> = b"\x1b[2J\x1b[1;1H\x1b[31mhello \x1b[42mworld\x1b[0m\r\n"
        .iter()
        .copied()
        .cycle()
        .take(64 * 1024)
        .collect();

    c.bench_function("interpret_64k_ansi_stream", |b| {
        b.iter(|| {
            let mut interp = AnsiInterpreter::new(80, 24);
            for byte in &stream {
                interp.process_byte(*byte);
            }
            black_box(interp.screen().to_text())
        })
    });
}

fn bench_classify(c: &mut Criterion) {
    let targets = [
        "http://localhost:3000/dashboard",
        "window:Main Editor",
        "tui:cargo run --example demo",
        "npm run build",
    ];

    c.bench_function("classify_targets", |b| {
        b.iter(|| {
            for target in &targets {
                black_box(classify(target));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_screen_render,
    bench_ansi_interpretation,
    bench_classify
);
criterion_main!(benches);
