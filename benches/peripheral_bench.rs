// Benchmarks for the peripheral hot paths: LCD redraw and pin dispatch
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use teensy_emu::Board;
use teensy_emu::hardware::InterruptMode;

fn bench_lcd_redraw(c: &mut Criterion) {
    let board = Board::new();
    let frames = Arc::new(AtomicUsize::new(0));
    let f = frames.clone();
    board.lcd.set_sink(Arc::new(move |frame: &[u8]| {
        black_box(frame);
        f.fetch_add(1, Ordering::Relaxed);
    }));
    c.bench_function("lcd print + full redraw", |b| {
        b.iter(|| {
            board.lcd.set_cursor(0, 0);
            board.lcd.print_fmt(format_args!("{:02}:{:02}:{:02}", 12, 34, 56));
        });
    });
    assert!(frames.load(Ordering::Relaxed) > 0);
}

fn bench_pin_dispatch(c: &mut Criterion) {
    let board = Board::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    board.attach_interrupt(
        17,
        Arc::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        }),
        InterruptMode::Falling,
    );
    board.pins.observe(9, Arc::new(|v| {
        black_box(v);
    }));
    c.bench_function("trigger pin interrupt", |b| {
        b.iter(|| board.pins.trigger(black_box(17)));
    });
    c.bench_function("digital write to observed pin", |b| {
        b.iter(|| board.digital_write(black_box(9), 1));
    });
}

criterion_group!(benches, bench_lcd_redraw, bench_pin_dispatch);
criterion_main!(benches);
