use barloop::prelude::*;
use chrono::{DateTime, Duration};

/// Generates deterministic bar data.
pub fn generate_sample_bars(count: i32, seed: i32, base_price: f64) -> Vec<Bar> {
    let mut open_time = DateTime::default();
    let mut open = base_price;

    (0..count)
        .map(|i| {
            // Slow drift plus a seeded oscillation, so every run replays
            // the same tape.
            let trend = base_price + 0.05 * (i as f64);
            let swing = 5.0 * ((i as f64 * 0.3 + seed as f64).sin() * 0.5 + 0.5);

            let close = trend + swing;
            let high = close.max(open) + 0.3 * swing;
            let low = close.min(open) - 0.3 * swing;
            // Volume with a seasonal pattern
            let volume = 1_000.0 + 500.0 * (i as f64 * 0.2).sin().abs();
            let close_time = open_time + Duration::minutes(1);

            let bar = BarBuilder::new()
                .open(open)
                .high(high)
                .low(low)
                .close(close)
                .volume(volume)
                .open_time(open_time)
                .close_time(close_time)
                .build()
                .unwrap();

            open_time = close_time;
            open = close;
            bar
        })
        .collect()
}

pub fn example_bars() -> Vec<Bar> {
    generate_sample_bars(3_000, 42, 100.0)
}

/// Pretty print a sealed run next to buying at the first close and
/// holding to the last.
#[allow(dead_code)]
pub fn print_report(result: &RunResult, initial_balance: f64, bars: &[Bar]) {
    println!("{}", result.summary);
    println!("Outcome: {}", result.outcome);

    let first_price = bars.first().unwrap().close();
    let last_price = bars.last().unwrap().close();
    let buy_and_hold = (initial_balance / first_price) * last_price;
    let buy_and_hold_perf = first_price.percent_change(last_price);
    println!("Buy and hold: {buy_and_hold:.2} ({buy_and_hold_perf:+.2}%)");
}
