//! # Streaming Simulation over a Channel
//!
//! Drips the tape through a [`ChannelFeed`] the way a socket would, mirrors
//! the run through the event stream, and pulls the plug with a
//! [`CancelToken`] partway through. The run seals as cancelled with
//! everything processed so far intact.
mod utils;

use std::{error::Error, result::Result, sync::mpsc, thread, time::Duration};

use barloop::prelude::*;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let initial_balance = 1_000.0;
    let config = RunConfig::new(initial_balance)
        .with_fee_percent(0.1)
        .with_trailing_stop_percent(2.0);

    let (bar_tx, feed) = ChannelFeed::channel();
    let feed = feed.with_poll_interval(Duration::from_millis(10));
    let cancel = CancelToken::new();

    // Feeder: drip the tape in.
    let feeder = thread::spawn(move || {
        for bar in utils::example_bars().into_iter().take(600) {
            if bar_tx.send(bar).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
    });

    // Watcher: cancel partway through the stream.
    let watcher = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            cancel.cancel();
        })
    };

    let (event_tx, event_rx) = mpsc::channel();
    let printer = thread::spawn(move || {
        for event in event_rx {
            match event {
                EngineEvent::OrderFilled(fill) => {
                    println!(
                        "fill  {:?} {:?} {:.2} x {:.4} ({})",
                        fill.kind, fill.side, fill.price, fill.quantity, fill.reason
                    );
                }
                EngineEvent::TradeClosed(trade) => {
                    println!(
                        "trade {:?} net {:+.2} ({:+.2}%) over {}",
                        trade.side,
                        trade.net_profit,
                        trade.net_profit_percent(),
                        trade.duration()
                    );
                }
                EngineEvent::RunSealed { mode, outcome } => {
                    println!("sealed {mode:?} as {outcome}");
                }
                _ => {}
            }
        }
    });

    let strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 5, 13)?;
    let engine = EngineLoop::new(config)?.with_event_sink(event_tx);
    let result = engine.simulate(feed, &strategy, &cancel)?;
    drop(engine);

    feeder.join().unwrap();
    watcher.join().unwrap();
    printer.join().unwrap();

    println!(
        "\nProcessed {} bars before sealing ({})",
        result.equity_curve.len(),
        result.outcome
    );
    println!("{}", result.summary);

    Ok(())
}
