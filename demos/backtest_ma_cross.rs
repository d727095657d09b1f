//! # Moving-Average Crossover Backtest
//!
//! Replays the bundled [`MaCross`] strategy over a deterministic tape with
//! a fee and protective exits, then compares the sealed run to buying the
//! first close and holding.
mod utils;

use std::{error::Error, result::Result, sync::Arc};

use barloop::prelude::*;

fn main() -> Result<(), Box<dyn Error>> {
    let bars: Arc<[Bar]> = Arc::from_iter(utils::example_bars());
    let initial_balance = 1_000.0;

    let config = RunConfig::new(initial_balance)
        .with_fee_percent(0.1)
        .with_stop_loss_percent(5.0)
        .with_take_profit_percent(15.0);

    let strategy = MaCross::new(MaKind::Ema, PriceSource::Close, 9, 21)?;
    let engine = EngineLoop::new(config)?;
    let result = engine.backtest(bars.clone(), &strategy)?;

    println!("Ticks: {}", bars.len());
    utils::print_report(&result, initial_balance, &bars);

    Ok(())
}
