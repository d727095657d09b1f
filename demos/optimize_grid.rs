//! # Parallel Crossover Parameter Sweep
//!
//! Covers a fast/slow period grid exhaustively, one independent backtest
//! per combination across all CPUs, and prints the top of the ranking.
//! Combinations the strategy rejects (fast not below slow) surface as
//! failed trials instead of aborting the sweep.
mod utils;

use std::{error::Error, result::Result, sync::Arc};

use barloop::prelude::*;

fn main() -> Result<(), Box<dyn Error>> {
    let bars: Arc<[Bar]> = Arc::from_iter(utils::example_bars());
    let initial_balance = 1_000.0;

    let config = RunConfig::new(initial_balance).with_fee_percent(0.1);
    let space = ParameterSpace::new()
        .with("fast", ParamRange::int(5, 25, 5))
        .with("slow", ParamRange::int(20, 80, 10));

    let optimizer =
        Optimizer::new(bars.clone(), config, space).with_objective(Objective::NetProfit);
    let trials = optimizer.run(|params| {
        let mut strategy = MaCross::new(MaKind::Ema, PriceSource::Close, 9, 21)?;
        strategy.configure(params)?;
        Ok(strategy)
    })?;

    let failed = trials.iter().filter(|trial| trial.is_failed()).count();
    println!("NB TICKS {}", bars.len());
    println!(
        "\n=== TOP 5 of {} combinations ({failed} rejected) ===",
        trials.len()
    );
    for trial in trials.iter().take(5) {
        let Some(summary) = trial.summary() else {
            continue;
        };
        let fast = trial.params.int("fast")?;
        let slow = trial.params.int("slow")?;
        println!(
            "fast {fast:>2} / slow {slow:>2} | net {:+9.2} ({:+7.2}%) | drawdown {:5.2}% | {} trades",
            summary.net_profit,
            summary.net_profit_percent,
            summary.max_drawdown_percent,
            summary.trade_count,
        );
    }

    Ok(())
}
