//! # Bring Your Own Indicator
//!
//! Wraps indicators from the [`ta`](https://crates.io/crates/ta) crate in
//! the [`Indicator`] trait and drives a MACD-filtered trend strategy with
//! them. Anything that can produce a number per bar plugs in the same way.
mod utils;

use std::{error::Error, result::Result, sync::Arc};

use barloop::prelude::*;
use ta::{
    Next,
    indicators::{
        ExponentialMovingAverage, MovingAverageConvergenceDivergence,
        MovingAverageConvergenceDivergenceOutput,
    },
};

/// `ta`'s EMA behind the engine's warm-up contract.
struct TaEma {
    inner: ExponentialMovingAverage,
    period: usize,
    seen: usize,
}

impl TaEma {
    fn new(period: usize) -> Self {
        Self {
            inner: ExponentialMovingAverage::new(period).unwrap(),
            period,
            seen: 0,
        }
    }
}

impl Indicator for TaEma {
    fn name(&self) -> &str {
        "ta_ema"
    }

    fn update(&mut self, bar: &Bar) -> Option<f64> {
        let value = self.inner.next(bar.close());
        self.seen += 1;
        (self.seen >= self.period).then_some(value)
    }
}

/// MACD histogram with the same treatment; warms up over the slow period.
struct TaMacdHistogram {
    inner: MovingAverageConvergenceDivergence,
    warmup: usize,
    seen: usize,
}

impl Default for TaMacdHistogram {
    fn default() -> Self {
        Self {
            inner: MovingAverageConvergenceDivergence::default(),
            warmup: 26,
            seen: 0,
        }
    }
}

impl Indicator for TaMacdHistogram {
    fn name(&self) -> &str {
        "ta_macd_histogram"
    }

    fn update(&mut self, bar: &Bar) -> Option<f64> {
        let MovingAverageConvergenceDivergenceOutput { histogram, .. } =
            self.inner.next(bar.close());
        self.seen += 1;
        (self.seen >= self.warmup).then_some(histogram)
    }
}

/// Long when price sits above its EMA and the MACD histogram agrees.
struct TrendFilter {
    ema_period: usize,
}

impl Strategy for TrendFilter {
    fn name(&self) -> &str {
        "trend_filter"
    }

    // Filter EMA at index 0, histogram at index 1.
    fn indicators(&self) -> Vec<Box<dyn Indicator>> {
        vec![
            Box::new(TaEma::new(self.ema_period)),
            Box::new(TaMacdHistogram::default()),
        ]
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision {
        let (Some(ema), Some(histogram)) = (ctx.indicators.at(0), ctx.indicators.at(1)) else {
            return Decision::Hold;
        };
        let close = ctx.bar.close();
        if close > ema && histogram > 0.0 {
            Decision::EnterLong
        } else if histogram < 0.0 {
            Decision::Exit
        } else {
            Decision::Hold
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let bars: Arc<[Bar]> = Arc::from_iter(utils::example_bars());
    let initial_balance = 1_000.0;

    let config = RunConfig::new(initial_balance)
        .with_fee_percent(0.1)
        .with_trailing_stop_percent(2.0)
        .with_allow_short(false);

    let strategy = TrendFilter { ema_period: 100 };
    let engine = EngineLoop::new(config)?;
    let result = engine.backtest(bars.clone(), &strategy)?;

    utils::print_report(&result, initial_balance, &bars);

    Ok(())
}
