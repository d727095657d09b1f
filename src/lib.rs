//! # Barloop: one strategy, one loop, three tapes
//!
//! **Barloop** is a Rust library for running trading strategies bar by bar over
//! candlestick (OHLCV) data. The same engine loop drives a **backtest** over a
//! historical slice, a **simulation** over a live feed with synthetic fills, and
//! **live** execution against a real order collaborator, so a strategy tested
//! against history runs unmodified against the market.
//!
//! ## Why Barloop?
//! - **No lookahead, ever**: indicators and decisions for bar *t* see bars `1..t` only,
//!   and the engine fails fast on out-of-order or duplicate bars.
//! - **Deterministic**: the same bars, parameters and strategy always produce the
//!   same equity curve and trade log, in every mode.
//! - **Risk management built in**: stop-loss, take-profit and ratcheting trailing
//!   stops checked against each bar's high/low, filled at the triggered level.
//! - **Parallel optimization**: exhaustive parameter-grid search fanned out across
//!   CPU cores, with failed trials recorded instead of aborting the sweep.
//! - **Extensible**: strategies and indicators are capability traits; add your own
//!   without touching the engine.
//!
//! ## Core Components
//! | Component     | Description                                                                       |
//! |---------------|-----------------------------------------------------------------------------------|
//! | **`Bar`**     | One validated OHLCV sample with open/close times.                                 |
//! | **`BarFeed`** | Where bars come from: a historical slice or a blocking live channel.              |
//! | **`Indicator`** | Incremental per-bar computation with an explicit warm-up (`None` until ready).  |
//! | **`Strategy`**  | User code mapping (bar, indicators, position) to a [`Decision`](strategy::Decision). |
//! | **`PositionManager`** | The FLAT/LONG/SHORT state machine: entries, exits, stops, sizing, fees.   |
//! | **`EngineLoop`**      | Drives one run, identically across backtest, simulation and live.         |
//! | **`RunResult`**       | Sealed equity curve, trade log and summary metrics.                       |
//! | **`Optimizer`**       | Grid search over independent backtests, ranked by a configurable objective. |
//!
//! ## Execution modes
//! | Mode           | Bars from                  | Fills by                                   |
//! |----------------|----------------------------|---------------------------------------------|
//! | **Backtest**   | pre-fetched slice          | synthetic, at the configured policy price   |
//! | **Simulation** | live feed (blocking)       | synthetic, at the configured policy price   |
//! | **Live**       | live feed (blocking)       | external [`OrderExecution`](engine::OrderExecution) collaborator |
//!
//! ## Getting Started
//! ```rust
//! use barloop::prelude::*;
//! use chrono::DateTime;
//!
//! fn main() -> Result<()> {
//!     // Five rising one-minute bars.
//!     let mut bars = Vec::new();
//!     for i in 0..5i64 {
//!         let price = 100.0 + i as f64;
//!         let bar = BarBuilder::new()
//!             .open(price)
//!             .high(price + 1.0)
//!             .low(price - 1.0)
//!             .close(price + 0.5)
//!             .volume(10.0)
//!             .open_time(DateTime::from_timestamp(i * 60, 0).unwrap())
//!             .close_time(DateTime::from_timestamp(i * 60 + 59, 0).unwrap())
//!             .build()?;
//!         bars.push(bar);
//!     }
//!
//!     // A fast/slow moving-average cross, all-in sizing, no fees.
//!     let strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 2, 3)?;
//!     let engine = EngineLoop::new(RunConfig::new(10_000.0))?;
//!     let result = engine.backtest(bars, &strategy)?;
//!
//!     assert_eq!(result.outcome, RunOutcome::Completed);
//!     assert_eq!(result.trades.len(), 1);
//!     println!("{}", result.summary);
//!     Ok(())
//! }
//! ```
//!
//! ## Summary metrics
//! | Metric            | Description                                                    |
//! |-------------------|----------------------------------------------------------------|
//! | **Net Profit**    | Final equity minus initial balance, absolute and percent.      |
//! | **Max Drawdown**  | Largest peak-to-trough decline of the mark-to-market curve (%).|
//! | **Win Rate**      | Percentage of closed trades with positive net profit.          |
//! | **Profit Factor** | Gross profits over gross losses.                               |
//! | **Sharpe Ratio**  | Risk-adjusted return over per-bar equity returns.              |
//!
//! ## Error Handling
//! Every fallible operation returns the crate [`Result`](errors::Result). Bad
//! input data (out-of-order bars) fails a run immediately; a rejected or
//! timed-out live order fails only its tick and is recorded on the
//! [`RunResult`](stats::RunResult); configuration mistakes are caught before
//! the first bar is processed:
//!
//! ```rust
//! use barloop::prelude::*;
//!
//! fn main() {
//!     match EngineLoop::new(RunConfig::new(-50.0)) {
//!         Ok(_) => unreachable!(),
//!         Err(Error::NegZeroBalance(balance)) => {
//!             eprintln!("rejected before any bar was read: {balance}")
//!         }
//!         Err(other) => eprintln!("{other}"),
//!     }
//! }
//! ```
//!
//! ## Integrations
//! | Crate          | Purpose                                                  |
//! |----------------|-----------------------------------------------------------|
//! | [`rayon`](https://crates.io/crates/rayon)   | Parallel optimizer trials.                 |
//! | [`tracing`](https://crates.io/crates/tracing) | Run/fill/failure diagnostics.            |
//! | [`serde`](https://crates.io/crates/serde)   | Serialize results and load kline files (feature `serde`). |
//! | [`ta`](https://crates.io/crates/ta)         | Bring-your-own indicators through the [`Indicator`](indicators::Indicator) trait. |
//!
//! ## License
//! MIT
#![warn(missing_docs)]

/// Core engine: bars, feeds, account, positions, execution and the run loop.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Incremental indicators and the engine that drives them.
pub mod indicators;

/// Strategy parameters: values, sets, ranges and search spaces.
pub mod params;

/// Equity curve, trade log and summary metrics of a run.
pub mod stats;

/// The strategy capability: decisions, context and the trait itself.
pub mod strategy;

/// Ready-made strategies.
pub mod strategies;

/// Parameter-grid optimization over independent backtest runs.
pub mod optimizer;

/// Loading bars from exchange kline files.
#[cfg(feature = "serde")]
pub mod utils;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::indicators::*;
    pub use crate::optimizer::*;
    pub use crate::params::*;
    pub use crate::stats::*;
    pub use crate::strategies::*;
    pub use crate::strategy::*;

    #[cfg(feature = "serde")]
    pub use crate::utils::*;
}

use std::ops::{Add, Div, Mul, Sub};

/// Percentage arithmetic on prices and balances.
///
/// Exit levels and profit figures are all "x percent away from y"
/// computations; this trait keeps them readable at the call site.
pub trait Percent<Rhs = Self> {
    /// The value increased by the given percentage.
    ///
    /// ### Arguments
    /// * `percent` - The percentage to add (e.g., 10.0 for 10%).
    fn add_percent(self, percent: Rhs) -> Self;

    /// The value decreased by the given percentage.
    ///
    /// ### Arguments
    /// * `percent` - The percentage to subtract (e.g., 10.0 for 10%).
    fn sub_percent(self, percent: Rhs) -> Self;

    /// The percentage change from this value to `new`.
    ///
    /// ### Arguments
    /// * `new` - The value to compare against.
    fn percent_change(self, new: Self) -> Self;
}

impl Percent for f64 {
    fn add_percent(self, percent: Self) -> Self {
        self.add(self.mul(percent.div(100.0)))
    }

    fn sub_percent(self, percent: Self) -> Self {
        self.sub(self.mul(percent.div(100.0)))
    }

    fn percent_change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }
}

#[cfg(test)]
mod percent {
    use super::*;

    #[test]
    fn add() {
        assert_eq!(110.0, 100.0.add_percent(10.0))
    }

    #[test]
    fn sub() {
        assert_eq!(90.0, 100.0.sub_percent(10.0))
    }

    #[test]
    fn change() {
        assert_eq!(10.0, 100.0.percent_change(110.0))
    }

    #[test]
    fn change_down() {
        assert_eq!(-25.0, 120.0.percent_change(90.0))
    }
}
