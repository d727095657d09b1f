//! The run engine.
//!
//! One bar-at-a-time pipeline drives every mode:
//! - `EngineLoop`: backtest, simulation and live runs over any [`BarFeed`].
//! - `PositionManager`: the FLAT / LONG / SHORT state machine and account.
//! - `Bar` / `BarBuilder`: validated OHLCV input.
//! - `OrderExecution`: pluggable fills; synthetic by default.

mod account;
mod bar;
mod config;
mod execution;
mod feed;
mod manager;
mod position;

pub use account::*;
pub use bar::*;
pub use config::*;
pub use execution::*;
pub use feed::*;
pub use manager::*;
pub use position::*;

#[cfg(test)]
mod runs;

use crate::errors::{Error, Result};
use crate::indicators::IndicatorEngine;
use crate::stats::{RunMode, RunOutcome, RunResult, StatisticsCollector};
use crate::strategy::{Decision, SignalContext, Strategy};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use tracing::{debug, warn};

/// What the engine reports while a run is in flight, for dashboards and
/// notification layers. Delivery is best effort: a dropped receiver never
/// stalls or fails the run.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// One bar made it through the pipeline.
    BarProcessed {
        /// The bar's open time.
        time: DateTime<Utc>,
        /// The bar's close price.
        close: f64,
        /// Mark-to-market equity at that close.
        equity: f64,
    },
    /// An order filled, entry or exit.
    OrderFilled(Fill),
    /// A round trip completed.
    TradeClosed(Trade),
    /// A tick's action failed recoverably; the run continues.
    TickFailed {
        /// Bar time of the failed tick.
        time: DateTime<Utc>,
        /// The error, rendered.
        error: String,
    },
    /// The run is over and its result is sealed.
    RunSealed {
        /// Which tape the run played against.
        mode: RunMode,
        /// Why it sealed.
        outcome: RunOutcome,
    },
}

/// Drives one run: bars in, [`RunResult`] out.
///
/// The same pipeline backs all three modes. Per bar, in order: reject
/// out-of-order input, update indicators, apply any decision queued under
/// [`FillPolicy::NextBarOpen`] at the open, check the open position's exit
/// triggers against the bar's range, then, when no trigger consumed the
/// tick, evaluate the strategy and act on its decision. Equity is sampled
/// at every close; a run that ends with an open position force-closes it
/// at the last seen close so every result ends flat.
///
/// Runs are deterministic: the same bars, config and strategy produce the
/// same [`RunResult`], whether the bars arrive as a slice or over a
/// channel.
pub struct EngineLoop {
    config: RunConfig,
    events: Option<Sender<EngineEvent>>,
}

impl EngineLoop {
    /// Creates an engine for the given run configuration.
    ///
    /// ### Arguments
    /// * `config` - Validated here; a bad value fails fast.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            events: None,
        })
    }

    /// Streams [`EngineEvent`]s to the given channel while runs execute.
    pub fn with_event_sink(mut self, sender: Sender<EngineEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// The configuration runs execute under.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Replays a finite historical slice with synthetic fills.
    ///
    /// ### Arguments
    /// * `bars` - The tape, oldest first.
    /// * `strategy` - Evaluated once per bar past its indicator warm-up.
    ///
    /// ### Example
    /// ```
    /// use barloop::prelude::*;
    /// use chrono::DateTime;
    ///
    /// let bars: Vec<Bar> = (0..3)
    ///     .map(|i| {
    ///         BarBuilder::new()
    ///             .open(100.0)
    ///             .high(101.0)
    ///             .low(99.0)
    ///             .close(100.0)
    ///             .volume(1.0)
    ///             .open_time(DateTime::from_timestamp(i * 60, 0).unwrap())
    ///             .close_time(DateTime::from_timestamp(i * 60 + 59, 0).unwrap())
    ///             .build()
    ///             .unwrap()
    ///     })
    ///     .collect();
    ///
    /// let engine = EngineLoop::new(RunConfig::new(1_000.0)).unwrap();
    /// let result = engine
    ///     .backtest(bars, &|_: &SignalContext| Decision::Hold)
    ///     .unwrap();
    /// assert_eq!(result.outcome, RunOutcome::Completed);
    /// assert!(result.trades.is_empty());
    /// ```
    pub fn backtest<S: Strategy>(
        &self,
        bars: impl Into<Arc<[Bar]>>,
        strategy: &S,
    ) -> Result<RunResult> {
        let bars = bars.into();
        if bars.is_empty() {
            return Err(Error::EmptyBarData);
        }
        let mut feed = SliceFeed::new(bars);
        let cancel = CancelToken::new();
        self.run(
            RunMode::Backtest,
            &mut feed,
            strategy,
            &mut SyntheticExecution,
            &cancel,
        )
    }

    /// Runs against a streaming feed with synthetic fills, until the feed
    /// ends or `cancel` fires.
    pub fn simulate<S: Strategy, F: BarFeed>(
        &self,
        mut feed: F,
        strategy: &S,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        self.run(
            RunMode::Simulation,
            &mut feed,
            strategy,
            &mut SyntheticExecution,
            cancel,
        )
    }

    /// Runs against a streaming feed with real order execution.
    ///
    /// Same pipeline as [`simulate`](Self::simulate); fills come from the
    /// given executor instead of the synthetic one, and a failed order
    /// fails its tick, not the run.
    pub fn live<S: Strategy, F: BarFeed>(
        &self,
        mut feed: F,
        strategy: &S,
        executor: &mut dyn OrderExecution,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        self.run(RunMode::Live, &mut feed, strategy, executor, cancel)
    }

    fn run<S: Strategy>(
        &self,
        mode: RunMode,
        feed: &mut dyn BarFeed,
        strategy: &S,
        executor: &mut dyn OrderExecution,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        let mut indicators = IndicatorEngine::new(strategy.indicators())?;
        let mut manager = PositionManager::new(&self.config)?;
        let mut collector = StatisticsCollector::new(self.config.initial_balance());
        let mut last_bar: Option<Bar> = None;
        let mut pending: Option<Decision> = None;
        let mut outcome = RunOutcome::Completed;

        debug!(
            %mode,
            strategy = strategy.name(),
            balance = self.config.initial_balance(),
            "run started"
        );

        while let Some(bar) = feed.next_bar(cancel)? {
            if let Some(last) = &last_bar
                && bar.open_time() <= last.open_time()
            {
                return Err(Error::OutOfOrderBar {
                    last: last.open_time(),
                    offending: bar.open_time(),
                });
            }

            let series = indicators.update(&bar);

            // a decision queued on the previous bar lands at this open
            if let Some(decision) = pending.take()
                && let Err(error) = self.apply_decision(
                    &mut manager,
                    &mut collector,
                    decision,
                    bar.open(),
                    bar.open_time(),
                    executor,
                )
            {
                self.note_failure(&mut collector, bar.open_time(), error)?;
            }

            // an exit trigger (or its failure) consumes the tick; the
            // strategy is not consulted again until the next bar
            let mut tick_consumed = false;
            match manager.check_exits(&bar, &self.config, executor) {
                Ok(Some((fill, trade))) => {
                    tick_consumed = true;
                    self.record_close(&mut collector, fill, trade);
                }
                Ok(None) => {}
                Err(error) => {
                    tick_consumed = true;
                    self.note_failure(&mut collector, bar.open_time(), error)?;
                }
            }

            if !tick_consumed && manager.is_flat() {
                match manager.try_reentry(&bar, &self.config, executor) {
                    Ok(Some(fill)) => {
                        tick_consumed = true;
                        self.emit(EngineEvent::OrderFilled(fill));
                    }
                    Ok(None) => {}
                    Err(error) => {
                        tick_consumed = true;
                        self.note_failure(&mut collector, bar.close_time(), error)?;
                    }
                }
            }

            if !tick_consumed {
                let context = SignalContext {
                    bar: &bar,
                    indicators: series,
                    position: manager.position(),
                };
                let decision = strategy.evaluate(&context);
                match self.config.fill_policy() {
                    FillPolicy::SignalClose => {
                        if let Err(error) = self.apply_decision(
                            &mut manager,
                            &mut collector,
                            decision,
                            bar.close(),
                            bar.close_time(),
                            executor,
                        ) {
                            self.note_failure(&mut collector, bar.close_time(), error)?;
                        }
                    }
                    FillPolicy::NextBarOpen => {
                        if !matches!(decision, Decision::Hold) {
                            pending = Some(decision);
                        }
                    }
                }
            }

            let equity = manager.equity(bar.close());
            collector.record_equity(bar.open_time(), equity);
            self.emit(EngineEvent::BarProcessed {
                time: bar.open_time(),
                close: bar.close(),
                equity,
            });
            last_bar = Some(bar);

            if equity <= 0.0 {
                outcome = RunOutcome::Liquidated;
                warn!(equity, "equity exhausted; halting run");
                break;
            }
            if let Some(limit) = self.config.max_drawdown_percent()
                && collector.max_drawdown_percent() >= limit
            {
                outcome = RunOutcome::DrawdownHalted;
                warn!(
                    drawdown = collector.max_drawdown_percent(),
                    limit, "drawdown cutoff crossed; halting run"
                );
                break;
            }
        }

        if outcome == RunOutcome::Completed && cancel.is_cancelled() {
            outcome = RunOutcome::Cancelled;
        }

        // every run ends flat: close whatever is open at the last close
        if let Some(bar) = &last_bar
            && !manager.is_flat()
        {
            match manager.forced_exit(bar.close(), bar.close_time(), &self.config, executor) {
                Ok(Some((fill, trade))) => {
                    self.record_close(&mut collector, fill, trade);
                    collector.restate_last_equity(manager.equity(bar.close()));
                }
                Ok(None) => {}
                Err(error) => {
                    self.note_failure(&mut collector, bar.close_time(), error)?;
                    // the books still reconcile at the last close; the
                    // operator owns the real-world remainder
                    if let Some((fill, trade)) = manager.forced_exit(
                        bar.close(),
                        bar.close_time(),
                        &self.config,
                        &mut SyntheticExecution,
                    )? {
                        self.record_close(&mut collector, fill, trade);
                        collector.restate_last_equity(manager.equity(bar.close()));
                    }
                }
            }
        }

        let fees_paid = manager.account().fees_paid();
        let result = collector.seal(mode, outcome, fees_paid);
        debug!(
            %mode,
            %outcome,
            bars = result.equity_curve.len(),
            trades = result.trades.len(),
            net_profit = result.summary.net_profit,
            "run sealed"
        );
        self.emit(EngineEvent::RunSealed { mode, outcome });
        Ok(result)
    }

    // One state transition per decision; a reversal is a close and an
    // entry in the same tick. With shorting disabled an EnterShort still
    // closes an open long, it just stops there.
    fn apply_decision(
        &self,
        manager: &mut PositionManager,
        collector: &mut StatisticsCollector,
        decision: Decision,
        price: f64,
        time: DateTime<Utc>,
        executor: &mut dyn OrderExecution,
    ) -> Result<()> {
        match (decision, manager.side()) {
            (Decision::Hold, _) | (Decision::Exit, None) => {}
            (Decision::EnterLong, Some(PositionSide::Long))
            | (Decision::EnterShort, Some(PositionSide::Short)) => {}
            (Decision::Exit, Some(_)) => {
                let (fill, trade) =
                    manager.close(price, time, FillReason::Signal, &self.config, executor)?;
                self.record_close(collector, fill, trade);
            }
            (Decision::EnterLong, None) => {
                self.enter(manager, PositionSide::Long, price, time, executor)?;
            }
            (Decision::EnterLong, Some(PositionSide::Short)) => {
                let (fill, trade) =
                    manager.close(price, time, FillReason::Signal, &self.config, executor)?;
                self.record_close(collector, fill, trade);
                self.enter(manager, PositionSide::Long, price, time, executor)?;
            }
            (Decision::EnterShort, None) => {
                if self.config.allow_short() {
                    self.enter(manager, PositionSide::Short, price, time, executor)?;
                }
            }
            (Decision::EnterShort, Some(PositionSide::Long)) => {
                let (fill, trade) =
                    manager.close(price, time, FillReason::Signal, &self.config, executor)?;
                self.record_close(collector, fill, trade);
                if self.config.allow_short() {
                    self.enter(manager, PositionSide::Short, price, time, executor)?;
                }
            }
        }
        Ok(())
    }

    fn enter(
        &self,
        manager: &mut PositionManager,
        side: PositionSide,
        price: f64,
        time: DateTime<Utc>,
        executor: &mut dyn OrderExecution,
    ) -> Result<()> {
        if let Some(fill) = manager.enter(side, price, time, &self.config, executor)? {
            self.emit(EngineEvent::OrderFilled(fill));
        }
        Ok(())
    }

    fn record_close(&self, collector: &mut StatisticsCollector, fill: Fill, trade: Trade) {
        self.emit(EngineEvent::OrderFilled(fill));
        collector.record_trade(trade.clone());
        self.emit(EngineEvent::TradeClosed(trade));
    }

    // Execution failures cost their tick, nothing else; anything harder
    // aborts the run.
    fn note_failure(
        &self,
        collector: &mut StatisticsCollector,
        time: DateTime<Utc>,
        error: Error,
    ) -> Result<()> {
        if !error.is_execution_failure() {
            return Err(error);
        }
        warn!(%error, "tick failed; run continues");
        collector.record_failure(time, &error);
        self.emit(EngineEvent::TickFailed {
            time,
            error: error.to_string(),
        });
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}
