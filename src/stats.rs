#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{Trade, TradeOutcome};
use crate::errors::Error;
use chrono::{DateTime, Utc};

/// One mark-to-market equity sample.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    /// Bar open time the sample belongs to.
    pub time: DateTime<Utc>,
    /// Equity at that bar's close.
    pub equity: f64,
}

/// Which tape a run played against.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Finite historical slice, synthetic fills.
    Backtest,
    /// Live feed, synthetic fills.
    Simulation,
    /// Live feed, external order execution.
    Live,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Backtest => "backtest",
            Self::Simulation => "simulation",
            Self::Live => "live",
        };
        write!(f, "{label}")
    }
}

/// Why a run sealed.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The feed ran out of bars.
    Completed,
    /// The cancellation token was observed at the bar wait.
    Cancelled,
    /// Equity fell to zero or below.
    Liquidated,
    /// The configured max-drawdown cutoff was crossed.
    DrawdownHalted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Liquidated => "liquidated",
            Self::DrawdownHalted => "drawdown halted",
        };
        write!(f, "{label}")
    }
}

/// One recoverable execution failure, kept on the run it happened in.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFailureRecord {
    /// Bar open time of the failed tick.
    pub time: DateTime<Utc>,
    /// The error, rendered.
    pub error: String,
}

/// Summary metrics of one sealed run.
///
/// Every field is defined for every run: a run with no trades reports zero
/// counts and rates rather than faulting, and a run with no losing trades
/// reports an infinite profit factor.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Final equity minus initial balance.
    pub net_profit: f64,
    /// Net profit as a percentage of the initial balance.
    pub net_profit_percent: f64,
    /// Largest peak-to-trough decline of the equity curve, in percent of
    /// the peak.
    pub max_drawdown_percent: f64,
    /// Percentage of closed trades with positive net profit.
    pub win_rate_percent: f64,
    /// Mean net profit of winning trades, zero when there are none.
    pub average_win: f64,
    /// Mean net profit of losing trades (a negative number), zero when
    /// there are none.
    pub average_loss: f64,
    /// Gross profits over gross losses; infinite without losses, zero
    /// without profits.
    pub profit_factor: f64,
    /// Mean per-bar equity return over its standard deviation; zero when
    /// the curve is too short or flat.
    pub sharpe: f64,
    /// Closed trades.
    pub trade_count: usize,
    /// Trades with positive net profit.
    pub win_count: usize,
    /// Trades with negative net profit.
    pub loss_count: usize,
    /// Trades with exactly zero net profit.
    pub breakeven_count: usize,
    /// Total fees charged across every fill.
    pub fees_paid: f64,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Run Summary ===")?;
        writeln!(
            f,
            "Net Profit: {:.2} ({:.2}%)",
            self.net_profit, self.net_profit_percent
        )?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown_percent)?;
        writeln!(
            f,
            "Trades: {} ({} wins / {} losses / {} breakeven)",
            self.trade_count, self.win_count, self.loss_count, self.breakeven_count
        )?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate_percent)?;
        writeln!(
            f,
            "Average Win: {:.2} | Average Loss: {:.2}",
            self.average_win, self.average_loss
        )?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe)?;
        write!(f, "Fees Paid: {:.2}", self.fees_paid)
    }
}

/// The sealed product of one run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Which tape the run played against.
    pub mode: RunMode,
    /// Why it sealed.
    pub outcome: RunOutcome,
    /// Mark-to-market equity, one sample per processed bar.
    pub equity_curve: Vec<EquityPoint>,
    /// Every closed round trip, in close order.
    pub trades: Vec<Trade>,
    /// Recoverable execution failures, in occurrence order.
    pub failures: Vec<ExecutionFailureRecord>,
    /// Metrics computed at seal time.
    pub summary: Summary,
}

/// Accumulates the equity curve, trade log and failure log of a run in
/// flight, then seals them into a [`RunResult`].
///
/// Drawdown is tracked incrementally against the running equity peak,
/// seeded with the initial balance, so the engine can consult it per tick
/// without rescanning the curve.
#[derive(Debug, Clone)]
pub struct StatisticsCollector {
    initial_balance: f64,
    equity_curve: Vec<EquityPoint>,
    trades: Vec<Trade>,
    failures: Vec<ExecutionFailureRecord>,
    peak_equity: f64,
    max_drawdown_percent: f64,
}

impl StatisticsCollector {
    /// Creates an empty collector for a run starting from `initial_balance`.
    pub fn new(initial_balance: f64) -> Self {
        Self {
            initial_balance,
            equity_curve: Vec::new(),
            trades: Vec::new(),
            failures: Vec::new(),
            peak_equity: initial_balance,
            max_drawdown_percent: 0.0,
        }
    }

    /// Appends one equity sample and refreshes the peak and drawdown.
    pub fn record_equity(&mut self, time: DateTime<Utc>, equity: f64) {
        self.equity_curve.push(EquityPoint { time, equity });
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown = (self.peak_equity - equity) / self.peak_equity * 100.0;
        if drawdown > self.max_drawdown_percent {
            self.max_drawdown_percent = drawdown;
        }
    }

    // The end-of-run forced exit settles at the already-sampled close, so
    // it adjusts the final sample in place (by the exit fee) instead of
    // appending a second point for the same bar.
    pub(crate) fn restate_last_equity(&mut self, equity: f64) {
        if let Some(last) = self.equity_curve.last_mut() {
            last.equity = equity;
            let drawdown = (self.peak_equity - equity) / self.peak_equity * 100.0;
            if drawdown > self.max_drawdown_percent {
                self.max_drawdown_percent = drawdown;
            }
        }
    }

    /// Appends one closed trade.
    pub fn record_trade(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    /// Appends one recoverable execution failure.
    pub fn record_failure(&mut self, time: DateTime<Utc>, error: &Error) {
        self.failures.push(ExecutionFailureRecord {
            time,
            error: error.to_string(),
        });
    }

    /// The curve so far.
    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Trades closed so far.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Failures recorded so far.
    pub fn failures(&self) -> &[ExecutionFailureRecord] {
        &self.failures
    }

    /// Largest drawdown seen so far, in percent of the peak.
    pub fn max_drawdown_percent(&self) -> f64 {
        self.max_drawdown_percent
    }

    /// The most recent equity sample, if any bar was processed.
    pub fn last_equity(&self) -> Option<f64> {
        self.equity_curve.last().map(|point| point.equity)
    }

    /// Computes the summary and freezes everything into a [`RunResult`].
    pub fn seal(self, mode: RunMode, outcome: RunOutcome, fees_paid: f64) -> RunResult {
        let summary = self.summarize(fees_paid);
        RunResult {
            mode,
            outcome,
            equity_curve: self.equity_curve,
            trades: self.trades,
            failures: self.failures,
            summary,
        }
    }

    fn summarize(&self, fees_paid: f64) -> Summary {
        let final_equity = self.last_equity().unwrap_or(self.initial_balance);
        let net_profit = final_equity - self.initial_balance;

        let mut win_count = 0;
        let mut loss_count = 0;
        let mut breakeven_count = 0;
        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        for trade in &self.trades {
            match trade.outcome() {
                TradeOutcome::Win => {
                    win_count += 1;
                    gross_profit += trade.net_profit;
                }
                TradeOutcome::Loss => {
                    loss_count += 1;
                    gross_loss += trade.net_profit.abs();
                }
                TradeOutcome::Breakeven => breakeven_count += 1,
            }
        }

        let trade_count = self.trades.len();
        let win_rate_percent = if trade_count == 0 {
            0.0
        } else {
            win_count as f64 / trade_count as f64 * 100.0
        };
        let average_win = if win_count == 0 {
            0.0
        } else {
            gross_profit / win_count as f64
        };
        let average_loss = if loss_count == 0 {
            0.0
        } else {
            -gross_loss / loss_count as f64
        };
        let profit_factor = if gross_loss == 0.0 {
            if gross_profit > 0.0 { f64::INFINITY } else { 0.0 }
        } else {
            gross_profit / gross_loss
        };

        Summary {
            net_profit,
            net_profit_percent: net_profit / self.initial_balance * 100.0,
            max_drawdown_percent: self.max_drawdown_percent,
            win_rate_percent,
            average_win,
            average_loss,
            profit_factor,
            sharpe: self.sharpe(),
            trade_count,
            win_count,
            loss_count,
            breakeven_count,
            fees_paid,
        }
    }

    // Per-bar simple returns against the previous bar's equity, seeded with
    // the initial balance; population standard deviation.
    fn sharpe(&self) -> f64 {
        let mut returns = Vec::with_capacity(self.equity_curve.len());
        let mut previous = self.initial_balance;
        for point in &self.equity_curve {
            if previous > 0.0 {
                returns.push((point.equity - previous) / previous);
            }
            previous = point.equity;
        }
        if returns.is_empty() {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return 0.0;
        }
        mean / std_dev
    }
}

#[cfg(test)]
use crate::engine::{Fill, FillKind, FillReason, PositionSide};

#[cfg(test)]
fn trade_with_profit(net: f64) -> Trade {
    let entry = Fill {
        time: DateTime::default(),
        price: 100.0,
        quantity: 1.0,
        side: PositionSide::Long,
        kind: FillKind::Entry,
        reason: FillReason::Signal,
        fee: 0.0,
    };
    let exit = Fill {
        price: 100.0 + net,
        kind: FillKind::Exit,
        ..entry.clone()
    };
    Trade::new(entry, exit)
}

#[cfg(test)]
fn minute(index: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(index * 60, 0).unwrap()
}

#[cfg(test)]
#[test]
fn drawdown_from_synthetic_curve() {
    let mut collector = StatisticsCollector::new(100.0);
    for (index, equity) in [100.0, 120.0, 90.0, 130.0].into_iter().enumerate() {
        collector.record_equity(minute(index as i64), equity);
    }
    // peak 120 down to 90
    assert_eq!(collector.max_drawdown_percent(), 25.0);

    let result = collector.seal(RunMode::Backtest, RunOutcome::Completed, 0.0);
    assert_eq!(result.summary.max_drawdown_percent, 25.0);
    assert_eq!(result.summary.net_profit, 30.0);
    assert_eq!(result.summary.net_profit_percent, 30.0);
}

#[cfg(test)]
#[test]
fn zero_trade_run_is_fully_defined() {
    let mut collector = StatisticsCollector::new(1_000.0);
    collector.record_equity(minute(0), 1_000.0);
    collector.record_equity(minute(1), 1_000.0);

    let result = collector.seal(RunMode::Backtest, RunOutcome::Completed, 0.0);
    let summary = &result.summary;
    assert_eq!(summary.trade_count, 0);
    assert_eq!(summary.win_rate_percent, 0.0);
    assert_eq!(summary.net_profit, 0.0);
    assert_eq!(summary.profit_factor, 0.0);
    assert_eq!(summary.sharpe, 0.0);
    assert_eq!(summary.average_win, 0.0);
    assert_eq!(summary.average_loss, 0.0);
    assert!(summary.max_drawdown_percent.is_finite());
}

#[cfg(test)]
#[test]
fn empty_curve_seals_cleanly() {
    let collector = StatisticsCollector::new(500.0);
    let result = collector.seal(RunMode::Simulation, RunOutcome::Cancelled, 0.0);
    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert!(result.equity_curve.is_empty());
    assert_eq!(result.summary.net_profit, 0.0);
    assert_eq!(result.summary.max_drawdown_percent, 0.0);
}

#[cfg(test)]
#[test]
fn win_loss_accounting() {
    let mut collector = StatisticsCollector::new(1_000.0);
    for net in [10.0, -5.0, 20.0, 0.0] {
        collector.record_trade(trade_with_profit(net));
    }
    collector.record_equity(minute(0), 1_025.0);

    let summary = collector
        .seal(RunMode::Backtest, RunOutcome::Completed, 1.5)
        .summary;
    assert_eq!(summary.trade_count, 4);
    assert_eq!(summary.win_count, 2);
    assert_eq!(summary.loss_count, 1);
    assert_eq!(summary.breakeven_count, 1);
    assert_eq!(summary.win_rate_percent, 50.0);
    assert_eq!(summary.average_win, 15.0);
    assert_eq!(summary.average_loss, -5.0);
    assert_eq!(summary.profit_factor, 6.0);
    assert_eq!(summary.fees_paid, 1.5);
}

#[cfg(test)]
#[test]
fn profit_factor_without_losses_is_infinite() {
    let mut collector = StatisticsCollector::new(1_000.0);
    collector.record_trade(trade_with_profit(10.0));
    let summary = collector
        .seal(RunMode::Backtest, RunOutcome::Completed, 0.0)
        .summary;
    assert!(summary.profit_factor.is_infinite());
}

#[cfg(test)]
#[test]
fn flat_curve_sharpe_is_zero() {
    let mut collector = StatisticsCollector::new(100.0);
    for index in 0..5 {
        collector.record_equity(minute(index), 100.0);
    }
    let summary = collector
        .seal(RunMode::Backtest, RunOutcome::Completed, 0.0)
        .summary;
    assert_eq!(summary.sharpe, 0.0);
}

#[cfg(test)]
#[test]
fn failures_are_kept_verbatim() {
    let mut collector = StatisticsCollector::new(100.0);
    collector.record_failure(
        minute(3),
        &Error::InsufficientFunds {
            required: 50.0,
            available: 10.0,
        },
    );
    let result = collector.seal(RunMode::Live, RunOutcome::Completed, 0.0);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].time, minute(3));
    assert!(result.failures[0].error.contains("Insufficient funds"));
}
