#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Percent;
use chrono::{DateTime, Duration, Utc};

/// Which way a position points.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    /// Bought first, sells to close.
    Long,
    /// Sold first, buys back to close.
    Short,
}

/// Why a fill happened.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillReason {
    /// The strategy asked for it.
    Signal,
    /// The stop-loss level was crossed.
    StopLoss,
    /// The take-profit level was crossed.
    TakeProfit,
    /// The trailing-stop level was crossed.
    TrailingStop,
    /// The run ended while the position was open.
    ForcedExit,
}

impl std::fmt::Display for FillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Signal => "signal",
            Self::StopLoss => "stop loss",
            Self::TakeProfit => "take profit",
            Self::TrailingStop => "trailing stop",
            Self::ForcedExit => "forced exit",
        };
        write!(f, "{label}")
    }
}

/// Whether a fill opened or closed the position.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillKind {
    /// Opened the position.
    Entry,
    /// Closed the position.
    Exit,
}

/// The record of one executed entry or exit.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    /// When the fill executed.
    pub time: DateTime<Utc>,
    /// Executed price.
    pub price: f64,
    /// Executed quantity. Always the full position size; there are no
    /// partial fills.
    pub quantity: f64,
    /// Side of the position this fill belongs to.
    pub side: PositionSide,
    /// Entry or exit.
    pub kind: FillKind,
    /// Why it happened.
    pub reason: FillReason,
    /// Fee charged on this fill's notional value.
    pub fee: f64,
}

/// Ratcheting trailing stop attached to a position.
///
/// The watermark tracks the most favorable price seen since entry; the
/// trigger level stays `offset_percent` away from it and never loosens.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStop {
    offset_percent: f64,
    watermark: f64,
}

impl TrailingStop {
    pub(crate) fn new(offset_percent: f64, entry_price: f64) -> Self {
        Self {
            offset_percent,
            watermark: entry_price,
        }
    }

    /// Distance of the trigger from the watermark, in percent.
    pub fn offset_percent(&self) -> f64 {
        self.offset_percent
    }

    /// Most favorable price seen since entry.
    pub fn watermark(&self) -> f64 {
        self.watermark
    }

    /// Current trigger level for the given side.
    pub fn level(&self, side: PositionSide) -> f64 {
        match side {
            PositionSide::Long => self.watermark.sub_percent(self.offset_percent),
            PositionSide::Short => self.watermark.add_percent(self.offset_percent),
        }
    }

    /// Moves the watermark to `extreme` if that is favorable for the side;
    /// unfavorable updates are ignored.
    pub(crate) fn ratchet(&mut self, side: PositionSide, extreme: f64) {
        match side {
            PositionSide::Long => {
                if extreme > self.watermark {
                    self.watermark = extreme;
                }
            }
            PositionSide::Short => {
                if extreme < self.watermark {
                    self.watermark = extreme;
                }
            }
        }
    }
}

/// One open position with its attached exit levels.
///
/// Owned by the position manager; everything mutable is `pub(crate)` so the
/// state machine is the only writer.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    side: PositionSide,
    entry_price: f64,
    entry_time: DateTime<Utc>,
    quantity: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    trailing: Option<TrailingStop>,
}

impl Position {
    pub(crate) fn new(
        side: PositionSide,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        quantity: f64,
    ) -> Self {
        Self {
            side,
            entry_price,
            entry_time,
            quantity,
            stop_loss: None,
            take_profit: None,
            trailing: None,
        }
    }

    pub(crate) fn with_stop_loss(mut self, level: f64) -> Self {
        self.stop_loss = Some(level);
        self
    }

    pub(crate) fn with_take_profit(mut self, level: f64) -> Self {
        self.take_profit = Some(level);
        self
    }

    pub(crate) fn with_trailing(mut self, offset_percent: f64) -> Self {
        self.trailing = Some(TrailingStop::new(offset_percent, self.entry_price));
        self
    }

    /// Which way the position points.
    pub fn side(&self) -> PositionSide {
        self.side
    }

    /// Price the position was entered at.
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    /// When the position was entered.
    pub fn entry_time(&self) -> DateTime<Utc> {
        self.entry_time
    }

    /// Position size.
    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Attached stop-loss level, if any.
    pub fn stop_loss(&self) -> Option<f64> {
        self.stop_loss
    }

    /// Attached take-profit level, if any.
    pub fn take_profit(&self) -> Option<f64> {
        self.take_profit
    }

    /// Attached trailing stop, if any.
    pub fn trailing(&self) -> Option<&TrailingStop> {
        self.trailing.as_ref()
    }

    /// Unrealized profit at the given price, before fees.
    pub fn unrealized(&self, price: f64) -> f64 {
        match self.side {
            PositionSide::Long => (price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - price) * self.quantity,
        }
    }

    pub(crate) fn ratchet_trailing(&mut self, extreme: f64) {
        let side = self.side;
        if let Some(trailing) = &mut self.trailing {
            trailing.ratchet(side, extreme);
        }
    }
}

/// How a closed trade turned out, by net profit sign.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    /// Positive net profit.
    Win,
    /// Negative net profit.
    Loss,
    /// Exactly zero net profit.
    Breakeven,
}

/// One closed round trip: an entry fill paired with its exit fill.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Side the round trip was taken on.
    pub side: PositionSide,
    /// The opening fill.
    pub entry: Fill,
    /// The closing fill.
    pub exit: Fill,
    /// Realized profit with both fills' fees deducted.
    pub net_profit: f64,
}

impl Trade {
    pub(crate) fn new(entry: Fill, exit: Fill) -> Self {
        let side = entry.side;
        let gross = match side {
            PositionSide::Long => (exit.price - entry.price) * entry.quantity,
            PositionSide::Short => (entry.price - exit.price) * entry.quantity,
        };
        Self {
            side,
            net_profit: gross - entry.fee - exit.fee,
            entry,
            exit,
        }
    }

    /// Win, loss or breakeven by net profit sign.
    pub fn outcome(&self) -> TradeOutcome {
        if self.net_profit > 0.0 {
            TradeOutcome::Win
        } else if self.net_profit < 0.0 {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        }
    }

    /// Time between entry and exit fills.
    pub fn duration(&self) -> Duration {
        self.exit.time - self.entry.time
    }

    /// Net profit as a percentage of the entry notional.
    pub fn net_profit_percent(&self) -> f64 {
        self.net_profit / (self.entry.price * self.entry.quantity) * 100.0
    }
}

#[cfg(test)]
fn fill(kind: FillKind, side: PositionSide, price: f64, minute: i64, fee: f64) -> Fill {
    Fill {
        time: DateTime::from_timestamp(minute * 60, 0).unwrap(),
        price,
        quantity: 2.0,
        side,
        kind,
        reason: if kind == FillKind::Entry {
            FillReason::Signal
        } else {
            FillReason::StopLoss
        },
        fee,
    }
}

#[cfg(test)]
#[test]
fn trailing_ratchets_up_for_long() {
    let mut position =
        Position::new(PositionSide::Long, 100.0, DateTime::default(), 1.0).with_trailing(5.0);

    assert_eq!(position.trailing().unwrap().level(PositionSide::Long), 95.0);

    // favorable move tightens the level
    position.ratchet_trailing(120.0);
    assert_eq!(position.trailing().unwrap().watermark(), 120.0);
    assert_eq!(position.trailing().unwrap().level(PositionSide::Long), 114.0);

    // adverse move never loosens it
    position.ratchet_trailing(90.0);
    assert_eq!(position.trailing().unwrap().watermark(), 120.0);
}

#[cfg(test)]
#[test]
fn trailing_ratchets_down_for_short() {
    let mut position =
        Position::new(PositionSide::Short, 100.0, DateTime::default(), 1.0).with_trailing(5.0);

    assert_eq!(position.trailing().unwrap().level(PositionSide::Short), 105.0);

    position.ratchet_trailing(80.0);
    assert_eq!(position.trailing().unwrap().watermark(), 80.0);
    assert_eq!(position.trailing().unwrap().level(PositionSide::Short), 84.0);

    position.ratchet_trailing(130.0);
    assert_eq!(position.trailing().unwrap().watermark(), 80.0);
}

#[cfg(test)]
#[test]
fn unrealized_profit_by_side() {
    let long = Position::new(PositionSide::Long, 100.0, DateTime::default(), 2.0);
    assert_eq!(long.unrealized(110.0), 20.0);
    assert_eq!(long.unrealized(95.0), -10.0);

    let short = Position::new(PositionSide::Short, 100.0, DateTime::default(), 2.0);
    assert_eq!(short.unrealized(110.0), -20.0);
    assert_eq!(short.unrealized(95.0), 10.0);
}

#[cfg(test)]
#[test]
fn trade_net_profit_long_with_fees() {
    let entry = fill(FillKind::Entry, PositionSide::Long, 100.0, 0, 0.5);
    let exit = fill(FillKind::Exit, PositionSide::Long, 110.0, 3, 0.5);
    let trade = Trade::new(entry, exit);

    // gross (110 - 100) * 2 = 20, minus 1.0 in fees
    assert_eq!(trade.net_profit, 19.0);
    assert_eq!(trade.outcome(), TradeOutcome::Win);
    assert_eq!(trade.duration(), Duration::minutes(3));
    assert_eq!(trade.net_profit_percent(), 9.5);
}

#[cfg(test)]
#[test]
fn trade_net_profit_short() {
    let entry = fill(FillKind::Entry, PositionSide::Short, 100.0, 0, 0.0);
    let exit = fill(FillKind::Exit, PositionSide::Short, 90.0, 1, 0.0);
    let trade = Trade::new(entry, exit);

    assert_eq!(trade.net_profit, 20.0);
    assert_eq!(trade.outcome(), TradeOutcome::Win);

    let entry = fill(FillKind::Entry, PositionSide::Short, 100.0, 0, 0.0);
    let exit = fill(FillKind::Exit, PositionSide::Short, 104.0, 1, 0.0);
    let trade = Trade::new(entry, exit);
    assert_eq!(trade.net_profit, -8.0);
    assert_eq!(trade.outcome(), TradeOutcome::Loss);
}

#[cfg(test)]
#[test]
fn breakeven_trade() {
    let entry = fill(FillKind::Entry, PositionSide::Long, 100.0, 0, 0.0);
    let exit = fill(FillKind::Exit, PositionSide::Long, 100.0, 1, 0.0);
    let trade = Trade::new(entry, exit);
    assert_eq!(trade.net_profit, 0.0);
    assert_eq!(trade.outcome(), TradeOutcome::Breakeven);
}
