#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use std::time::Duration;

/// When a signal-driven fill executes.
///
/// One policy value drives every mode of a run, so a backtest and the
/// simulation or live run it predicts always price their fills the same way.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillPolicy {
    /// Fill at the close of the bar that produced the signal.
    #[default]
    SignalClose,
    /// Queue the decision and fill at the open of the following bar.
    NextBarOpen,
}

/// How entry quantity is computed.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SizePolicy {
    /// Spend the whole cash balance on every entry.
    #[default]
    AllIn,
    /// A fixed quantity per entry.
    Quantity(f64),
    /// Spend this percentage of current equity per entry.
    EquityFraction(f64),
}

/// Everything one run is configured by.
///
/// Chain `with_*` setters off [`RunConfig::new`]; validation happens once,
/// before the first bar, when the config is handed to the engine.
///
/// ### Example
/// ```rust
/// use barloop::prelude::*;
///
/// let config = RunConfig::new(10_000.0)
///     .with_fee_percent(0.1)
///     .with_stop_loss_percent(5.0)
///     .with_trailing_stop_percent(3.0)
///     .with_sizing(SizePolicy::EquityFraction(50.0));
/// assert!(config.validate().is_ok());
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    initial_balance: f64,
    fee_percent: Option<f64>,
    fill_policy: FillPolicy,
    sizing: SizePolicy,
    stop_loss_percent: Option<f64>,
    take_profit_percent: Option<f64>,
    trailing_stop_percent: Option<f64>,
    max_drawdown_percent: Option<f64>,
    allow_short: bool,
    reentry_after_stop: Option<u32>,
    order_timeout: Duration,
}

impl RunConfig {
    /// Creates a config with the given starting balance and defaults
    /// everywhere else: signal-close fills, all-in sizing, no fees, no exit
    /// levels, shorts allowed, ten-second order timeout.
    pub fn new(initial_balance: f64) -> Self {
        Self {
            initial_balance,
            fee_percent: None,
            fill_policy: FillPolicy::default(),
            sizing: SizePolicy::default(),
            stop_loss_percent: None,
            take_profit_percent: None,
            trailing_stop_percent: None,
            max_drawdown_percent: None,
            allow_short: true,
            reentry_after_stop: None,
            order_timeout: Duration::from_secs(10),
        }
    }

    /// Taker fee charged on every fill's notional value, in percent.
    pub fn with_fee_percent(mut self, percent: f64) -> Self {
        self.fee_percent = Some(percent);
        self
    }

    /// When signal fills execute.
    pub fn with_fill_policy(mut self, policy: FillPolicy) -> Self {
        self.fill_policy = policy;
        self
    }

    /// How entry quantities are sized.
    pub fn with_sizing(mut self, sizing: SizePolicy) -> Self {
        self.sizing = sizing;
        self
    }

    /// Attach a stop-loss this far below (long) or above (short) the entry,
    /// in percent.
    pub fn with_stop_loss_percent(mut self, percent: f64) -> Self {
        self.stop_loss_percent = Some(percent);
        self
    }

    /// Attach a take-profit this far above (long) or below (short) the
    /// entry, in percent.
    pub fn with_take_profit_percent(mut self, percent: f64) -> Self {
        self.take_profit_percent = Some(percent);
        self
    }

    /// Attach a ratcheting trailing stop with this offset, in percent.
    pub fn with_trailing_stop_percent(mut self, percent: f64) -> Self {
        self.trailing_stop_percent = Some(percent);
        self
    }

    /// Halt the run once drawdown from the equity peak reaches this many
    /// percent.
    pub fn with_max_drawdown_percent(mut self, percent: f64) -> Self {
        self.max_drawdown_percent = Some(percent);
        self
    }

    /// Allow or forbid short positions. When forbidden, short entry signals
    /// are ignored and an opposite signal against a long only closes it.
    pub fn with_allow_short(mut self, allow: bool) -> Self {
        self.allow_short = allow;
        self
    }

    /// After a stop-out, suppress same-direction signal entries and instead
    /// re-enter automatically once price recovers past the stopped level,
    /// at most this many times per run.
    pub fn with_reentry_after_stop(mut self, times: u32) -> Self {
        self.reentry_after_stop = Some(times);
        self
    }

    /// How long the execution collaborator may take to resolve one order.
    pub fn with_order_timeout(mut self, timeout: Duration) -> Self {
        self.order_timeout = timeout;
        self
    }

    /// Starting balance.
    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Fee percent, if any.
    pub fn fee_percent(&self) -> Option<f64> {
        self.fee_percent
    }

    /// The configured fill policy.
    pub fn fill_policy(&self) -> FillPolicy {
        self.fill_policy
    }

    /// The configured sizing policy.
    pub fn sizing(&self) -> SizePolicy {
        self.sizing
    }

    /// Stop-loss distance in percent, if any.
    pub fn stop_loss_percent(&self) -> Option<f64> {
        self.stop_loss_percent
    }

    /// Take-profit distance in percent, if any.
    pub fn take_profit_percent(&self) -> Option<f64> {
        self.take_profit_percent
    }

    /// Trailing-stop offset in percent, if any.
    pub fn trailing_stop_percent(&self) -> Option<f64> {
        self.trailing_stop_percent
    }

    /// Drawdown halt threshold in percent, if any.
    pub fn max_drawdown_percent(&self) -> Option<f64> {
        self.max_drawdown_percent
    }

    /// Whether short positions are allowed.
    pub fn allow_short(&self) -> bool {
        self.allow_short
    }

    /// Stop-out re-entry budget, if the feature is on.
    pub fn reentry_after_stop(&self) -> Option<u32> {
        self.reentry_after_stop
    }

    /// Order resolution bound for the execution collaborator.
    pub fn order_timeout(&self) -> Duration {
        self.order_timeout
    }

    /// Checks every knob before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.initial_balance <= 0.0 {
            return Err(Error::NegZeroBalance(self.initial_balance));
        }
        if let Some(fee) = self.fee_percent
            && !(0.0..100.0).contains(&fee)
        {
            return Err(Error::PercentOutOfRange {
                name: "fee_percent",
                value: fee,
            });
        }
        for (value, name) in [
            (self.stop_loss_percent, "stop_loss_percent"),
            (self.trailing_stop_percent, "trailing_stop_percent"),
        ] {
            if let Some(percent) = value
                && !(percent > 0.0 && percent < 100.0)
            {
                return Err(Error::PercentOutOfRange {
                    name,
                    value: percent,
                });
            }
        }
        if let Some(percent) = self.take_profit_percent
            && percent <= 0.0
        {
            return Err(Error::PercentOutOfRange {
                name: "take_profit_percent",
                value: percent,
            });
        }
        if let Some(percent) = self.max_drawdown_percent
            && !(percent > 0.0 && percent <= 100.0)
        {
            return Err(Error::PercentOutOfRange {
                name: "max_drawdown_percent",
                value: percent,
            });
        }
        match self.sizing {
            SizePolicy::AllIn => {}
            SizePolicy::Quantity(qty) => {
                if !(qty.is_finite() && qty > 0.0) {
                    return Err(Error::PercentOutOfRange {
                        name: "sizing quantity",
                        value: qty,
                    });
                }
            }
            SizePolicy::EquityFraction(percent) => {
                if !(percent > 0.0 && percent <= 100.0) {
                    return Err(Error::PercentOutOfRange {
                        name: "sizing equity fraction",
                        value: percent,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[test]
fn defaults_are_valid() {
    let config = RunConfig::new(1_000.0);
    config.validate().unwrap();
    assert_eq!(config.fill_policy(), FillPolicy::SignalClose);
    assert_eq!(config.sizing(), SizePolicy::AllIn);
    assert!(config.allow_short());
    assert!(config.fee_percent().is_none());
}

#[cfg(test)]
#[test]
fn non_positive_balance_is_rejected() {
    assert!(matches!(
        RunConfig::new(0.0).validate(),
        Err(Error::NegZeroBalance(_))
    ));
}

#[cfg(test)]
#[test]
fn out_of_range_percents_are_rejected() {
    let bad = [
        RunConfig::new(100.0).with_fee_percent(100.0),
        RunConfig::new(100.0).with_fee_percent(-1.0),
        RunConfig::new(100.0).with_stop_loss_percent(0.0),
        RunConfig::new(100.0).with_stop_loss_percent(150.0),
        RunConfig::new(100.0).with_take_profit_percent(-3.0),
        RunConfig::new(100.0).with_trailing_stop_percent(100.0),
        RunConfig::new(100.0).with_max_drawdown_percent(0.0),
        RunConfig::new(100.0).with_sizing(SizePolicy::Quantity(-1.0)),
        RunConfig::new(100.0).with_sizing(SizePolicy::EquityFraction(0.0)),
    ];
    for config in bad {
        assert!(
            matches!(config.validate(), Err(Error::PercentOutOfRange { .. })),
            "{config:?} should be rejected"
        );
    }
}

#[cfg(test)]
#[test]
fn generous_take_profit_is_fine() {
    // a take-profit far above entry is legitimate
    RunConfig::new(100.0)
        .with_take_profit_percent(400.0)
        .validate()
        .unwrap();
}
