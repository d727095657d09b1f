use super::{
    Account, Bar, ExecutedFill, Fill, FillKind, FillReason, OrderExecution, OrderRequest, Position,
    PositionSide, RunConfig, SizePolicy, Trade,
};
use crate::Percent;
use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

// Armed after a stop-out when re-entry is configured: same-direction signal
// entries are suppressed until price recovers past `level`.
#[derive(Debug, Clone)]
struct StopRecord {
    side: PositionSide,
    level: f64,
}

/// The FLAT / LONG / SHORT state machine of one run.
///
/// Owns the account and the open position; every transition runs through
/// here. Entries size themselves per the configured policy, attach the
/// configured exit levels, and route through the order-execution
/// collaborator, whose errors fail the tick rather than the run and leave
/// the state untouched. At most one position is open at any instant and
/// there are no partial fills.
pub struct PositionManager {
    account: Account,
    open: Option<(Position, Fill)>,
    stopped: Option<StopRecord>,
    reentries_left: u32,
}

impl PositionManager {
    /// Creates a flat manager funded per the config.
    pub fn new(config: &RunConfig) -> Result<Self> {
        Ok(Self {
            account: Account::new(config.initial_balance())?,
            open: None,
            stopped: None,
            reentries_left: config.reentry_after_stop().unwrap_or(0),
        })
    }

    /// The account backing this run.
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// The open position, if any.
    pub fn position(&self) -> Option<&Position> {
        self.open.as_ref().map(|(position, _)| position)
    }

    /// Side of the open position, if any.
    pub fn side(&self) -> Option<PositionSide> {
        self.position().map(Position::side)
    }

    /// Whether nothing is open.
    pub fn is_flat(&self) -> bool {
        self.open.is_none()
    }

    /// Mark-to-market equity at the given price.
    pub fn equity(&self, price: f64) -> f64 {
        self.account.equity(price)
    }

    /// Opens a position at `price` for the strategy's reason.
    ///
    /// Returns `Ok(None)` when the entry is suppressed because a stop-out
    /// in the same direction is still armed for re-entry; an entry against
    /// the armed direction disarms it and proceeds.
    pub(crate) fn enter(
        &mut self,
        side: PositionSide,
        price: f64,
        time: DateTime<Utc>,
        config: &RunConfig,
        executor: &mut dyn OrderExecution,
    ) -> Result<Option<Fill>> {
        if let Some(stopped) = &self.stopped {
            if stopped.side == side {
                return Ok(None);
            }
            self.stopped = None;
        }
        self.open_position(side, price, time, config, executor).map(Some)
    }

    /// Re-enters after a stop-out once price recovers past the stopped
    /// level: above it for a stopped long, below it for a stopped short.
    /// Consumes one unit of the re-entry budget on success only.
    pub(crate) fn try_reentry(
        &mut self,
        bar: &Bar,
        config: &RunConfig,
        executor: &mut dyn OrderExecution,
    ) -> Result<Option<Fill>> {
        if self.open.is_some() || self.reentries_left == 0 {
            return Ok(None);
        }
        let Some(stopped) = self.stopped.clone() else {
            return Ok(None);
        };
        let recovered = match stopped.side {
            PositionSide::Long => bar.close() > stopped.level,
            PositionSide::Short => bar.close() < stopped.level,
        };
        if !recovered {
            return Ok(None);
        }

        let fill = self.open_position(
            stopped.side,
            bar.close(),
            bar.close_time(),
            config,
            executor,
        )?;
        self.reentries_left -= 1;
        self.stopped = None;
        debug!(side = ?stopped.side, price = fill.price, "re-entered after stop-out");
        Ok(Some(fill))
    }

    /// Closes the open position at `price` and records the round trip.
    /// A stop-loss or trailing-stop close arms re-entry when configured.
    pub(crate) fn close(
        &mut self,
        price: f64,
        time: DateTime<Utc>,
        reason: FillReason,
        config: &RunConfig,
        executor: &mut dyn OrderExecution,
    ) -> Result<(Fill, Trade)> {
        let Some((position, _)) = &self.open else {
            return Err(Error::Unreachable("closing with no open position".into()));
        };
        let side = position.side();
        let quantity = position.quantity();

        let request = OrderRequest {
            side,
            kind: FillKind::Exit,
            quantity,
            price,
            reason,
            time,
        };
        let executed = executor.place_order(&request, config.order_timeout())?;
        let fee_percent = config.fee_percent().unwrap_or(0.0);
        let fee = match side {
            PositionSide::Long => self.account.close_long(executed.price, quantity, fee_percent)?,
            PositionSide::Short => {
                self.account.close_short(executed.price, quantity, fee_percent)?
            }
        };

        let (_, entry) = self.open.take().ok_or_else(|| {
            Error::Unreachable("open position vanished mid-close".into())
        })?;
        let exit = Fill {
            time,
            price: executed.price,
            quantity,
            side,
            kind: FillKind::Exit,
            reason,
            fee,
        };
        let trade = Trade::new(entry, exit.clone());

        if matches!(reason, FillReason::StopLoss | FillReason::TrailingStop)
            && config.reentry_after_stop().is_some()
            && self.reentries_left > 0
        {
            self.stopped = Some(StopRecord {
                side,
                level: executed.price,
            });
        }

        debug!(
            side = ?side,
            price = executed.price,
            %reason,
            net_profit = trade.net_profit,
            "closed position"
        );
        Ok((exit, trade))
    }

    /// Checks the open position's exit levels against the bar's range and
    /// force-closes at the first triggered level. Take-profit is consulted
    /// first, then stop-loss, then the trailing stop; when nothing fires
    /// the trailing watermark ratchets to the bar's favorable extreme.
    pub(crate) fn check_exits(
        &mut self,
        bar: &Bar,
        config: &RunConfig,
        executor: &mut dyn OrderExecution,
    ) -> Result<Option<(Fill, Trade)>> {
        let triggered = {
            let Some((position, _)) = &mut self.open else {
                return Ok(None);
            };
            match position.side() {
                PositionSide::Long => {
                    if let Some(level) = position.take_profit()
                        && bar.high() >= level
                    {
                        Some((level, FillReason::TakeProfit))
                    } else if let Some(level) = position.stop_loss()
                        && bar.low() <= level
                    {
                        Some((level, FillReason::StopLoss))
                    } else if let Some(level) =
                        position.trailing().map(|t| t.level(PositionSide::Long))
                    {
                        if bar.low() <= level {
                            Some((level, FillReason::TrailingStop))
                        } else {
                            position.ratchet_trailing(bar.high());
                            None
                        }
                    } else {
                        None
                    }
                }
                PositionSide::Short => {
                    if let Some(level) = position.take_profit()
                        && bar.low() <= level
                    {
                        Some((level, FillReason::TakeProfit))
                    } else if let Some(level) = position.stop_loss()
                        && bar.high() >= level
                    {
                        Some((level, FillReason::StopLoss))
                    } else if let Some(level) =
                        position.trailing().map(|t| t.level(PositionSide::Short))
                    {
                        if bar.high() >= level {
                            Some((level, FillReason::TrailingStop))
                        } else {
                            position.ratchet_trailing(bar.low());
                            None
                        }
                    } else {
                        None
                    }
                }
            }
        };

        match triggered {
            Some((level, reason)) => self
                .close(level, bar.open_time(), reason, config, executor)
                .map(Some),
            None => Ok(None),
        }
    }

    /// Closes whatever is open at the run's final price.
    pub(crate) fn forced_exit(
        &mut self,
        price: f64,
        time: DateTime<Utc>,
        config: &RunConfig,
        executor: &mut dyn OrderExecution,
    ) -> Result<Option<(Fill, Trade)>> {
        if self.open.is_none() {
            return Ok(None);
        }
        self.close(price, time, FillReason::ForcedExit, config, executor)
            .map(Some)
    }

    fn open_position(
        &mut self,
        side: PositionSide,
        price: f64,
        time: DateTime<Utc>,
        config: &RunConfig,
        executor: &mut dyn OrderExecution,
    ) -> Result<Fill> {
        if self.open.is_some() {
            return Err(Error::Unreachable("entering while a position is open".into()));
        }
        let fee_percent = config.fee_percent().unwrap_or(0.0);
        let quantity = self.entry_quantity(config.sizing(), price, fee_percent);
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(Error::InsufficientFunds {
                required: price,
                available: self.account.cash(),
            });
        }

        let request = OrderRequest {
            side,
            kind: FillKind::Entry,
            quantity,
            price,
            reason: FillReason::Signal,
            time,
        };
        let ExecutedFill { price: fill_price } =
            executor.place_order(&request, config.order_timeout())?;
        let fee = match side {
            PositionSide::Long => self.account.open_long(fill_price, quantity, fee_percent)?,
            PositionSide::Short => self.account.open_short(fill_price, quantity, fee_percent)?,
        };

        let mut position = Position::new(side, fill_price, time, quantity);
        if let Some(percent) = config.stop_loss_percent() {
            position = position.with_stop_loss(match side {
                PositionSide::Long => fill_price.sub_percent(percent),
                PositionSide::Short => fill_price.add_percent(percent),
            });
        }
        if let Some(percent) = config.take_profit_percent() {
            position = position.with_take_profit(match side {
                PositionSide::Long => fill_price.add_percent(percent),
                PositionSide::Short => fill_price.sub_percent(percent),
            });
        }
        if let Some(percent) = config.trailing_stop_percent() {
            position = position.with_trailing(percent);
        }

        let fill = Fill {
            time,
            price: fill_price,
            quantity,
            side,
            kind: FillKind::Entry,
            reason: FillReason::Signal,
            fee,
        };
        self.open = Some((position, fill.clone()));
        debug!(side = ?side, price = fill_price, quantity, "opened position");
        Ok(fill)
    }

    // Entries only happen from flat, where equity equals cash; the fee is
    // budgeted into the quantity so an all-in entry never overdraws.
    fn entry_quantity(&self, sizing: SizePolicy, price: f64, fee_percent: f64) -> f64 {
        let budget = match sizing {
            SizePolicy::AllIn => self.account.cash(),
            SizePolicy::Quantity(quantity) => return quantity,
            SizePolicy::EquityFraction(percent) => self.account.equity(price) * percent / 100.0,
        };
        budget / (price * (1.0 + fee_percent / 100.0))
    }
}

#[cfg(test)]
use super::{BarBuilder, SyntheticExecution};

#[cfg(test)]
fn bar(minute: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    BarBuilder::new()
        .open(open)
        .high(high)
        .low(low)
        .close(close)
        .volume(1.0)
        .open_time(DateTime::from_timestamp(minute * 60, 0).unwrap())
        .close_time(DateTime::from_timestamp(minute * 60 + 59, 0).unwrap())
        .build()
        .unwrap()
}

#[cfg(test)]
fn enter_long_at(
    manager: &mut PositionManager,
    price: f64,
    config: &RunConfig,
) -> Option<Fill> {
    manager
        .enter(
            PositionSide::Long,
            price,
            DateTime::default(),
            config,
            &mut SyntheticExecution,
        )
        .unwrap()
}

#[cfg(test)]
#[test]
fn entry_attaches_configured_levels() {
    let config = RunConfig::new(1_000.0)
        .with_stop_loss_percent(10.0)
        .with_take_profit_percent(20.0)
        .with_trailing_stop_percent(5.0)
        .with_sizing(SizePolicy::Quantity(2.0));
    let mut manager = PositionManager::new(&config).unwrap();

    enter_long_at(&mut manager, 100.0, &config).unwrap();
    let position = manager.position().unwrap();
    assert_eq!(position.stop_loss(), Some(90.0));
    assert_eq!(position.take_profit(), Some(120.0));
    assert_eq!(position.trailing().unwrap().watermark(), 100.0);
    assert_eq!(position.quantity(), 2.0);

    let mut manager = PositionManager::new(&config).unwrap();
    manager
        .enter(
            PositionSide::Short,
            100.0,
            DateTime::default(),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();
    let position = manager.position().unwrap();
    assert_eq!(position.stop_loss(), Some(110.0));
    assert_eq!(position.take_profit(), Some(80.0));
}

#[cfg(test)]
#[test]
fn all_in_sizing_budgets_the_fee() {
    let config = RunConfig::new(1_000.0).with_fee_percent(1.0);
    let mut manager = PositionManager::new(&config).unwrap();

    let fill = enter_long_at(&mut manager, 100.0, &config).unwrap();
    // qty = 1000 / (100 * 1.01); cost + fee spends the whole balance
    assert!((fill.quantity - 1_000.0 / 101.0).abs() < 1e-12);
    assert!(manager.account().cash().abs() < 1e-9);
    assert!(manager.account().fees_paid() > 0.0);
}

#[cfg(test)]
#[test]
fn equity_fraction_sizing() {
    let config = RunConfig::new(1_000.0).with_sizing(SizePolicy::EquityFraction(50.0));
    let mut manager = PositionManager::new(&config).unwrap();

    let fill = enter_long_at(&mut manager, 100.0, &config).unwrap();
    assert_eq!(fill.quantity, 5.0);
    assert_eq!(manager.account().cash(), 500.0);
}

#[cfg(test)]
#[test]
fn fixed_quantity_beyond_cash_is_recoverable() {
    let config = RunConfig::new(100.0).with_sizing(SizePolicy::Quantity(5.0));
    let mut manager = PositionManager::new(&config).unwrap();

    let err = manager
        .enter(
            PositionSide::Long,
            100.0,
            DateTime::default(),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap_err();
    assert!(err.is_execution_failure());
    assert!(manager.is_flat());
    assert_eq!(manager.account().cash(), 100.0);
}

#[cfg(test)]
#[test]
fn take_profit_wins_when_a_bar_spans_both_levels() {
    let config = RunConfig::new(1_000.0)
        .with_stop_loss_percent(10.0)
        .with_take_profit_percent(20.0)
        .with_sizing(SizePolicy::Quantity(1.0));
    let mut manager = PositionManager::new(&config).unwrap();
    enter_long_at(&mut manager, 100.0, &config).unwrap();

    // high 125 crosses the take-profit, low 85 crosses the stop
    let (fill, trade) = manager
        .check_exits(
            &bar(1, 100.0, 125.0, 85.0, 110.0),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();
    assert_eq!(fill.reason, FillReason::TakeProfit);
    assert_eq!(fill.price, 120.0);
    assert_eq!(trade.net_profit, 20.0);
    assert!(manager.is_flat());
}

#[cfg(test)]
#[test]
fn stop_loss_fills_at_its_level_not_the_close() {
    let config = RunConfig::new(1_000.0)
        .with_stop_loss_percent(10.0)
        .with_sizing(SizePolicy::Quantity(1.0));
    let mut manager = PositionManager::new(&config).unwrap();
    enter_long_at(&mut manager, 100.0, &config).unwrap();

    let (fill, trade) = manager
        .check_exits(
            &bar(1, 95.0, 96.0, 80.0, 82.0),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();
    assert_eq!(fill.reason, FillReason::StopLoss);
    assert_eq!(fill.price, 90.0);
    assert_eq!(trade.net_profit, -10.0);
}

#[cfg(test)]
#[test]
fn trailing_stop_triggers_before_it_ratchets() {
    let config = RunConfig::new(1_000.0)
        .with_trailing_stop_percent(10.0)
        .with_sizing(SizePolicy::Quantity(1.0));
    let mut manager = PositionManager::new(&config).unwrap();
    enter_long_at(&mut manager, 100.0, &config).unwrap();

    // level 90 untouched; watermark ratchets to the high
    assert!(
        manager
            .check_exits(
                &bar(1, 100.0, 120.0, 98.0, 118.0),
                &config,
                &mut SyntheticExecution
            )
            .unwrap()
            .is_none()
    );
    assert_eq!(
        manager.position().unwrap().trailing().unwrap().watermark(),
        120.0
    );

    // level is now 108; this bar's low crosses it before its high could
    // have ratcheted further
    let (fill, _) = manager
        .check_exits(
            &bar(2, 118.0, 140.0, 105.0, 106.0),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();
    assert_eq!(fill.reason, FillReason::TrailingStop);
    assert_eq!(fill.price, 108.0);
}

#[cfg(test)]
#[test]
fn short_exit_levels_mirror() {
    let config = RunConfig::new(1_000.0)
        .with_stop_loss_percent(10.0)
        .with_sizing(SizePolicy::Quantity(1.0));
    let mut manager = PositionManager::new(&config).unwrap();
    manager
        .enter(
            PositionSide::Short,
            100.0,
            DateTime::default(),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();

    // stop at 110; a rally through it closes the short at a loss
    let (fill, trade) = manager
        .check_exits(
            &bar(1, 100.0, 115.0, 99.0, 112.0),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();
    assert_eq!(fill.reason, FillReason::StopLoss);
    assert_eq!(fill.price, 110.0);
    assert_eq!(trade.net_profit, -10.0);
}

#[cfg(test)]
#[test]
fn stop_out_arms_suppression_and_reentry() {
    let config = RunConfig::new(1_000.0)
        .with_stop_loss_percent(10.0)
        .with_reentry_after_stop(1)
        .with_sizing(SizePolicy::Quantity(1.0));
    let mut manager = PositionManager::new(&config).unwrap();
    enter_long_at(&mut manager, 100.0, &config).unwrap();

    // stop out at 90
    manager
        .check_exits(
            &bar(1, 95.0, 96.0, 85.0, 88.0),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();

    // same-direction signal entries are suppressed while armed
    assert!(enter_long_at(&mut manager, 89.0, &config).is_none());
    assert!(manager.is_flat());

    // no recovery yet: close below the stopped level
    assert!(
        manager
            .try_reentry(&bar(2, 88.0, 89.5, 87.0, 89.0), &config, &mut SyntheticExecution)
            .unwrap()
            .is_none()
    );

    // close recovers past 90: the manager re-enters on its own
    let fill = manager
        .try_reentry(&bar(3, 89.0, 92.0, 89.0, 91.5), &config, &mut SyntheticExecution)
        .unwrap()
        .unwrap();
    assert_eq!(fill.price, 91.5);
    assert_eq!(manager.side(), Some(PositionSide::Long));

    // budget spent: the next stop-out does not arm again
    manager
        .check_exits(
            &bar(4, 90.0, 91.0, 80.0, 81.0),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();
    assert!(enter_long_at(&mut manager, 82.0, &config).is_some());
}

#[cfg(test)]
#[test]
fn opposite_entry_disarms_suppression() {
    let config = RunConfig::new(1_000.0)
        .with_stop_loss_percent(10.0)
        .with_reentry_after_stop(2)
        .with_sizing(SizePolicy::Quantity(1.0));
    let mut manager = PositionManager::new(&config).unwrap();
    enter_long_at(&mut manager, 100.0, &config).unwrap();
    manager
        .check_exits(
            &bar(1, 95.0, 96.0, 85.0, 88.0),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();

    // a short right here is the strategy changing its mind; it proceeds
    let fill = manager
        .enter(
            PositionSide::Short,
            88.0,
            DateTime::default(),
            &config,
            &mut SyntheticExecution,
        )
        .unwrap()
        .unwrap();
    assert_eq!(fill.side, PositionSide::Short);

    // and the old suppression is gone
    manager
        .close(
            88.0,
            DateTime::default(),
            FillReason::Signal,
            &config,
            &mut SyntheticExecution,
        )
        .unwrap();
    assert!(enter_long_at(&mut manager, 95.0, &config).is_some());
}

#[cfg(test)]
#[test]
fn forced_exit_closes_at_the_given_price() {
    let config = RunConfig::new(1_000.0).with_sizing(SizePolicy::Quantity(2.0));
    let mut manager = PositionManager::new(&config).unwrap();
    assert!(
        manager
            .forced_exit(50.0, DateTime::default(), &config, &mut SyntheticExecution)
            .unwrap()
            .is_none()
    );

    enter_long_at(&mut manager, 100.0, &config).unwrap();
    let (fill, trade) = manager
        .forced_exit(104.0, DateTime::default(), &config, &mut SyntheticExecution)
        .unwrap()
        .unwrap();
    assert_eq!(fill.reason, FillReason::ForcedExit);
    assert_eq!(trade.net_profit, 8.0);
    assert!(manager.is_flat());
}

#[cfg(test)]
#[test]
fn failed_execution_leaves_state_untouched() {
    struct Rejecting;
    impl OrderExecution for Rejecting {
        fn place_order(
            &mut self,
            _request: &OrderRequest,
            _timeout: std::time::Duration,
        ) -> Result<ExecutedFill> {
            Err(Error::OrderRejected("exchange is down".into()))
        }
    }

    let config = RunConfig::new(1_000.0).with_sizing(SizePolicy::Quantity(1.0));
    let mut manager = PositionManager::new(&config).unwrap();

    let err = manager
        .enter(
            PositionSide::Long,
            100.0,
            DateTime::default(),
            &config,
            &mut Rejecting,
        )
        .unwrap_err();
    assert!(err.is_execution_failure());
    assert!(manager.is_flat());
    assert_eq!(manager.account().cash(), 1_000.0);

    // same for exits: the position stays open
    enter_long_at(&mut manager, 100.0, &config).unwrap();
    let err = manager
        .close(
            110.0,
            DateTime::default(),
            FillReason::Signal,
            &config,
            &mut Rejecting,
        )
        .unwrap_err();
    assert!(err.is_execution_failure());
    assert_eq!(manager.side(), Some(PositionSide::Long));
}
