//! Whole-run coverage of the engine pipeline across all three modes.

use crate::prelude::*;
use chrono::DateTime;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

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

fn flat_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| bar(i as i64, close, close, close, close))
        .collect()
}

fn enter_long_once(ctx: &SignalContext) -> Decision {
    if ctx.position.is_none() {
        Decision::EnterLong
    } else {
        Decision::Hold
    }
}

fn enter_short_once(ctx: &SignalContext) -> Decision {
    if ctx.position.is_none() {
        Decision::EnterShort
    } else {
        Decision::Hold
    }
}

fn flip_after_long(ctx: &SignalContext) -> Decision {
    match ctx.position {
        None => Decision::EnterLong,
        Some(position) if position.side() == PositionSide::Long => Decision::EnterShort,
        Some(_) => Decision::Hold,
    }
}

#[test]
fn ma_crossover_round_trip() {
    let bars: Vec<Bar> = (0..5)
        .map(|i| {
            let open = 100.0 + f64::from(i);
            bar(i64::from(i), open, open + 1.0, open - 1.0, open + 0.5)
        })
        .collect();
    let strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 2, 3).unwrap();
    let engine = EngineLoop::new(RunConfig::new(10_000.0)).unwrap();
    let result = engine.backtest(bars, &strategy).unwrap();

    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.mode, RunMode::Backtest);
    assert_eq!(result.equity_curve.len(), 5);
    assert_eq!(result.trades.len(), 1);

    // the fast average overtakes the slow one on the third bar
    let trade = &result.trades[0];
    assert_eq!(trade.entry.price, 102.5);
    assert_eq!(trade.entry.reason, FillReason::Signal);
    assert_eq!(trade.entry.kind, FillKind::Entry);
    assert_eq!(trade.exit.price, 104.5);
    assert_eq!(trade.exit.reason, FillReason::ForcedExit);
    assert_eq!(trade.exit.kind, FillKind::Exit);

    let quantity = 10_000.0 / 102.5;
    assert!((result.summary.net_profit - quantity * 2.0).abs() < 1e-9);
    assert_eq!(result.summary.trade_count, 1);
    assert_eq!(result.summary.win_count, 1);
}

struct Momentum;

impl Strategy for Momentum {
    fn name(&self) -> &str {
        "momentum"
    }

    fn indicators(&self) -> Vec<Box<dyn Indicator>> {
        vec![Box::new(Roc::new(1, PriceSource::Close))]
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision {
        match ctx.indicators.at(0) {
            Some(change) if change > 0.0 => Decision::EnterLong,
            Some(change) if change < 0.0 => Decision::Exit,
            _ => Decision::Hold,
        }
    }
}

#[test]
fn momentum_with_stop_walks_the_tape() {
    let bars = flat_bars(&[10.0, 11.0, 9.0, 8.0, 12.0]);
    let config = RunConfig::new(1_000.0).with_stop_loss_percent(10.0);
    let engine = EngineLoop::new(config).unwrap();
    let result = engine.backtest(bars, &Momentum).unwrap();

    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.trades.len(), 2);

    // the 10 -> 11 rise enters; the drop to 9 crosses the stop at 9.9 and
    // fills there, overriding whatever the strategy would have said
    let stopped = &result.trades[0];
    assert_eq!(stopped.entry.price, 11.0);
    assert_eq!(stopped.exit.price, 9.9);
    assert_eq!(stopped.exit.reason, FillReason::StopLoss);
    assert_eq!(stopped.outcome(), TradeOutcome::Loss);
    assert_eq!(
        result
            .trades
            .iter()
            .filter(|t| t.exit.reason == FillReason::StopLoss)
            .count(),
        1
    );

    // the 8 -> 12 rise re-enters; the run then settles at the same close
    let settled = &result.trades[1];
    assert_eq!(settled.entry.price, 12.0);
    assert_eq!(settled.exit.reason, FillReason::ForcedExit);
    assert_eq!(settled.net_profit, 0.0);

    for trade in &result.trades {
        assert_eq!(trade.entry.kind, FillKind::Entry);
        assert_eq!(trade.exit.kind, FillKind::Exit);
    }
}

#[test]
fn simulation_replays_like_a_backtest() {
    let closes = [
        100.0, 103.0, 106.0, 104.0, 99.0, 97.0, 101.0, 106.0, 110.0, 104.0, 100.0, 105.0,
    ];
    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| bar(i as i64, close, close + 1.5, close - 1.5, close + 0.5))
        .collect();
    let strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 2, 3).unwrap();
    let config = RunConfig::new(10_000.0)
        .with_fee_percent(0.1)
        .with_stop_loss_percent(5.0);
    let engine = EngineLoop::new(config).unwrap();

    let from_slice = engine.backtest(bars.clone(), &strategy).unwrap();

    let (tx, feed) = ChannelFeed::channel();
    let feeder = thread::spawn(move || {
        for bar in bars {
            if tx.send(bar).is_err() {
                break;
            }
        }
    });
    let from_stream = engine
        .simulate(
            feed.with_poll_interval(Duration::from_millis(5)),
            &strategy,
            &CancelToken::new(),
        )
        .unwrap();
    feeder.join().unwrap();

    assert_eq!(from_slice.mode, RunMode::Backtest);
    assert_eq!(from_stream.mode, RunMode::Simulation);
    assert_eq!(from_slice.outcome, from_stream.outcome);
    assert_eq!(from_slice.equity_curve, from_stream.equity_curve);
    assert_eq!(from_slice.trades, from_stream.trades);
    assert_eq!(from_slice.summary, from_stream.summary);
}

#[test]
fn repeated_backtests_are_identical() {
    let closes = [100.0, 103.0, 101.0, 105.0, 102.0, 107.0, 103.0, 108.0];
    let bars = flat_bars(&closes);
    let strategy = MaCross::new(MaKind::Ema, PriceSource::Close, 2, 4).unwrap();
    let config = RunConfig::new(5_000.0)
        .with_fee_percent(0.1)
        .with_trailing_stop_percent(4.0);
    let engine = EngineLoop::new(config).unwrap();

    let first = engine.backtest(bars.clone(), &strategy).unwrap();
    let second = engine.backtest(bars, &strategy).unwrap();
    assert_eq!(first, second);
}

#[test]
fn cancellation_seals_the_run_in_flight() {
    let (tx, feed) = ChannelFeed::channel();
    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let feeder = thread::spawn(move || {
        for (i, close) in [100.0, 101.0, 102.0].into_iter().enumerate() {
            let _ = tx.send(bar(i as i64, close, close, close, close));
        }
        // leave the sender alive so only the token can end the run
        thread::sleep(Duration::from_millis(200));
        remote.cancel();
        drop(tx);
    });

    let engine = EngineLoop::new(RunConfig::new(1_000.0)).unwrap();
    let result = engine
        .simulate(
            feed.with_poll_interval(Duration::from_millis(5)),
            &enter_long_once,
            &cancel,
        )
        .unwrap();
    feeder.join().unwrap();

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert_eq!(result.equity_curve.len(), 3);
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].exit.reason, FillReason::ForcedExit);
    assert_eq!(result.trades[0].exit.price, 102.0);
    assert_eq!(result.trades[0].net_profit, 20.0);
}

#[test]
fn pre_cancelled_run_seals_empty() {
    let (tx, feed) = ChannelFeed::channel();
    tx.send(bar(0, 100.0, 100.0, 100.0, 100.0)).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let engine = EngineLoop::new(RunConfig::new(1_000.0)).unwrap();
    let result = engine.simulate(feed, &enter_long_once, &cancel).unwrap();

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert!(result.equity_curve.is_empty());
    assert!(result.trades.is_empty());
    assert_eq!(result.summary.net_profit, 0.0);
}

#[test]
fn take_profit_beats_stop_on_a_spanning_bar() {
    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        bar(1, 100.0, 130.0, 80.0, 90.0),
    ];
    let config = RunConfig::new(1_000.0)
        .with_stop_loss_percent(10.0)
        .with_take_profit_percent(20.0);
    let engine = EngineLoop::new(config).unwrap();
    let result = engine.backtest(bars, &enter_long_once).unwrap();

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].exit.reason, FillReason::TakeProfit);
    assert_eq!(result.trades[0].exit.price, 120.0);
}

#[test]
fn queued_decision_fills_at_the_next_open() {
    let bars = vec![
        bar(0, 100.0, 101.0, 99.0, 100.5),
        bar(1, 101.0, 102.0, 100.0, 101.5),
        bar(2, 102.0, 103.0, 101.0, 102.5),
    ];
    let config = RunConfig::new(1_000.0).with_fill_policy(FillPolicy::NextBarOpen);
    let engine = EngineLoop::new(config).unwrap();
    let result = engine.backtest(bars, &enter_long_once).unwrap();

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry.price, 101.0);
    assert_eq!(trade.entry.time, DateTime::from_timestamp(60, 0).unwrap());
    assert_eq!(trade.exit.price, 102.5);
    assert_eq!(trade.exit.reason, FillReason::ForcedExit);
}

#[test]
fn disallowed_short_downgrades_to_exit() {
    let bars = flat_bars(&[100.0, 102.0, 104.0, 106.0]);
    let engine = EngineLoop::new(RunConfig::new(1_000.0).with_allow_short(false)).unwrap();
    let result = engine.backtest(bars, &flip_after_long).unwrap();

    assert_eq!(result.trades.len(), 2);
    assert!(result.trades.iter().all(|t| t.side == PositionSide::Long));
    assert_eq!(result.trades[0].exit.reason, FillReason::Signal);
    assert_eq!(result.outcome, RunOutcome::Completed);
}

#[test]
fn reversal_closes_and_reopens_in_one_tick() {
    let bars = flat_bars(&[100.0, 102.0, 104.0]);
    let engine = EngineLoop::new(RunConfig::new(1_000.0)).unwrap();
    let result = engine.backtest(bars, &flip_after_long).unwrap();

    assert_eq!(result.trades.len(), 2);
    let first = &result.trades[0];
    let second = &result.trades[1];
    assert_eq!(first.side, PositionSide::Long);
    assert_eq!(second.side, PositionSide::Short);
    // the long's exit and the short's entry share one tick
    assert_eq!(first.exit.price, second.entry.price);
    assert_eq!(first.exit.time, second.entry.time);
    assert_eq!(second.exit.reason, FillReason::ForcedExit);
}

#[test]
fn unaffordable_orders_fail_their_tick_only() {
    let bars = flat_bars(&[100.0, 101.0, 102.0]);
    let config = RunConfig::new(100.0).with_sizing(SizePolicy::Quantity(5.0));
    let engine = EngineLoop::new(config).unwrap();
    let result = engine.backtest(bars, &enter_long_once).unwrap();

    assert_eq!(result.outcome, RunOutcome::Completed);
    assert!(result.trades.is_empty());
    assert_eq!(result.failures.len(), 3);
    assert!(result.failures[0].error.contains("Insufficient funds"));
    assert_eq!(result.summary.net_profit, 0.0);
    assert_eq!(result.equity_curve.len(), 3);
}

#[test]
fn exhausted_equity_liquidates_the_run() {
    let bars = flat_bars(&[100.0, 150.0, 250.0, 260.0]);
    let engine = EngineLoop::new(RunConfig::new(1_000.0)).unwrap();
    let result = engine.backtest(bars, &enter_short_once).unwrap();

    assert_eq!(result.outcome, RunOutcome::Liquidated);
    // the bar after the liquidation is never processed
    assert_eq!(result.equity_curve.len(), 3);
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].exit.reason, FillReason::ForcedExit);
    assert_eq!(result.summary.net_profit, -1_500.0);
}

#[test]
fn drawdown_cutoff_halts_the_run() {
    let bars = flat_bars(&[100.0, 120.0, 90.0, 130.0]);
    let config = RunConfig::new(1_000.0).with_max_drawdown_percent(20.0);
    let engine = EngineLoop::new(config).unwrap();
    let result = engine.backtest(bars, &enter_long_once).unwrap();

    assert_eq!(result.outcome, RunOutcome::DrawdownHalted);
    assert_eq!(result.equity_curve.len(), 3);
    assert_eq!(result.summary.max_drawdown_percent, 25.0);
    assert_eq!(result.summary.net_profit, -100.0);
}

#[test]
fn stop_out_reenters_after_recovery() {
    let bars = flat_bars(&[100.0, 88.0, 89.0, 92.0, 95.0]);
    let config = RunConfig::new(1_000.0)
        .with_stop_loss_percent(10.0)
        .with_reentry_after_stop(1);
    let engine = EngineLoop::new(config).unwrap();
    let result = engine.backtest(bars, &enter_long_once).unwrap();

    assert_eq!(result.trades.len(), 2);
    assert_eq!(result.trades[0].entry.price, 100.0);
    assert_eq!(result.trades[0].exit.reason, FillReason::StopLoss);
    assert_eq!(result.trades[0].exit.price, 90.0);
    // suppressed at 89, re-entered on its own once the close cleared 90
    assert_eq!(result.trades[1].entry.price, 92.0);
    assert_eq!(result.trades[1].exit.reason, FillReason::ForcedExit);
    assert_eq!(result.outcome, RunOutcome::Completed);
}

#[test]
fn fees_reconcile_across_fills_and_summary() {
    let bars = flat_bars(&[100.0, 104.0, 99.0, 103.0, 98.0, 105.0]);
    let config = RunConfig::new(1_000.0).with_fee_percent(0.25);
    let engine = EngineLoop::new(config).unwrap();
    let result = engine.backtest(bars, &flip_after_long).unwrap();

    assert!(!result.trades.is_empty());
    let from_fills: f64 = result.trades.iter().map(|t| t.entry.fee + t.exit.fee).sum();
    assert!((result.summary.fees_paid - from_fills).abs() < 1e-9);

    for trade in &result.trades {
        let gross = match trade.side {
            PositionSide::Long => (trade.exit.price - trade.entry.price) * trade.entry.quantity,
            PositionSide::Short => (trade.entry.price - trade.exit.price) * trade.entry.quantity,
        };
        let expected = gross - trade.entry.fee - trade.exit.fee;
        assert!((trade.net_profit - expected).abs() < 1e-9);
    }

    // the settled curve agrees with the trade log
    let from_trades: f64 = result.trades.iter().map(|t| t.net_profit).sum();
    assert!((result.summary.net_profit - from_trades).abs() < 1e-9);
}

#[test]
fn zero_signal_run_is_well_defined() {
    let bars = flat_bars(&[100.0, 101.0, 99.0]);
    let engine = EngineLoop::new(RunConfig::new(1_000.0)).unwrap();
    let result = engine
        .backtest(bars, &|_: &SignalContext| Decision::Hold)
        .unwrap();

    assert_eq!(result.outcome, RunOutcome::Completed);
    assert!(result.trades.is_empty());
    assert_eq!(result.summary.trade_count, 0);
    assert_eq!(result.summary.win_rate_percent, 0.0);
    assert_eq!(result.summary.net_profit, 0.0);
    assert_eq!(result.equity_curve.len(), 3);
}

#[test]
fn malformed_tapes_abort() {
    let engine = EngineLoop::new(RunConfig::new(1_000.0)).unwrap();

    let empty: Vec<Bar> = Vec::new();
    assert!(matches!(
        engine.backtest(empty, &|_: &SignalContext| Decision::Hold),
        Err(Error::EmptyBarData)
    ));

    let stuck = vec![
        bar(5, 100.0, 101.0, 99.0, 100.0),
        bar(5, 100.0, 101.0, 99.0, 100.0),
    ];
    assert!(matches!(
        engine.backtest(stuck, &|_: &SignalContext| Decision::Hold),
        Err(Error::OutOfOrderBar { .. })
    ));
}

#[test]
fn event_stream_mirrors_the_run() {
    let bars = flat_bars(&[100.0, 102.0, 104.0]);
    let (tx, rx) = mpsc::channel();
    let engine = EngineLoop::new(RunConfig::new(1_000.0))
        .unwrap()
        .with_event_sink(tx);
    let result = engine.backtest(bars, &enter_long_once).unwrap();
    drop(engine);

    let events: Vec<EngineEvent> = rx.try_iter().collect();
    let processed = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::BarProcessed { .. }))
        .count();
    let fills = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::OrderFilled(_)))
        .count();
    let closed = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::TradeClosed(_)))
        .count();
    assert_eq!(processed, 3);
    assert_eq!(fills, 2);
    assert_eq!(closed, 1);
    assert!(matches!(
        events.last(),
        Some(EngineEvent::RunSealed {
            outcome: RunOutcome::Completed,
            ..
        })
    ));
    assert_eq!(result.trades.len(), 1);
}
