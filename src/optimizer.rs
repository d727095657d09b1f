//! Strategy parameter optimization.
//!
//! The [`Optimizer`] sweeps a [`ParameterSpace`], backtests one strategy
//! instance per combination over a shared bar slice, and returns every
//! trial ranked by the configured [`Objective`]. Trials run in parallel
//! chunks; a combination the strategy rejects is recorded as a failed
//! trial instead of aborting the sweep.

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{Bar, EngineLoop, RunConfig};
use crate::errors::Result;
use crate::params::{ParameterSet, ParameterSpace};
use crate::stats::Summary;
use crate::strategy::Strategy;

/// Which summary metric a sweep ranks by.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Objective {
    /// Final equity minus initial balance.
    #[default]
    NetProfit,
    /// Gross profits over gross losses.
    ProfitFactor,
    /// Risk-adjusted per-bar return.
    Sharpe,
}

impl Objective {
    // NaN never ranks above a real score.
    fn score(&self, summary: &Summary) -> f64 {
        let value = match self {
            Self::NetProfit => summary.net_profit,
            Self::ProfitFactor => summary.profit_factor,
            Self::Sharpe => summary.sharpe,
        };
        if value.is_nan() { f64::NEG_INFINITY } else { value }
    }
}

/// How one parameter combination fared.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    /// The backtest ran; here are its metrics.
    Complete(Summary),
    /// The strategy rejected the combination; the error, rendered.
    Failed(String),
}

/// One tested combination, traceable to its exact parameters.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    /// The combination this trial ran with.
    pub params: ParameterSet,
    /// What came of it.
    pub outcome: TrialOutcome,
}

impl Trial {
    /// The summary metrics, for trials that completed.
    pub fn summary(&self) -> Option<&Summary> {
        match &self.outcome {
            TrialOutcome::Complete(summary) => Some(summary),
            TrialOutcome::Failed(_) => None,
        }
    }

    /// Whether the strategy rejected this combination.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, TrialOutcome::Failed(_))
    }
}

/// Exhaustive parameter sweep over one bar slice.
///
/// ### Example
/// ```
/// use barloop::prelude::*;
///
/// let space = ParameterSpace::new()
///     .with("fast", ParamRange::int(2, 4, 1))
///     .with("slow", ParamRange::int(10, 20, 5));
/// assert_eq!(space.combinations().unwrap().len(), 9);
/// ```
pub struct Optimizer {
    bars: Arc<[Bar]>,
    config: RunConfig,
    space: ParameterSpace,
    objective: Objective,
    concurrency: Option<usize>,
}

impl Optimizer {
    /// Creates a sweep of `space` over `bars` under `config`.
    ///
    /// ### Arguments
    /// * `bars` - The tape every trial replays, oldest first.
    /// * `config` - Run configuration shared by every trial.
    /// * `space` - The parameter grid to cover exhaustively.
    pub fn new(bars: impl Into<Arc<[Bar]>>, config: RunConfig, space: ParameterSpace) -> Self {
        Self {
            bars: bars.into(),
            config,
            space,
            objective: Objective::default(),
            concurrency: None,
        }
    }

    /// Ranks trials by the given metric instead of net profit.
    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    /// Caps the worker count; defaults to the number of CPUs.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    /// Backtests every combination and returns all trials, best first.
    ///
    /// `factory` builds one strategy instance per combination; returning
    /// an error marks that combination [`TrialOutcome::Failed`] and the
    /// sweep moves on. Completed trials rank by objective score
    /// descending, ties broken by smaller max drawdown; failed trials
    /// sort last.
    ///
    /// ### Arguments
    /// * `factory` - `ParameterSet` in, configured strategy out.
    pub fn run<S, F>(&self, factory: F) -> Result<Vec<Trial>>
    where
        S: Strategy,
        F: Fn(&ParameterSet) -> Result<S> + Sync,
    {
        let combinations = self.space.combinations()?;
        let workers = self.concurrency.unwrap_or_else(num_cpus::get).max(1);
        let chunk_size = combinations.len().div_ceil(workers).max(1);

        debug!(
            trials = combinations.len(),
            workers, "parameter sweep started"
        );

        let mut trials = combinations
            .par_chunks(chunk_size)
            .map::<_, Result<Vec<Trial>>>(|chunk| {
                let engine = EngineLoop::new(self.config.clone())?;
                let mut local = Vec::with_capacity(chunk.len());
                for params in chunk {
                    local.push(self.trial(&engine, &factory, params)?);
                }
                Ok(local)
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        self.rank(&mut trials);
        debug!(trials = trials.len(), "parameter sweep finished");
        Ok(trials)
    }

    fn trial<S, F>(&self, engine: &EngineLoop, factory: &F, params: &ParameterSet) -> Result<Trial>
    where
        S: Strategy,
        F: Fn(&ParameterSet) -> Result<S>,
    {
        let outcome = match factory(params) {
            Ok(strategy) => {
                let result = engine.backtest(self.bars.clone(), &strategy)?;
                TrialOutcome::Complete(result.summary)
            }
            Err(error) => TrialOutcome::Failed(error.to_string()),
        };
        Ok(Trial {
            params: params.clone(),
            outcome,
        })
    }

    fn rank(&self, trials: &mut [Trial]) {
        trials.sort_by(|a, b| match (&a.outcome, &b.outcome) {
            (TrialOutcome::Complete(x), TrialOutcome::Complete(y)) => self
                .objective
                .score(y)
                .total_cmp(&self.objective.score(x))
                .then_with(|| x.max_drawdown_percent.total_cmp(&y.max_drawdown_percent)),
            (TrialOutcome::Complete(_), TrialOutcome::Failed(_)) => Ordering::Less,
            (TrialOutcome::Failed(_), TrialOutcome::Complete(_)) => Ordering::Greater,
            (TrialOutcome::Failed(_), TrialOutcome::Failed(_)) => Ordering::Equal,
        });
    }
}

#[cfg(test)]
use crate::prelude::*;

#[cfg(test)]
fn flat_bars(closes: &[f64]) -> Vec<Bar> {
    use chrono::DateTime;

    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            BarBuilder::new()
                .open(close)
                .high(close)
                .low(close)
                .close(close)
                .volume(1.0)
                .open_time(DateTime::from_timestamp(i as i64 * 60, 0).unwrap())
                .close_time(DateTime::from_timestamp(i as i64 * 60 + 59, 0).unwrap())
                .build()
                .unwrap()
        })
        .collect()
}

#[cfg(test)]
fn ma_cross_factory(params: &ParameterSet) -> Result<MaCross> {
    let mut strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 2, 5)?;
    strategy.configure(params)?;
    Ok(strategy)
}

#[cfg(test)]
#[test]
fn sweep_is_exhaustive_and_traceable() {
    let bars = flat_bars(&(1..=20).map(f64::from).collect::<Vec<_>>());
    let space = ParameterSpace::new()
        .with("fast", ParamRange::int(2, 3, 1))
        .with("slow", ParamRange::int(5, 6, 1));

    let trials = Optimizer::new(bars, RunConfig::new(1_000.0), space)
        .run(ma_cross_factory)
        .unwrap();

    assert_eq!(trials.len(), 4);
    assert!(trials.iter().all(|t| !t.is_failed()));

    let mut seen: Vec<(i64, i64)> = trials
        .iter()
        .map(|t| {
            (
                t.params.int("fast").unwrap(),
                t.params.int("slow").unwrap(),
            )
        })
        .collect();
    seen.sort();
    assert_eq!(seen, vec![(2, 5), (2, 6), (3, 5), (3, 6)]);
}

#[cfg(test)]
#[test]
fn rejected_combination_becomes_a_failed_trial() {
    let bars = flat_bars(&(1..=10).map(f64::from).collect::<Vec<_>>());
    // fast=6 against slow=5 is degenerate and must be rejected
    let space = ParameterSpace::new()
        .with("fast", ParamRange::choice([2i64, 6]))
        .with("slow", ParamRange::int(5, 5, 1));

    let trials = Optimizer::new(bars, RunConfig::new(1_000.0), space)
        .run(ma_cross_factory)
        .unwrap();

    assert_eq!(trials.len(), 2);
    assert_eq!(trials.iter().filter(|t| t.is_failed()).count(), 1);
    // failed trials rank last
    assert!(!trials[0].is_failed());
    assert!(trials[1].is_failed());
    assert!(trials[1].summary().is_none());
}

#[cfg(test)]
#[test]
fn ranking_follows_the_objective() {
    // entering earlier on a rising tape makes strictly more profit
    let bars = flat_bars(&[10.0, 20.0, 30.0, 40.0]);
    let space = ParameterSpace::new().with("threshold", ParamRange::float(10.0, 35.0, 25.0));

    let factory = |params: &ParameterSet| {
        let threshold = params.float("threshold")?;
        Ok(move |ctx: &SignalContext| {
            if ctx.bar.close() >= threshold {
                Decision::EnterLong
            } else {
                Decision::Hold
            }
        })
    };

    let trials = Optimizer::new(bars, RunConfig::new(1_000.0), space)
        .run(factory)
        .unwrap();

    assert_eq!(trials.len(), 2);
    assert_eq!(trials[0].params.float("threshold").unwrap(), 10.0);
    let best = trials[0].summary().unwrap();
    let worst = trials[1].summary().unwrap();
    assert_eq!(best.net_profit, 3_000.0);
    assert_eq!(worst.net_profit, 0.0);
    assert!(best.net_profit > worst.net_profit);
}

#[cfg(test)]
#[test]
fn sweeps_are_deterministic() {
    let bars = flat_bars(&(1..=30).map(f64::from).collect::<Vec<_>>());
    let space = ParameterSpace::new()
        .with("fast", ParamRange::int(2, 4, 1))
        .with("slow", ParamRange::int(5, 9, 2));

    let optimizer = Optimizer::new(bars, RunConfig::new(1_000.0), space);
    let first = optimizer.run(ma_cross_factory).unwrap();
    let second = optimizer.run(ma_cross_factory).unwrap();
    assert_eq!(first, second);

    // a capped worker count only changes scheduling, never results
    let capped = optimizer.with_concurrency(1).run(ma_cross_factory).unwrap();
    assert_eq!(first, capped);
}
