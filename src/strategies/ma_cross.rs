#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::indicators::{Ema, Indicator, PriceSource, Sma, Wma};
use crate::params::{ParamSpec, ParameterSet};
use crate::strategy::{Decision, SignalContext, Strategy};

/// Which moving-average flavor a [`MaCross`] runs on.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaKind {
    /// Simple moving average.
    Sma,
    /// Exponential moving average.
    Ema,
    /// Linearly weighted moving average.
    Wma,
}

/// Classic two-moving-average crossover.
///
/// Fast above slow enters long, fast below slow enters short, equal or
/// warming up holds. Tunable through the `fast` and `slow` integer
/// parameters, which makes it the canonical optimizer target.
///
/// ### Example
/// ```rust
/// use barloop::prelude::*;
///
/// let mut strategy = MaCross::new(MaKind::Ema, PriceSource::Close, 9, 21)?;
/// strategy.configure(&ParameterSet::new().with("fast", 5).with("slow", 13))?;
/// assert_eq!(strategy.fast_period(), 5);
/// # Ok::<(), Error>(())
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaCross {
    kind: MaKind,
    source: PriceSource,
    fast: usize,
    slow: usize,
}

impl MaCross {
    /// Creates a crossover of two `kind` averages over `source` prices.
    ///
    /// ### Returns
    /// [`Error::InvalidParameter`] when `fast` is zero or not strictly
    /// below `slow`; equal periods would never cross.
    pub fn new(kind: MaKind, source: PriceSource, fast: usize, slow: usize) -> Result<Self> {
        check_periods(fast, slow)?;
        Ok(Self {
            kind,
            source,
            fast,
            slow,
        })
    }

    /// The moving-average flavor.
    pub fn kind(&self) -> MaKind {
        self.kind
    }

    /// The price source both averages read.
    pub fn source(&self) -> PriceSource {
        self.source
    }

    /// Fast lookback period.
    pub fn fast_period(&self) -> usize {
        self.fast
    }

    /// Slow lookback period.
    pub fn slow_period(&self) -> usize {
        self.slow
    }

    fn make_ma(&self, period: usize) -> Box<dyn Indicator> {
        match self.kind {
            MaKind::Sma => Box::new(Sma::new(period, self.source)),
            MaKind::Ema => Box::new(Ema::new(period, self.source)),
            MaKind::Wma => Box::new(Wma::new(period, self.source)),
        }
    }
}

impl Strategy for MaCross {
    fn name(&self) -> &str {
        "ma_cross"
    }

    // Fast at index 0, slow at index 1.
    fn indicators(&self) -> Vec<Box<dyn Indicator>> {
        vec![self.make_ma(self.fast), self.make_ma(self.slow)]
    }

    fn schema(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::int("fast"), ParamSpec::int("slow")]
    }

    fn configure(&mut self, params: &ParameterSet) -> Result<()> {
        params.conforms_to(&self.schema())?;
        let mut fast = self.fast;
        let mut slow = self.slow;
        if params.get("fast").is_some() {
            fast = period_from(params.int("fast")?, "fast")?;
        }
        if params.get("slow").is_some() {
            slow = period_from(params.int("slow")?, "slow")?;
        }
        check_periods(fast, slow)?;
        self.fast = fast;
        self.slow = slow;
        Ok(())
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision {
        let (Some(fast), Some(slow)) = (ctx.indicators.at(0), ctx.indicators.at(1)) else {
            return Decision::Hold;
        };
        if fast > slow {
            Decision::EnterLong
        } else if fast < slow {
            Decision::EnterShort
        } else {
            Decision::Hold
        }
    }
}

fn check_periods(fast: usize, slow: usize) -> Result<()> {
    if fast == 0 {
        return Err(Error::InvalidParameter {
            name: "fast".to_string(),
            detail: "period must be positive".to_string(),
        });
    }
    if fast >= slow {
        return Err(Error::InvalidParameter {
            name: "fast".to_string(),
            detail: format!("fast period {fast} must be strictly below slow period {slow}"),
        });
    }
    Ok(())
}

fn period_from(value: i64, name: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::InvalidParameter {
        name: name.to_string(),
        detail: format!("period must be positive (got {value})"),
    })
}

#[cfg(test)]
use crate::indicators::{IndicatorEngine, close_bar};

#[cfg(test)]
fn decide(strategy: &MaCross, closes: &[f64]) -> Decision {
    let mut engine = IndicatorEngine::new(strategy.indicators()).unwrap();
    let mut decision = Decision::Hold;
    for (minute, close) in closes.iter().enumerate() {
        let bar = close_bar(minute as i64, *close);
        let series = engine.update(&bar);
        let ctx = SignalContext {
            bar: &bar,
            indicators: series,
            position: None,
        };
        decision = strategy.evaluate(&ctx);
    }
    decision
}

#[cfg(test)]
#[test]
fn degenerate_periods_are_rejected() {
    assert!(MaCross::new(MaKind::Sma, PriceSource::Close, 5, 5).is_err());
    assert!(MaCross::new(MaKind::Sma, PriceSource::Close, 7, 3).is_err());
    assert!(MaCross::new(MaKind::Sma, PriceSource::Close, 0, 3).is_err());
    assert!(MaCross::new(MaKind::Sma, PriceSource::Close, 2, 3).is_ok());
}

#[cfg(test)]
#[test]
fn declares_fast_then_slow() {
    let strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 2, 5).unwrap();
    let indicators = strategy.indicators();
    assert_eq!(indicators.len(), 2);
    assert_eq!(indicators[0].name(), "sma_2_close");
    assert_eq!(indicators[1].name(), "sma_5_close");

    let strategy = MaCross::new(MaKind::Wma, PriceSource::Hl2, 2, 5).unwrap();
    assert_eq!(strategy.indicators()[0].name(), "wma_2_hl2");
}

#[cfg(test)]
#[test]
fn holds_through_warm_up() {
    let strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 2, 3).unwrap();
    assert_eq!(decide(&strategy, &[10.0, 20.0]), Decision::Hold);
}

#[cfg(test)]
#[test]
fn crossover_signals() {
    let strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 2, 3).unwrap();

    // fast 25 above slow 20
    assert_eq!(decide(&strategy, &[10.0, 20.0, 30.0]), Decision::EnterLong);
    // fast 17 below slow 18
    assert_eq!(
        decide(&strategy, &[10.0, 20.0, 30.0, 4.0]),
        Decision::EnterShort
    );
    // a flat tape keeps both averages equal
    assert_eq!(decide(&strategy, &[10.0, 10.0, 10.0, 10.0]), Decision::Hold);
}

#[cfg(test)]
#[test]
fn configure_applies_and_validates() {
    let mut strategy = MaCross::new(MaKind::Sma, PriceSource::Close, 2, 5).unwrap();

    strategy
        .configure(&ParameterSet::new().with("fast", 3).with("slow", 10))
        .unwrap();
    assert_eq!(strategy.fast_period(), 3);
    assert_eq!(strategy.slow_period(), 10);

    // partial sets keep the other period
    strategy.configure(&ParameterSet::new().with("slow", 7)).unwrap();
    assert_eq!(strategy.fast_period(), 3);
    assert_eq!(strategy.slow_period(), 7);

    let err = strategy
        .configure(&ParameterSet::new().with("fast", 10).with("slow", 3))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }));

    let err = strategy
        .configure(&ParameterSet::new().with("fast", -2))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }));

    let err = strategy
        .configure(&ParameterSet::new().with("lookback", 4))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownParameter(_)));

    // failed configure left the periods untouched
    assert_eq!(strategy.fast_period(), 3);
    assert_eq!(strategy.slow_period(), 7);
}
