mod ema;
mod roc;
mod rsi;
mod sma;
mod wma;

pub use ema::*;
pub use roc::*;
pub use rsi::*;
pub use sma::*;
pub use wma::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::Bar;
use crate::errors::{Error, Result};

/// Which price an indicator reads from each bar.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceSource {
    /// The opening price.
    Open,
    /// The highest price.
    High,
    /// The lowest price.
    Low,
    /// The closing price.
    #[default]
    Close,
    /// Midpoint of high and low.
    Hl2,
    /// Midpoint of open and close.
    Oc2,
}

impl PriceSource {
    /// Reads this source's price from a bar.
    pub fn extract(&self, bar: &Bar) -> f64 {
        match self {
            Self::Open => bar.open(),
            Self::High => bar.high(),
            Self::Low => bar.low(),
            Self::Close => bar.close(),
            Self::Hl2 => (bar.high() + bar.low()) / 2.0,
            Self::Oc2 => (bar.open() + bar.close()) / 2.0,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
            Self::Hl2 => "hl2",
            Self::Oc2 => "oc2",
        }
    }
}

/// Incremental per-bar computation.
///
/// `update` is called exactly once per bar, in bar order; the value it
/// returns may depend only on the bars seen so far. `None` means the
/// indicator is still warming up; strategies must treat that as "no
/// signal", never as zero. Implementations keep O(window) state.
///
/// Anything can implement this, including wrappers around indicator crates
/// such as [`ta`](https://crates.io/crates/ta).
pub trait Indicator {
    /// Name this indicator's values appear under in the series.
    fn name(&self) -> &str;

    /// Feeds one bar and returns the value aligned to it, or `None` while
    /// warming up.
    fn update(&mut self, bar: &Bar) -> Option<f64>;
}

/// Indicator values aligned to the current bar.
///
/// Values appear both under their indicator's name and at its registration
/// index, so strategies on the hot path can read by position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndicatorSeries {
    entries: Vec<(String, Option<f64>)>,
}

impl IndicatorSeries {
    /// Value of the named indicator, or `None` if it is warming up or was
    /// never registered.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .and_then(|(_, value)| *value)
    }

    /// Value of the indicator registered at `index`, or `None` while it
    /// warms up or if the index is out of range.
    pub fn at(&self, index: usize) -> Option<f64> {
        self.entries.get(index).and_then(|(_, value)| *value)
    }

    /// Whether every registered indicator has produced a value.
    pub fn all_ready(&self) -> bool {
        self.entries.iter().all(|(_, value)| value.is_some())
    }

    /// Number of registered indicators.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no indicators are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
    }
}

/// Drives a set of indicators one bar at a time.
///
/// Built fresh for every run; no state crosses runs.
pub struct IndicatorEngine {
    indicators: Vec<Box<dyn Indicator>>,
    series: IndicatorSeries,
}

impl IndicatorEngine {
    /// Registers the given indicators. Two indicators with the same name
    /// are rejected, since the later one would shadow the earlier in the
    /// series.
    pub fn new(indicators: Vec<Box<dyn Indicator>>) -> Result<Self> {
        let mut entries = Vec::with_capacity(indicators.len());
        for indicator in &indicators {
            let name = indicator.name();
            if entries.iter().any(|(existing, _)| existing == name) {
                return Err(Error::DuplicateIndicator(name.to_string()));
            }
            entries.push((name.to_string(), None));
        }
        Ok(Self {
            indicators,
            series: IndicatorSeries { entries },
        })
    }

    /// Feeds one bar to every indicator and returns the refreshed series.
    pub fn update(&mut self, bar: &Bar) -> &IndicatorSeries {
        for (indicator, entry) in self.indicators.iter_mut().zip(&mut self.series.entries) {
            entry.1 = indicator.update(bar);
        }
        &self.series
    }

    /// The most recently computed series.
    pub fn series(&self) -> &IndicatorSeries {
        &self.series
    }
}

#[cfg(test)]
pub(crate) fn close_bar(minute: i64, close: f64) -> Bar {
    crate::engine::BarBuilder::new()
        .open(close)
        .high(close)
        .low(close)
        .close(close)
        .volume(1.0)
        .open_time(chrono::DateTime::from_timestamp(minute * 60, 0).unwrap())
        .close_time(chrono::DateTime::from_timestamp(minute * 60 + 59, 0).unwrap())
        .build()
        .unwrap()
}

#[cfg(test)]
#[test]
fn price_source_extraction() {
    let bar = crate::engine::BarBuilder::new()
        .open(10.0)
        .high(20.0)
        .low(5.0)
        .close(15.0)
        .volume(1.0)
        .open_time(chrono::DateTime::default())
        .close_time(chrono::DateTime::default())
        .build()
        .unwrap();

    assert_eq!(PriceSource::Open.extract(&bar), 10.0);
    assert_eq!(PriceSource::High.extract(&bar), 20.0);
    assert_eq!(PriceSource::Low.extract(&bar), 5.0);
    assert_eq!(PriceSource::Close.extract(&bar), 15.0);
    assert_eq!(PriceSource::Hl2.extract(&bar), 12.5);
    assert_eq!(PriceSource::Oc2.extract(&bar), 12.5);
}

#[cfg(test)]
#[test]
fn duplicate_names_are_rejected() {
    let result = IndicatorEngine::new(vec![
        Box::new(Sma::new(3, PriceSource::Close)),
        Box::new(Sma::new(3, PriceSource::Close)),
    ]);
    assert!(matches!(result, Err(Error::DuplicateIndicator(_))));
}

#[cfg(test)]
#[test]
fn values_do_not_depend_on_later_bars() {
    fn fresh() -> Vec<Box<dyn Indicator>> {
        vec![
            Box::new(Sma::new(3, PriceSource::Close)),
            Box::new(Ema::new(3, PriceSource::Close)),
            Box::new(Wma::new(3, PriceSource::Close)),
            Box::new(Rsi::new(3, PriceSource::Close)),
            Box::new(Roc::new(2, PriceSource::Close)),
        ]
    }

    fn record(indicators: &mut [Box<dyn Indicator>], closes: &[f64]) -> Vec<Vec<Option<f64>>> {
        closes
            .iter()
            .enumerate()
            .map(|(minute, close)| {
                let bar = close_bar(minute as i64, *close);
                indicators
                    .iter_mut()
                    .map(|indicator| indicator.update(&bar))
                    .collect()
            })
            .collect()
    }

    let closes = [10.0, 12.0, 11.0, 14.0, 13.0, 16.0, 15.0, 18.0];
    let prefix = record(&mut fresh(), &closes[..5]);
    let full = record(&mut fresh(), &closes);

    assert_eq!(prefix, full[..5]);
}

#[cfg(test)]
#[test]
fn series_reads_by_name_and_index() {
    let mut engine = IndicatorEngine::new(vec![
        Box::new(Sma::new(2, PriceSource::Close)),
        Box::new(Sma::new(3, PriceSource::Close)),
    ])
    .unwrap();

    let series = engine.update(&close_bar(0, 10.0));
    assert!(!series.all_ready());
    assert_eq!(series.at(0), None);

    engine.update(&close_bar(1, 20.0));
    let series = engine.update(&close_bar(2, 30.0));
    assert!(series.all_ready());
    assert_eq!(series.at(0), Some(25.0));
    assert_eq!(series.at(1), Some(20.0));
    assert_eq!(series.get("sma_2_close"), Some(25.0));
    assert_eq!(series.get("sma_3_close"), Some(20.0));
    assert_eq!(series.get("nope"), None);
    assert_eq!(series.len(), 2);
}
