use super::{Indicator, PriceSource};
use crate::engine::Bar;

/// Relative strength index with Wilder smoothing.
///
/// The first `period` price changes are averaged simply; afterwards the
/// averages roll as `avg = (avg * (period - 1) + change) / period`. With no
/// losses in the window the value saturates at 100, with no gains at 0.
///
/// Warm-up: the first `period` bars yield `None` (a change needs two bars).
#[derive(Debug, Clone)]
pub struct Rsi {
    name: String,
    period: usize,
    source: PriceSource,
    previous: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    changes: usize,
}

impl Rsi {
    /// Creates an RSI over `period` changes of the given price source.
    /// A zero period never becomes ready.
    pub fn new(period: usize, source: PriceSource) -> Self {
        Self {
            name: format!("rsi_{period}_{}", source.label()),
            period,
            source,
            previous: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            changes: 0,
        }
    }

    fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            return 100.0;
        }
        100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss)
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        let value = self.source.extract(bar);
        let Some(previous) = self.previous.replace(value) else {
            return None;
        };

        let change = value - previous;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.changes += 1;

        if self.changes < self.period {
            self.avg_gain += gain;
            self.avg_loss += loss;
            return None;
        }
        if self.changes == self.period {
            self.avg_gain = (self.avg_gain + gain) / self.period as f64;
            self.avg_loss = (self.avg_loss + loss) / self.period as f64;
        } else {
            let n = self.period as f64;
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }
        Some(self.value())
    }
}

#[cfg(test)]
use super::close_bar;

#[cfg(test)]
#[test]
fn warm_up_needs_period_changes() {
    let mut rsi = Rsi::new(3, PriceSource::Close);
    assert_eq!(rsi.name(), "rsi_3_close");

    assert_eq!(rsi.update(&close_bar(0, 100.0)), None);
    assert_eq!(rsi.update(&close_bar(1, 101.0)), None);
    assert_eq!(rsi.update(&close_bar(2, 102.0)), None);
    assert!(rsi.update(&close_bar(3, 103.0)).is_some());
}

#[cfg(test)]
#[test]
fn all_gains_saturate_at_100() {
    let mut rsi = Rsi::new(3, PriceSource::Close);
    let mut last = None;
    for minute in 0..6 {
        last = rsi.update(&close_bar(minute, 100.0 + minute as f64));
    }
    assert_eq!(last, Some(100.0));
}

#[cfg(test)]
#[test]
fn all_losses_saturate_at_0() {
    let mut rsi = Rsi::new(3, PriceSource::Close);
    let mut last = None;
    for minute in 0..6 {
        last = rsi.update(&close_bar(minute, 100.0 - minute as f64));
    }
    assert_eq!(last, Some(0.0));
}

#[cfg(test)]
#[test]
fn balanced_changes_sit_at_50() {
    // +1 then -1 over period 2: avg gain == avg loss
    let closes = [100.0, 101.0, 100.0];
    let mut rsi = Rsi::new(2, PriceSource::Close);
    let mut last = None;
    for (minute, close) in closes.iter().enumerate() {
        last = rsi.update(&close_bar(minute as i64, *close));
    }
    assert_eq!(last, Some(50.0));
}

#[cfg(test)]
#[test]
fn stays_in_range() {
    let closes = [44.0, 44.25, 44.5, 43.75, 44.5, 44.25, 44.75, 45.25, 45.5, 45.25];
    let mut rsi = Rsi::new(4, PriceSource::Close);
    for (minute, close) in closes.iter().enumerate() {
        if let Some(value) = rsi.update(&close_bar(minute as i64, *close)) {
            assert!((0.0..=100.0).contains(&value), "{value} out of range");
        }
    }
}
