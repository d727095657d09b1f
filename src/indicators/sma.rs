use super::{Indicator, PriceSource};
use crate::engine::Bar;
use std::collections::VecDeque;

/// Simple moving average: the unweighted mean of the last `period` values.
///
/// Warm-up: the first `period - 1` bars yield `None`.
#[derive(Debug, Clone)]
pub struct Sma {
    name: String,
    period: usize,
    source: PriceSource,
    window: VecDeque<f64>,
}

impl Sma {
    /// Creates an SMA over `period` bars of the given price source.
    /// A zero period never becomes ready.
    pub fn new(period: usize, source: PriceSource) -> Self {
        Self {
            name: format!("sma_{period}_{}", source.label()),
            period,
            source,
            window: VecDeque::with_capacity(period + 1),
        }
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        self.window.push_back(self.source.extract(bar));
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.period as f64)
    }
}

#[cfg(test)]
use super::close_bar;

#[cfg(test)]
#[test]
fn warm_up_then_rolling_mean() {
    let mut sma = Sma::new(3, PriceSource::Close);
    assert_eq!(sma.name(), "sma_3_close");

    assert_eq!(sma.update(&close_bar(0, 10.0)), None);
    assert_eq!(sma.update(&close_bar(1, 20.0)), None);
    assert_eq!(sma.update(&close_bar(2, 30.0)), Some(20.0));
    assert_eq!(sma.update(&close_bar(3, 40.0)), Some(30.0));
    assert_eq!(sma.update(&close_bar(4, 50.0)), Some(40.0));
}

#[cfg(test)]
#[test]
fn period_one_tracks_the_source() {
    let mut sma = Sma::new(1, PriceSource::Close);
    assert_eq!(sma.update(&close_bar(0, 42.0)), Some(42.0));
    assert_eq!(sma.update(&close_bar(1, 7.0)), Some(7.0));
}

#[cfg(test)]
#[test]
fn zero_period_never_ready() {
    let mut sma = Sma::new(0, PriceSource::Close);
    for minute in 0..5 {
        assert_eq!(sma.update(&close_bar(minute, 10.0)), None);
    }
}

#[cfg(test)]
#[test]
fn matches_reference_implementation() {
    use ta::Next;
    use ta::indicators::SimpleMovingAverage;

    let closes = [12.0, 15.0, 11.0, 18.0, 21.0, 17.0, 14.0, 19.0, 25.0, 22.0];
    let mut mine = Sma::new(4, PriceSource::Close);
    let mut reference = SimpleMovingAverage::new(4).unwrap();

    for (minute, close) in closes.iter().enumerate() {
        let theirs = reference.next(*close);
        if let Some(ours) = mine.update(&close_bar(minute as i64, *close)) {
            assert!(
                (ours - theirs).abs() < 1e-10,
                "bar {minute}: {ours} vs {theirs}"
            );
        }
    }
}
