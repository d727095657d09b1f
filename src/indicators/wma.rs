use super::{Indicator, PriceSource};
use crate::engine::Bar;
use std::collections::VecDeque;

/// Weighted moving average: linear weights `1..=period` with the newest
/// value weighted heaviest, divided by `period * (period + 1) / 2`.
///
/// Warm-up: the first `period - 1` bars yield `None`.
#[derive(Debug, Clone)]
pub struct Wma {
    name: String,
    period: usize,
    source: PriceSource,
    window: VecDeque<f64>,
}

impl Wma {
    /// Creates a WMA over `period` bars of the given price source.
    /// A zero period never becomes ready.
    pub fn new(period: usize, source: PriceSource) -> Self {
        Self {
            name: format!("wma_{period}_{}", source.label()),
            period,
            source,
            window: VecDeque::with_capacity(period + 1),
        }
    }
}

impl Indicator for Wma {
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
        let weighted: f64 = self
            .window
            .iter()
            .enumerate()
            .map(|(index, value)| (index + 1) as f64 * value)
            .sum();
        let divisor = (self.period * (self.period + 1)) as f64 / 2.0;
        Some(weighted / divisor)
    }
}

#[cfg(test)]
use super::close_bar;

#[cfg(test)]
#[test]
fn newest_value_weighs_heaviest() {
    let mut wma = Wma::new(3, PriceSource::Close);
    assert_eq!(wma.name(), "wma_3_close");

    assert_eq!(wma.update(&close_bar(0, 10.0)), None);
    assert_eq!(wma.update(&close_bar(1, 20.0)), None);

    // (1*10 + 2*20 + 3*30) / 6
    assert_eq!(wma.update(&close_bar(2, 30.0)), Some(140.0 / 6.0));
    // window slides: (1*20 + 2*30 + 3*40) / 6
    assert_eq!(wma.update(&close_bar(3, 40.0)), Some(200.0 / 6.0));
}

#[cfg(test)]
#[test]
fn equal_input_is_identity() {
    let mut wma = Wma::new(4, PriceSource::Close);
    for minute in 0..3 {
        assert_eq!(wma.update(&close_bar(minute, 100.0)), None);
    }
    assert_eq!(wma.update(&close_bar(3, 100.0)), Some(100.0));
}

#[cfg(test)]
#[test]
fn reacts_faster_than_the_simple_mean() {
    use super::Sma;

    let closes = [10.0, 10.0, 10.0, 40.0];
    let mut wma = Wma::new(4, PriceSource::Close);
    let mut sma = Sma::new(4, PriceSource::Close);
    let mut last = (None, None);
    for (minute, close) in closes.iter().enumerate() {
        last = (
            wma.update(&close_bar(minute as i64, *close)),
            sma.update(&close_bar(minute as i64, *close)),
        );
    }
    // the jump to 40 carries weight 4 of 10 in the WMA, 1 of 4 in the SMA
    assert!(last.0.unwrap() > last.1.unwrap());
}
