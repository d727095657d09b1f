use super::{Indicator, PriceSource};
use crate::engine::Bar;

/// Exponential moving average with smoothing `k = 2 / (period + 1)`,
/// seeded by the simple mean of the first `period` values.
///
/// Warm-up: the first `period - 1` bars yield `None`; the seed itself is
/// the first emitted value.
#[derive(Debug, Clone)]
pub struct Ema {
    name: String,
    period: usize,
    source: PriceSource,
    seed_sum: f64,
    seen: usize,
    current: Option<f64>,
}

impl Ema {
    /// Creates an EMA over `period` bars of the given price source.
    /// A zero period never becomes ready.
    pub fn new(period: usize, source: PriceSource) -> Self {
        Self {
            name: format!("ema_{period}_{}", source.label()),
            period,
            source,
            seed_sum: 0.0,
            seen: 0,
            current: None,
        }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        let value = self.source.extract(bar);
        if let Some(previous) = self.current {
            let k = 2.0 / (self.period as f64 + 1.0);
            self.current = Some(value * k + previous * (1.0 - k));
        } else {
            self.seed_sum += value;
            self.seen += 1;
            if self.seen == self.period {
                self.current = Some(self.seed_sum / self.period as f64);
            }
        }
        self.current
    }
}

#[cfg(test)]
use super::close_bar;

#[cfg(test)]
#[test]
fn seed_is_the_simple_mean() {
    let mut ema = Ema::new(3, PriceSource::Close);
    assert_eq!(ema.name(), "ema_3_close");

    assert_eq!(ema.update(&close_bar(0, 10.0)), None);
    assert_eq!(ema.update(&close_bar(1, 20.0)), None);
    assert_eq!(ema.update(&close_bar(2, 30.0)), Some(20.0));
}

#[cfg(test)]
#[test]
fn recursion_after_the_seed() {
    let mut ema = Ema::new(3, PriceSource::Close);
    ema.update(&close_bar(0, 10.0));
    ema.update(&close_bar(1, 20.0));
    let seed = ema.update(&close_bar(2, 30.0)).unwrap();
    assert_eq!(seed, 20.0);

    // k = 2 / 4 = 0.5
    let next = ema.update(&close_bar(3, 40.0)).unwrap();
    assert_eq!(next, 40.0 * 0.5 + 20.0 * 0.5);

    let after = ema.update(&close_bar(4, 50.0)).unwrap();
    assert_eq!(after, 50.0 * 0.5 + next * 0.5);
}

#[cfg(test)]
#[test]
fn constant_input_stays_constant() {
    let mut ema = Ema::new(4, PriceSource::Close);
    let mut last = None;
    for minute in 0..10 {
        last = ema.update(&close_bar(minute, 100.0));
    }
    assert_eq!(last, Some(100.0));
}

#[cfg(test)]
#[test]
fn period_one_tracks_the_source() {
    let mut ema = Ema::new(1, PriceSource::Close);
    assert_eq!(ema.update(&close_bar(0, 42.0)), Some(42.0));
    // k = 1: the new value replaces the old entirely
    assert_eq!(ema.update(&close_bar(1, 7.0)), Some(7.0));
}
